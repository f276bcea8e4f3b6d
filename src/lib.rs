// DockStat Collector - container monitoring core
//
// Polls remote Docker hosts, normalizes cumulative counters into usage
// metrics, stores snapshots in MongoDB, detects container state transitions
// between cycles and dispatches notifications for them.

pub mod config;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod storage;

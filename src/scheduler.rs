// Scheduler module - drives the polling cycle and retention cleanup
//
// This module implements the scheduling logic using Tokio tasks.
//
// # Architecture
// - A single driver task owns two interval timers: the poll timer and the
//   24 hour cleanup timer
// - Each poll tick runs in its own task, so replacing the poll timer never
//   cancels a cycle that is already running
// - The poll job sits behind a mutex that ticks only `try_lock`; a tick that
//   fires while a cycle is still running is skipped
// - Reconfiguration is a message to the driver, which swaps the poll timer

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Cadence of retention cleanup, independent of the poll interval
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// One polling cycle
#[async_trait]
pub trait PollJob: Send + 'static {
    /// Runs a cycle
    ///
    /// Returns a new polling interval when the job's configuration asks for
    /// one; the scheduler applies it through `reconfigure`.
    async fn poll(&mut self) -> Option<Duration>;
}

/// Periodic retention work
#[async_trait]
pub trait CleanupJob: Send + Sync + 'static {
    async fn cleanup(&self);
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Polling interval must be positive")]
    InvalidInterval,

    #[error("Scheduler is not running")]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Created, not started
    Idle,
    /// Waiting for the next tick
    Scheduled,
    /// A cycle is running
    Ticking,
    Stopped,
}

enum Command {
    Reconfigure {
        interval: Duration,
        ack: Option<oneshot::Sender<()>>,
    },
    Stop {
        ack: oneshot::Sender<()>,
    },
}

/// Unstarted scheduler
pub struct Scheduler<J: PollJob> {
    job: J,
    cleanup: Arc<dyn CleanupJob>,
    cleanup_interval: Duration,
}

impl<J: PollJob> Scheduler<J> {
    pub fn new(job: J, cleanup: Arc<dyn CleanupJob>) -> Self {
        Scheduler {
            job,
            cleanup,
            cleanup_interval: CLEANUP_INTERVAL,
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::Idle
    }

    /// Starts ticking at `interval`
    ///
    /// Both the first poll and the first cleanup run immediately.
    pub fn start(self, poll_interval: Duration) -> Result<SchedulerHandle, SchedulerError> {
        if poll_interval.is_zero() {
            return Err(SchedulerError::InvalidInterval);
        }

        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (interval_tx, interval_rx) = watch::channel(poll_interval);
        let ticking = Arc::new(AtomicBool::new(false));

        let driver = Driver {
            job: Arc::new(Mutex::new(self.job)),
            cleanup: self.cleanup,
            cleanup_interval: self.cleanup_interval,
            commands_tx: commands_tx.clone(),
            commands_rx,
            interval_tx,
            ticking: ticking.clone(),
        };

        info!(
            "Data fetching scheduled every {} seconds",
            poll_interval.as_secs()
        );
        info!(
            "Old entries cleanup scheduled every {} hours",
            self.cleanup_interval.as_secs() / 3600
        );

        let task = tokio::spawn(driver.run(poll_interval));

        Ok(SchedulerHandle {
            commands: commands_tx,
            interval: interval_rx,
            ticking,
            task,
        })
    }
}

/// Control handle of a running scheduler
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    interval: watch::Receiver<Duration>,
    ticking: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Replaces the poll timer and triggers a tick right away
    ///
    /// Returns once the new timer is installed. A cycle that is already
    /// running is allowed to finish.
    pub async fn reconfigure(&self, poll_interval: Duration) -> Result<(), SchedulerError> {
        if poll_interval.is_zero() {
            return Err(SchedulerError::InvalidInterval);
        }

        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Reconfigure {
                interval: poll_interval,
                ack: Some(ack),
            })
            .await
            .map_err(|_| SchedulerError::Stopped)?;

        done.await.map_err(|_| SchedulerError::Stopped)
    }

    pub fn current_interval(&self) -> Duration {
        *self.interval.borrow()
    }

    pub fn state(&self) -> SchedulerState {
        if self.task.is_finished() {
            SchedulerState::Stopped
        } else if self.ticking.load(Ordering::SeqCst) {
            SchedulerState::Ticking
        } else {
            SchedulerState::Scheduled
        }
    }

    /// Cancels both timers and waits for the driver to exit
    pub async fn stop(self) -> Result<(), SchedulerError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Stop { ack })
            .await
            .map_err(|_| SchedulerError::Stopped)?;
        done.await.map_err(|_| SchedulerError::Stopped)?;

        if let Err(e) = self.task.await {
            error!("Scheduler task panicked: {}", e);
        }
        Ok(())
    }
}

/// Clears the ticking flag even if the cycle panics
struct TickingGuard(Arc<AtomicBool>);

impl TickingGuard {
    fn enter(flag: Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        TickingGuard(flag)
    }
}

impl Drop for TickingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Driver<J: PollJob> {
    job: Arc<Mutex<J>>,
    cleanup: Arc<dyn CleanupJob>,
    cleanup_interval: Duration,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
    interval_tx: watch::Sender<Duration>,
    ticking: Arc<AtomicBool>,
}

impl<J: PollJob> Driver<J> {
    fn timer(period: Duration) -> Interval {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    }

    async fn run(mut self, poll_interval: Duration) {
        let mut poll_timer = Self::timer(poll_interval);
        let mut cleanup_timer = Self::timer(self.cleanup_interval);

        loop {
            tokio::select! {
                _ = poll_timer.tick() => self.spawn_tick(),
                _ = cleanup_timer.tick() => self.spawn_cleanup(),
                command = self.commands_rx.recv() => match command {
                    Some(Command::Reconfigure { interval, ack }) => {
                        // Dropping the old timer cancels its pending tick;
                        // the new one fires immediately
                        poll_timer = Self::timer(interval);
                        self.interval_tx.send_replace(interval);
                        info!("Fetch interval updated to {} seconds", interval.as_secs());
                        if let Some(ack) = ack {
                            let _ = ack.send(());
                        }
                    }
                    Some(Command::Stop { ack }) => {
                        info!("Scheduler stopped");
                        let _ = ack.send(());
                        break;
                    }
                    None => break,
                },
            }
        }
    }

    fn spawn_tick(&self) {
        let job = self.job.clone();
        let commands = self.commands_tx.clone();
        let current = self.interval_tx.subscribe();
        let ticking = self.ticking.clone();

        tokio::spawn(async move {
            let Ok(mut job) = job.try_lock_owned() else {
                warn!("Previous cycle still running, skipping this tick");
                return;
            };

            let requested = {
                let _guard = TickingGuard::enter(ticking);
                job.poll().await
            };
            drop(job);

            if let Some(requested) = requested {
                if requested.is_zero() || requested == *current.borrow() {
                    return;
                }
                let command = Command::Reconfigure {
                    interval: requested,
                    ack: None,
                };
                if commands.send(command).await.is_err() {
                    warn!("Scheduler stopped before interval change could be applied");
                }
            }
        });
    }

    fn spawn_cleanup(&self) {
        let cleanup = self.cleanup.clone();
        tokio::spawn(async move { cleanup.cleanup().await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counters {
        polls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        cleanups: AtomicUsize,
    }

    struct TestJob {
        counters: Arc<Counters>,
        work: Duration,
        request: Option<Duration>,
    }

    #[async_trait]
    impl PollJob for TestJob {
        async fn poll(&mut self) -> Option<Duration> {
            let c = &self.counters;
            c.polls.fetch_add(1, Ordering::SeqCst);
            let active = c.active.fetch_add(1, Ordering::SeqCst) + 1;
            c.max_active.fetch_max(active, Ordering::SeqCst);
            if !self.work.is_zero() {
                tokio::time::sleep(self.work).await;
            }
            c.active.fetch_sub(1, Ordering::SeqCst);
            self.request.take()
        }
    }

    struct TestCleanup(Arc<Counters>);

    #[async_trait]
    impl CleanupJob for TestCleanup {
        async fn cleanup(&self) {
            self.0.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn build(work: Duration, request: Option<Duration>) -> (Scheduler<TestJob>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let job = TestJob {
            counters: counters.clone(),
            work,
            request,
        };
        let cleanup = Arc::new(TestCleanup(counters.clone()));
        (Scheduler::new(job, cleanup), counters)
    }

    fn polls(counters: &Counters) -> usize {
        counters.polls.load(Ordering::SeqCst)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_ticks_immediately_then_periodically() {
        let (scheduler, counters) = build(Duration::ZERO, None);
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        let handle = scheduler.start(5 * MINUTE).unwrap();
        settle().await;
        assert_eq!(polls(&counters), 1);
        assert_eq!(handle.state(), SchedulerState::Scheduled);

        tokio::time::sleep(5 * MINUTE).await;
        assert_eq!(polls(&counters), 2);
        assert_eq!(handle.current_interval(), 5 * MINUTE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_ticks_immediately() {
        let (scheduler, counters) = build(Duration::ZERO, None);
        let handle = scheduler.start(60 * MINUTE).unwrap();
        settle().await;
        assert_eq!(polls(&counters), 1);

        handle.reconfigure(10 * MINUTE).await.unwrap();
        settle().await;
        assert_eq!(polls(&counters), 2);
        assert_eq!(handle.current_interval(), 10 * MINUTE);

        tokio::time::sleep(10 * MINUTE).await;
        assert_eq!(polls(&counters), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_rejected() {
        let (scheduler, _) = build(Duration::ZERO, None);
        assert_eq!(
            scheduler.start(Duration::ZERO).err(),
            Some(SchedulerError::InvalidInterval)
        );

        let (scheduler, _) = build(Duration::ZERO, None);
        let handle = scheduler.start(5 * MINUTE).unwrap();
        assert_eq!(
            handle.reconfigure(Duration::ZERO).await,
            Err(SchedulerError::InvalidInterval)
        );
        assert_eq!(handle.current_interval(), 5 * MINUTE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_ticks_are_skipped() {
        let (scheduler, counters) = build(12 * MINUTE, None);
        let handle = scheduler.start(5 * MINUTE).unwrap();
        settle().await;
        assert_eq!(handle.state(), SchedulerState::Ticking);

        // Cycles start at 0 and 15 minutes; ticks at 5, 10, 20, 25 are skipped
        tokio::time::sleep(29 * MINUTE).await;

        assert_eq!(counters.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(polls(&counters), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_runs_on_its_own_cadence() {
        let (scheduler, counters) = build(Duration::ZERO, None);
        let _handle = scheduler.start(6 * 60 * MINUTE).unwrap();
        settle().await;
        assert_eq!(counters.cleanups.load(Ordering::SeqCst), 1);

        tokio::time::sleep(CLEANUP_INTERVAL).await;

        assert_eq!(counters.cleanups.load(Ordering::SeqCst), 2);
        assert_eq!(polls(&counters), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_can_request_new_interval() {
        let (scheduler, counters) = build(Duration::ZERO, Some(10 * MINUTE));
        let handle = scheduler.start(60 * MINUTE).unwrap();
        settle().await;

        assert_eq!(handle.current_interval(), 10 * MINUTE);
        assert_eq!(polls(&counters), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timers() {
        let (scheduler, counters) = build(Duration::ZERO, None);
        let handle = scheduler.start(5 * MINUTE).unwrap();
        settle().await;

        handle.stop().await.unwrap();
        tokio::time::sleep(30 * MINUTE).await;

        assert_eq!(polls(&counters), 1);
    }
}

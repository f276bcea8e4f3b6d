// Message templates
//
// A template is plain text with `{{key}}` placeholders. Supported keys:
// id, name, hostName (or host), state, transition.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use super::{ContainerDirectory, NotifyError};
use crate::state::Transition;

const DEFAULT_TEMPLATE: &str =
    "Container {{name}} ({{id}}) on {{hostName}} {{transition}}, state: {{state}}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub text: String,
}

impl Default for Template {
    fn default() -> Self {
        Template {
            text: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl Template {
    /// Loads a `{"text": "..."}` template file, falling back to the default
    pub async fn load(path: &Path) -> Self {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to load template {}: {}. Using default", path.display(), e);
                return Self::default();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Invalid template {}: {}. Using default", path.display(), e);
            Self::default()
        })
    }

    pub fn render(&self, transition: &Transition) -> String {
        let kind = transition.kind.to_string();
        let values = [
            ("id", transition.container_id.as_str()),
            ("name", transition.container_name.as_str()),
            ("hostName", transition.host_name.as_str()),
            ("host", transition.host_name.as_str()),
            ("state", transition.state()),
            ("transition", kind.as_str()),
        ];

        values.iter().fold(self.text.clone(), |text, (key, value)| {
            text.replace(&format!("{{{{{}}}}}", key), value)
        })
    }
}

/// Renders messages for channels from the shared container directory
#[derive(Debug)]
pub struct MessageRenderer {
    template: Template,
    directory: Arc<ContainerDirectory>,
}

impl MessageRenderer {
    pub fn new(template: Template, directory: Arc<ContainerDirectory>) -> Self {
        MessageRenderer {
            template,
            directory,
        }
    }

    pub fn render(&self, container_id: &str) -> Result<String, NotifyError> {
        self.directory
            .get(container_id)
            .map(|transition| self.template.render(&transition))
            .ok_or_else(|| NotifyError::UnknownContainer(container_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TransitionKind;

    fn exited() -> Transition {
        Transition {
            container_id: "abc".to_string(),
            container_name: "web".to_string(),
            host_name: "nas".to_string(),
            kind: TransitionKind::Exited {
                from: "running".to_string(),
            },
        }
    }

    #[test]
    fn test_render_placeholders() {
        let template = Template {
            text: "{{name}}@{{hostName}} is {{state}} ({{id}}, {{name}})".to_string(),
        };
        assert_eq!(template.render(&exited()), "web@nas is exited (abc, web)");
    }

    #[test]
    fn test_host_placeholder_alias() {
        let template = Template {
            text: "{{name}} on {{host}} / {{hostName}}".to_string(),
        };
        assert_eq!(template.render(&exited()), "web on nas / nas");
    }

    #[test]
    fn test_renderer_requires_known_container() {
        let directory = Arc::new(ContainerDirectory::new());
        let renderer = MessageRenderer::new(Template::default(), directory.clone());

        assert!(matches!(
            renderer.render("abc"),
            Err(NotifyError::UnknownContainer(_))
        ));

        directory.record(&exited());
        let message = renderer.render("abc").unwrap();
        assert!(message.contains("web"));
        assert!(message.contains("exited (was running)"));
    }

    #[tokio::test]
    async fn test_load_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        assert_eq!(Template::load(&path).await, Template::default());

        tokio::fs::write(&path, r#"{"text": "{{name}} changed"}"#).await.unwrap();
        assert_eq!(Template::load(&path).await.text, "{{name}} changed");
    }
}

//! The four hook points a host exposes to plugins, and a sequential
//! dispatcher over registered plugins.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::document::DocumentError;
use crate::editor::EditorError;
use crate::message::{Message, RequestContext};
use crate::splice::SpliceError;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Editor(#[from] EditorError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Splice(#[from] SpliceError),
}

/// Lifecycle notifications from the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    SessionCreated {
        session_id: String,
    },
    SessionIdle {
        session_id: String,
    },
    SessionDeleted {
        session_id: String,
    },
    /// A slash command typed by the user, e.g. `/ctxedit off`.
    Command {
        session_id: String,
        name: String,
        #[serde(default)]
        args: String,
    },
}

/// A message the user just submitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub session_id: String,
    pub message: Message,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Model parameters for the next request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatParams {
    pub session_id: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A plugin. Every hook defaults to a no-op.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn event(&self, _event: &HostEvent) -> Result<(), HookError> {
        Ok(())
    }

    async fn chat_message(&self, _input: &mut ChatMessage) -> Result<(), HookError> {
        Ok(())
    }

    async fn chat_params(&self, _params: &mut ChatParams) -> Result<(), HookError> {
        Ok(())
    }

    /// Last chance to change the request before it is sent.
    async fn request(&self, _ctx: &mut RequestContext) -> Result<(), HookError> {
        Ok(())
    }
}

/// Calls plugins one after another, in registration order.
///
/// A failing plugin is logged and skipped; the request always goes out.
#[derive(Clone, Default)]
pub struct PluginHost {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        tracing::debug!("registered plugin {}", plugin.name());
        self.plugins.push(plugin);
    }

    pub async fn event(&self, event: &HostEvent) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.event(event).await {
                tracing::warn!("plugin {} failed on event: {e}", plugin.name());
            }
        }
    }

    pub async fn chat_message(&self, input: &mut ChatMessage) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.chat_message(input).await {
                tracing::warn!("plugin {} failed on chat message: {e}", plugin.name());
            }
        }
    }

    pub async fn chat_params(&self, params: &mut ChatParams) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.chat_params(params).await {
                tracing::warn!("plugin {} failed on chat params: {e}", plugin.name());
            }
        }
    }

    pub async fn request(&self, ctx: &mut RequestContext) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.request(ctx).await {
                tracing::warn!("plugin {} failed on request: {e}", plugin.name());
            }
        }
    }
}

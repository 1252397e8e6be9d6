use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::config::EditorConfig;
use crate::document::{self, RenderOptions};
use crate::editor::{self, EditorCommand, TempOptions};
use crate::hooks::{ChatMessage, ChatParams, HookError, HostEvent, Plugin};
use crate::message::RequestContext;
use crate::splice::{self, EditSummary, SpliceOptions};

/// Slash command that toggles editing for a session.
pub const COMMAND: &str = "ctxedit";

/// What the plugin remembers about a session between hooks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Per-session override of `EditorConfig::enabled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Id of the message submitted this turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Opens every outgoing request in an editor and splices the edits back.
pub struct ContextEditor {
    config: EditorConfig,
    editor: EditorCommand,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl ContextEditor {
    pub fn new(config: EditorConfig) -> Self {
        let editor = EditorCommand::resolve(config.editor.as_deref());
        Self::with_editor(config, editor)
    }

    pub fn with_editor(config: EditorConfig, editor: EditorCommand) -> Self {
        Self {
            config,
            editor,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn editor(&self) -> &EditorCommand {
        &self.editor
    }

    pub fn session_state(&self, session_id: &str) -> SessionState {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Seed state carried over from a previous process.
    pub fn restore_session(&self, session_id: &str, state: SessionState) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), state);
    }

    fn update<R>(&self, session_id: &str, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut sessions = self.sessions.lock().unwrap();
        f(sessions.entry(session_id.to_string()).or_default())
    }

    fn is_enabled(&self, state: &SessionState) -> bool {
        state.enabled.unwrap_or(self.config.enabled)
    }

    fn handle_command(&self, session_id: &str, args: &str) {
        let default = self.config.enabled;
        let enabled = self.update(session_id, |state| {
            let current = state.enabled.unwrap_or(default);
            let next = match args.trim() {
                "on" => true,
                "off" => false,
                "" | "toggle" => !current,
                other => {
                    tracing::warn!("unknown /{COMMAND} argument: {other}");
                    current
                }
            };
            state.enabled = Some(next);
            next
        });
        tracing::info!(
            "context editing {} for session {session_id}",
            if enabled { "on" } else { "off" }
        );
    }

    /// Run one render -> editor -> splice cycle on `ctx`.
    ///
    /// Returns `None` when there was nothing to show. On error `ctx` is
    /// left as it was.
    pub async fn edit(
        &self,
        ctx: &mut RequestContext,
        pending_id: Option<&str>,
        model: Option<&str>,
    ) -> Result<Option<EditSummary>, HookError> {
        let opts = RenderOptions::from(&self.config);
        let doc = if ctx.model.is_none() && model.is_some() {
            let mut view = ctx.clone();
            view.model = model.map(str::to_string);
            document::render(&view, pending_id, &opts)
        } else {
            document::render(ctx, pending_id, &opts)
        };
        if doc.sections.is_empty() {
            tracing::debug!("nothing to edit in session {}", ctx.session_id);
            return Ok(None);
        }

        let temp = TempOptions {
            dir: self.config.temp_dir.clone(),
            keep: self.config.keep_file,
        };
        let edited = self.editor.round_trip_blocking(doc.text.clone(), temp).await?;
        let summary = splice::apply_edits(
            ctx,
            &doc,
            &edited,
            SpliceOptions {
                allow_delete: self.config.allow_delete,
            },
        )?;

        if summary.cancelled {
            tracing::info!("editor returned an empty document; request unchanged");
        } else {
            tracing::info!(
                "spliced edits: {} edited, {} deleted, {} ignored",
                summary.edited,
                summary.deleted,
                summary.ignored
            );
            if !summary.is_noop() {
                tracing::debug!("context diff:\n{}", summary.diff);
            }
        }
        Ok(Some(summary))
    }
}

#[async_trait::async_trait]
impl Plugin for ContextEditor {
    fn name(&self) -> &str {
        COMMAND
    }

    async fn event(&self, event: &HostEvent) -> Result<(), HookError> {
        match event {
            HostEvent::SessionCreated { session_id } => {
                self.update(session_id, |_| ());
            }
            HostEvent::SessionIdle { session_id } => {
                self.update(session_id, |state| state.pending_id = None);
            }
            HostEvent::SessionDeleted { session_id } => {
                self.sessions.lock().unwrap().remove(session_id);
            }
            HostEvent::Command {
                session_id,
                name,
                args,
            } if name == COMMAND => self.handle_command(session_id, args),
            HostEvent::Command { .. } => {}
        }
        Ok(())
    }

    async fn chat_message(&self, input: &mut ChatMessage) -> Result<(), HookError> {
        let id = input.message.id.clone();
        self.update(&input.session_id, |state| state.pending_id = Some(id));
        Ok(())
    }

    async fn chat_params(&self, params: &mut ChatParams) -> Result<(), HookError> {
        if !params.model.is_empty() {
            let model = params.model.clone();
            self.update(&params.session_id, |state| state.model = Some(model));
        }
        Ok(())
    }

    async fn request(&self, ctx: &mut RequestContext) -> Result<(), HookError> {
        let state = self.update(&ctx.session_id, |state| {
            let snapshot = state.clone();
            state.pending_id = None;
            snapshot
        });
        if !self.is_enabled(&state) {
            tracing::debug!("context editing off for session {}", ctx.session_id);
            return Ok(());
        }
        if self.config.require_tty && !editor::terminal_available() {
            tracing::debug!("no terminal available; skipping context editor");
            return Ok(());
        }
        self.edit(ctx, state.pending_id.as_deref(), state.model.as_deref())
            .await?;
        Ok(())
    }
}

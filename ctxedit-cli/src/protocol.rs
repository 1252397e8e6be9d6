//! JSON-over-stdio protocol for hosts that run `ctxedit hook` as a
//! subprocess: one envelope in on stdin, one response out on stdout.

use std::sync::Arc;

use ctxedit_core::{
    ChatMessage, ChatParams, ContextEditor, HostEvent, PluginHost, RequestContext, SessionState,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookName {
    Event,
    ChatMessage,
    ChatParams,
    Request,
}

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub hook: HookName,
    pub payload: serde_json::Value,
    /// Session state returned by the previous call, if the host kept it.
    #[serde(default)]
    pub state: Option<SessionState>,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SessionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn failure(error: impl std::fmt::Display) -> Self {
        Self {
            ok: false,
            payload: None,
            state: None,
            error: Some(error.to_string()),
        }
    }
}

fn event_session(event: &HostEvent) -> &str {
    match event {
        HostEvent::SessionCreated { session_id }
        | HostEvent::SessionIdle { session_id }
        | HostEvent::SessionDeleted { session_id }
        | HostEvent::Command { session_id, .. } => session_id,
    }
}

/// Serialize `after` only if a plugin changed it; otherwise hand back the
/// host's own JSON so fields we do not model keep their exact shape.
fn reply_payload<T: Serialize + PartialEq>(
    original: serde_json::Value,
    before: &T,
    after: &T,
) -> anyhow::Result<serde_json::Value> {
    if before == after {
        Ok(original)
    } else {
        Ok(serde_json::to_value(after)?)
    }
}

/// Dispatch one envelope to the plugin and build the reply.
pub async fn handle(plugin: Arc<ContextEditor>, envelope: Envelope) -> anyhow::Result<Response> {
    let mut host = PluginHost::new();
    host.register(plugin.clone());

    let Envelope {
        hook,
        payload,
        state,
    } = envelope;
    let restore = |session_id: &str| {
        if let Some(state) = state.clone() {
            plugin.restore_session(session_id, state);
        }
    };

    let (payload, session_id) = match hook {
        HookName::Event => {
            let event: HostEvent = serde_json::from_value(payload.clone())?;
            let session_id = event_session(&event).to_string();
            restore(&session_id);
            host.event(&event).await;
            (payload, session_id)
        }
        HookName::ChatMessage => {
            let before: ChatMessage = serde_json::from_value(payload.clone())?;
            let mut input = before.clone();
            restore(&input.session_id);
            host.chat_message(&mut input).await;
            (reply_payload(payload, &before, &input)?, input.session_id)
        }
        HookName::ChatParams => {
            let before: ChatParams = serde_json::from_value(payload.clone())?;
            let mut params = before.clone();
            restore(&params.session_id);
            host.chat_params(&mut params).await;
            (reply_payload(payload, &before, &params)?, params.session_id)
        }
        HookName::Request => {
            let before: RequestContext = serde_json::from_value(payload.clone())?;
            let mut ctx = before.clone();
            restore(&ctx.session_id);
            host.request(&mut ctx).await;
            (reply_payload(payload, &before, &ctx)?, ctx.session_id)
        }
    };

    Ok(Response {
        ok: true,
        payload: Some(payload),
        state: Some(plugin.session_state(&session_id)),
        error: None,
    })
}

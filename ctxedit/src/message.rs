// ─── Request context model ───

/// A chat message as the host hands it to the request hook.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
    /// Host fields this crate does not model; passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Part {
    /// e.g. "prt_01"
    pub id: String,
    pub kind: PartKind,
    #[serde(default)]
    pub content: String,
    /// Tool name for tool calls/results, file name for files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Injected by the host rather than typed by a person.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartKind {
    Text,
    Reasoning,
    ToolCall,
    ToolResult,
    File,
}

impl PartKind {
    pub fn label(self) -> &'static str {
        match self {
            PartKind::Text => "text",
            PartKind::Reasoning => "reasoning",
            PartKind::ToolCall => "tool call",
            PartKind::ToolResult => "tool result",
            PartKind::File => "file",
        }
    }
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        }
    }
}

impl Part {
    pub fn text(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: PartKind::Text,
            content: content.into(),
            tool: None,
            synthetic: false,
            extra: Default::default(),
        }
    }

    /// Only hand-typed text is offered for editing; everything else is
    /// shown for context and passed through untouched.
    pub fn is_editable(&self) -> bool {
        self.kind == PartKind::Text && !self.synthetic
    }
}

impl Message {
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_text(id.into(), Role::User, text.into())
    }

    pub fn assistant(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_text(id.into(), Role::Assistant, text.into())
    }

    fn with_text(id: String, role: Role, text: String) -> Self {
        let part_id = format!("{id}.p0");
        Self {
            id,
            role,
            parts: vec![Part::text(part_id, text)],
            extra: Default::default(),
        }
    }

    /// Editable text of the message, parts separated by blank lines.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter(|p| p.is_editable())
            .map(|p| p.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn part_mut(&mut self, part_id: &str) -> Option<&mut Part> {
        self.parts.iter_mut().find(|p| p.id == part_id)
    }
}

/// Everything the host is about to send for one chat turn.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub system: Vec<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RequestContext {
    /// Index of the message the user just submitted.
    ///
    /// Prefers the id captured by the chat-message hook; without one, a
    /// trailing user message is taken as pending.
    pub fn pending_index(&self, pending_id: Option<&str>) -> Option<usize> {
        if let Some(id) = pending_id
            && let Some(idx) = self.messages.iter().position(|m| m.id == id)
        {
            return Some(idx);
        }
        match self.messages.last() {
            Some(m) if m.role == Role::User => Some(self.messages.len() - 1),
            _ => None,
        }
    }

    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }
}

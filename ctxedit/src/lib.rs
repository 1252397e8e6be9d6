pub mod config;
pub mod document;
pub mod editor;
pub mod hooks;
pub mod message;
pub mod plugin;
pub mod splice;

// Re-exports
pub use config::{ConfigError, EditorConfig};
pub use document::{Document, DocumentError, ParsedDocument, RenderOptions, SectionKey};
pub use editor::{EditorCommand, EditorError, TempOptions};
pub use hooks::{ChatMessage, ChatParams, HookError, HostEvent, Plugin, PluginHost};
pub use message::{Message, Part, PartKind, RequestContext, Role};
pub use plugin::{ContextEditor, SessionState};
pub use splice::{EditSummary, SpliceError, SpliceOptions};

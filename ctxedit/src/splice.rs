use std::collections::HashSet;

use crate::document::{self, Document, DocumentError, ParsedDocument, SectionKey};
use crate::message::RequestContext;

#[derive(Debug, thiserror::Error)]
pub enum SpliceError {
    #[error("edited document has no section markers left")]
    NoSections,
    #[error("section {0} no longer matches the request context")]
    MissingTarget(usize),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

#[derive(Clone, Copy, Debug)]
pub struct SpliceOptions {
    pub allow_delete: bool,
}

impl Default for SpliceOptions {
    fn default() -> Self {
        Self { allow_delete: true }
    }
}

/// What a splice did to the request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EditSummary {
    /// The editor returned an empty file.
    pub cancelled: bool,
    pub edited: usize,
    pub deleted: usize,
    /// Edits that could not be applied (read-only sections, unknown
    /// markers, deletions while deleting is off).
    pub ignored: usize,
    /// Unified diff of the rendered vs. edited document.
    pub diff: String,
}

impl EditSummary {
    pub fn is_noop(&self) -> bool {
        self.edited == 0 && self.deleted == 0
    }
}

enum Change {
    SetSystem(usize, String),
    DropSystem(usize),
    SetPart {
        message: String,
        part: String,
        content: String,
    },
    DropPart {
        message: String,
        part: String,
    },
}

/// Equal up to surrounding whitespace and line endings.
fn same_text(edited: &str, original: &str) -> bool {
    edited.replace("\r\n", "\n").trim() == original.replace("\r\n", "\n").trim()
}

/// Apply a parsed document to the context it was rendered from.
///
/// All changes are planned and validated before the first one is applied,
/// so an error leaves `ctx` untouched.
pub fn splice(
    ctx: &mut RequestContext,
    doc: &Document,
    parsed: &ParsedDocument,
    opts: SpliceOptions,
) -> Result<EditSummary, SpliceError> {
    let (bodies, unknown) = match parsed {
        ParsedDocument::Empty => {
            return Ok(EditSummary {
                cancelled: true,
                ..Default::default()
            });
        }
        ParsedDocument::Sections {
            bodies,
            unknown,
            markers,
        } => {
            if *markers == 0 && !doc.sections.is_empty() {
                return Err(SpliceError::NoSections);
            }
            (bodies, unknown)
        }
    };
    let mut summary = EditSummary {
        ignored: unknown.len(),
        ..Default::default()
    };
    let mut plan = Vec::new();

    for (index, section) in doc.sections.iter().enumerate() {
        let body = bodies.get(&index);
        let (message, part) = match &section.key {
            SectionKey::Readonly { .. } => {
                if !body.is_some_and(|b| same_text(b, &section.rendered)) {
                    tracing::debug!("ignoring change to read-only section {index}");
                    summary.ignored += 1;
                }
                continue;
            }
            SectionKey::System(i) => {
                if ctx.system.get(*i) != Some(&section.original) {
                    return Err(SpliceError::MissingTarget(index));
                }
                match body {
                    Some(b) if same_text(b, &section.original) => {}
                    Some(b) => plan.push(Change::SetSystem(*i, b.clone())),
                    None if opts.allow_delete => plan.push(Change::DropSystem(*i)),
                    None => summary.ignored += 1,
                }
                continue;
            }
            SectionKey::Text { message, part } | SectionKey::Pending { message, part } => {
                (message, part)
            }
        };

        let exists = ctx
            .messages
            .iter()
            .find(|m| &m.id == message)
            .and_then(|m| m.parts.iter().find(|p| &p.id == part))
            .is_some_and(|p| p.content == section.original);
        if !exists {
            return Err(SpliceError::MissingTarget(index));
        }
        match body {
            Some(b) if same_text(b, &section.original) => {}
            Some(b) => plan.push(Change::SetPart {
                message: message.clone(),
                part: part.clone(),
                content: b.clone(),
            }),
            None if opts.allow_delete => plan.push(Change::DropPart {
                message: message.clone(),
                part: part.clone(),
            }),
            None => summary.ignored += 1,
        }
    }

    apply(ctx, plan, &mut summary);
    Ok(summary)
}

fn apply(ctx: &mut RequestContext, plan: Vec<Change>, summary: &mut EditSummary) {
    let mut dropped_system = Vec::new();
    let mut dropped_parts = Vec::new();
    for change in plan {
        match change {
            Change::SetSystem(i, content) => {
                ctx.system[i] = content;
                summary.edited += 1;
            }
            Change::SetPart {
                message,
                part,
                content,
            } => {
                if let Some(p) = ctx.message_mut(&message).and_then(|m| m.part_mut(&part)) {
                    p.content = content;
                    summary.edited += 1;
                }
            }
            Change::DropSystem(i) => dropped_system.push(i),
            Change::DropPart { message, part } => dropped_parts.push((message, part)),
        }
    }

    dropped_system.sort_unstable();
    for i in dropped_system.into_iter().rev() {
        ctx.system.remove(i);
        summary.deleted += 1;
    }

    let mut emptied = HashSet::new();
    for (message, part) in dropped_parts {
        if let Some(m) = ctx.message_mut(&message) {
            let before = m.parts.len();
            m.parts.retain(|p| p.id != part);
            summary.deleted += before - m.parts.len();
            if m.parts.is_empty() {
                emptied.insert(message);
            }
        }
    }
    if !emptied.is_empty() {
        ctx.messages.retain(|m| !emptied.contains(&m.id));
    }
}

/// Parse the edited text, splice it into `ctx` and attach a diff.
pub fn apply_edits(
    ctx: &mut RequestContext,
    doc: &Document,
    edited: &str,
    opts: SpliceOptions,
) -> Result<EditSummary, SpliceError> {
    let parsed = document::parse(edited, doc)?;
    let mut summary = splice(ctx, doc, &parsed, opts)?;
    if !summary.cancelled {
        summary.diff = similar::TextDiff::from_lines(doc.text.as_str(), edited)
            .unified_diff()
            .context_radius(2)
            .header("rendered", "edited")
            .to_string();
    }
    Ok(summary)
}

//! Markdown rendering of a request context, and parsing of the edited file.
//!
//! Every section starts at a heading whose trailing HTML comment carries a
//! per-document nonce and the section number:
//!
//! ```text
//! ## User · msg_3 <!-- ctx:1f0c9a2e 4 text -->
//! ```
//!
//! Group headings (`# Conversation <!-- ctx:1f0c9a2e group -->`) only
//! delimit sections. Anything before the first marker is ignored.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::EditorConfig;
use crate::message::{Message, Part, RequestContext};

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("section {0} appears more than once")]
    DuplicateSection(usize),
    #[error("section {index} is marked '{found}' but was rendered as '{expected}'")]
    KindMismatch {
        index: usize,
        expected: &'static str,
        found: String,
    },
    #[error("malformed section marker: {0}")]
    MalformedMarker(String),
}

/// What a rendered section maps back to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SectionKey {
    /// Entry of the system prompt list.
    System(usize),
    /// Editable text part of a history message.
    Text { message: String, part: String },
    /// Editable text part of the message being sent.
    Pending { message: String, part: String },
    /// Shown for context only; never spliced back.
    Readonly { message: String, part: String },
}

impl SectionKey {
    pub fn kind(&self) -> &'static str {
        match self {
            SectionKey::System(_) => "system",
            SectionKey::Text { .. } => "text",
            SectionKey::Pending { .. } => "pending",
            SectionKey::Readonly { .. } => "readonly",
        }
    }

    pub fn is_editable(&self) -> bool {
        !matches!(self, SectionKey::Readonly { .. })
    }
}

#[derive(Clone, Debug)]
pub struct RenderedSection {
    pub key: SectionKey,
    /// Content exactly as it was in the context.
    pub original: String,
    /// Body as written to the document.
    pub rendered: String,
}

/// A rendered document plus what is needed to map edits back.
#[derive(Clone, Debug)]
pub struct Document {
    pub text: String,
    pub nonce: String,
    pub sections: Vec<RenderedSection>,
}

#[derive(Clone, Debug)]
pub struct RenderOptions {
    pub include_system: bool,
    pub include_history: bool,
    pub history_limit: Option<usize>,
    pub show_readonly: bool,
    pub allow_delete: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::from(&EditorConfig::default())
    }
}

impl From<&EditorConfig> for RenderOptions {
    fn from(config: &EditorConfig) -> Self {
        Self {
            include_system: config.include_system,
            include_history: config.include_history,
            history_limit: config.history_limit,
            show_readonly: config.show_readonly,
            allow_delete: config.allow_delete,
        }
    }
}

// ─── Rendering ───

struct Renderer {
    nonce: String,
    out: String,
    sections: Vec<RenderedSection>,
}

impl Renderer {
    fn group(&mut self, title: &str) {
        self.out
            .push_str(&format!("# {title} <!-- ctx:{} group -->\n\n", self.nonce));
    }

    fn section(&mut self, label: &str, key: SectionKey, original: &str, body: &str) {
        let index = self.sections.len();
        self.out.push_str(&format!(
            "## {label} <!-- ctx:{} {index} {} -->\n\n",
            self.nonce,
            key.kind()
        ));
        if !body.is_empty() {
            self.out.push_str(body);
            self.out.push('\n');
        }
        self.out.push('\n');
        self.sections.push(RenderedSection {
            key,
            original: original.to_string(),
            rendered: body.to_string(),
        });
    }

    fn message(&mut self, msg: &Message, pending: bool, show_readonly: bool) {
        for part in &msg.parts {
            let label = if pending {
                format!("Pending · {}", msg.id)
            } else {
                format!("{} · {}", msg.role.label(), msg.id)
            };
            if part.is_editable() {
                let key = if pending {
                    SectionKey::Pending {
                        message: msg.id.clone(),
                        part: part.id.clone(),
                    }
                } else {
                    SectionKey::Text {
                        message: msg.id.clone(),
                        part: part.id.clone(),
                    }
                };
                self.section(&label, key, &part.content, &part.content);
            } else if show_readonly {
                let key = SectionKey::Readonly {
                    message: msg.id.clone(),
                    part: part.id.clone(),
                };
                let label = format!("{label} · {} (read-only)", readonly_title(part));
                self.section(&label, key, &part.content, &fenced(part));
            }
        }
    }
}

fn readonly_title(part: &Part) -> String {
    match &part.tool {
        Some(tool) => format!("{} `{tool}`", part.kind.label()),
        None if part.synthetic => format!("{} (synthetic)", part.kind.label()),
        None => part.kind.label().to_string(),
    }
}

/// Fence long enough that backticks inside the content cannot close it.
fn fenced(part: &Part) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in part.content.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    let fence = "`".repeat((longest + 1).max(3));
    let info = part.tool.as_deref().unwrap_or("");
    format!("{fence}{info}\n{}\n{fence}", part.content)
}

fn preamble(ctx: &RequestContext, opts: &RenderOptions) -> String {
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let session = if ctx.session_id.is_empty() {
        "-"
    } else {
        ctx.session_id.as_str()
    };
    let model = ctx.model.as_deref().unwrap_or("-");
    let mut out = String::from("<!--\n");
    out.push_str(&format!(
        "  ctxedit · session {session} · model {model} · {now}\n\n"
    ));
    out.push_str("  Edit the text under the headings below, then save and quit to send.\n");
    out.push_str("  Headings ending in a ctx marker delimit sections: keep them intact.\n");
    if opts.allow_delete {
        out.push_str("  Delete a heading together with its text to drop that part.\n");
    }
    out.push_str("  Read-only sections are shown for context; edits to them are ignored.\n");
    out.push_str("  Empty the whole file to send the request unchanged.\n");
    out.push_str("-->\n\n");
    out
}

/// Render the request context as a markdown document.
pub fn render(ctx: &RequestContext, pending_id: Option<&str>, opts: &RenderOptions) -> Document {
    let nonce = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let mut r = Renderer {
        nonce,
        out: preamble(ctx, opts),
        sections: Vec::new(),
    };

    if opts.include_system && !ctx.system.is_empty() {
        r.group("System prompt");
        for (i, entry) in ctx.system.iter().enumerate() {
            let label = format!("System · {}", i + 1);
            r.section(&label, SectionKey::System(i), entry, entry);
        }
    }

    let pending = ctx.pending_index(pending_id);
    let history_end = pending.unwrap_or(ctx.messages.len());
    if opts.include_history && history_end > 0 {
        let start = opts
            .history_limit
            .map(|n| history_end.saturating_sub(n))
            .unwrap_or(0);
        let history = &ctx.messages[start..history_end];
        if !history.is_empty() {
            r.group("Conversation");
            for msg in history {
                r.message(msg, false, opts.show_readonly);
            }
        }
    }

    if let Some(idx) = pending {
        r.group("Pending message");
        r.message(&ctx.messages[idx], true, opts.show_readonly);
        // Anything the host placed after the pending message still gets shown.
        if opts.include_history && idx + 1 < ctx.messages.len() {
            r.group("After pending");
            for msg in &ctx.messages[idx + 1..] {
                r.message(msg, false, opts.show_readonly);
            }
        }
    }

    Document {
        text: r.out,
        nonce: r.nonce,
        sections: r.sections,
    }
}

// ─── Parsing ───

/// Result of reading the edited document back.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedDocument {
    /// The file was emptied: send the request unchanged.
    Empty,
    Sections {
        /// Section index -> edited body.
        bodies: BTreeMap<usize, String>,
        /// Markers pointing at sections that were never rendered.
        unknown: Vec<usize>,
        /// Marker lines of this document still present, groups included.
        markers: usize,
    },
}

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*ctx:([0-9a-f]+)\s+(?:(\d+)\s+([a-z]+)|(group))\s*-->\s*$")
        .expect("marker regex")
});

enum Line<'a> {
    Content(&'a str),
    Group,
    Section { index: usize, kind: &'a str },
}

fn classify<'a>(line: &'a str, nonce: &str) -> Result<Line<'a>, DocumentError> {
    let tag = format!("ctx:{nonce}");
    if !line.contains(&tag) {
        return Ok(Line::Content(line));
    }
    let Some(caps) = MARKER.captures(line) else {
        return Err(DocumentError::MalformedMarker(line.trim().to_string()));
    };
    if caps.get(1).map(|m| m.as_str()) != Some(nonce) {
        return Ok(Line::Content(line));
    }
    if caps.get(4).is_some() {
        return Ok(Line::Group);
    }
    let index = caps[2]
        .parse::<usize>()
        .map_err(|_| DocumentError::MalformedMarker(line.trim().to_string()))?;
    let kind = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
    Ok(Line::Section { index, kind })
}

/// Trim blank lines at both ends, keep everything in between verbatim.
fn trim_blank_lines(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].join("\n"),
        _ => String::new(),
    }
}

/// Parse an edited document produced by [`render`].
pub fn parse(text: &str, doc: &Document) -> Result<ParsedDocument, DocumentError> {
    if text.trim().is_empty() {
        return Ok(ParsedDocument::Empty);
    }

    let mut bodies = BTreeMap::new();
    let mut unknown = Vec::new();
    let mut current: Option<usize> = None;
    let mut buf: Vec<&str> = Vec::new();

    let mut flush = |current: Option<usize>, buf: &mut Vec<&str>| {
        if let Some(index) = current {
            bodies.insert(index, trim_blank_lines(buf));
        }
        buf.clear();
    };

    let mut seen = std::collections::HashSet::new();
    let mut markers = 0;
    for line in text.lines() {
        let line = classify(line, &doc.nonce)?;
        if !matches!(line, Line::Content(_)) {
            markers += 1;
        }
        match line {
            Line::Content(l) => buf.push(l),
            Line::Group => {
                flush(current, &mut buf);
                current = None;
            }
            Line::Section { index, kind } => {
                flush(current, &mut buf);
                if !seen.insert(index) {
                    return Err(DocumentError::DuplicateSection(index));
                }
                match doc.sections.get(index) {
                    Some(section) if section.key.kind() != kind => {
                        return Err(DocumentError::KindMismatch {
                            index,
                            expected: section.key.kind(),
                            found: kind.to_string(),
                        });
                    }
                    Some(_) => current = Some(index),
                    None => {
                        unknown.push(index);
                        current = None;
                    }
                }
            }
        }
    }
    flush(current, &mut buf);

    Ok(ParsedDocument::Sections {
        bodies,
        unknown,
        markers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PartKind;

    fn sample() -> RequestContext {
        let mut assistant = Message::assistant("m2", "Sure, reading it.");
        assistant.parts.push(Part {
            id: "m2.p1".into(),
            kind: PartKind::ToolCall,
            content: "cat ```weird``` file".into(),
            tool: Some("bash".into()),
            synthetic: false,
            extra: Default::default(),
        });
        RequestContext {
            session_id: "ses_1".into(),
            model: Some("test-model".into()),
            system: vec!["You are terse.".into(), "Project rules.".into()],
            messages: vec![
                Message::user("m1", "Read main.rs"),
                assistant,
                Message::user("m3", "Now fix it\n\nplease"),
            ],
            ..Default::default()
        }
    }

    fn keys(doc: &Document) -> Vec<SectionKey> {
        doc.sections.iter().map(|s| s.key.clone()).collect()
    }

    // ── render ──

    #[test]
    fn render_orders_system_history_pending() {
        let doc = render(&sample(), None, &RenderOptions::default());
        assert_eq!(
            keys(&doc),
            vec![
                SectionKey::System(0),
                SectionKey::System(1),
                SectionKey::Text {
                    message: "m1".into(),
                    part: "m1.p0".into()
                },
                SectionKey::Text {
                    message: "m2".into(),
                    part: "m2.p0".into()
                },
                SectionKey::Readonly {
                    message: "m2".into(),
                    part: "m2.p1".into()
                },
                SectionKey::Pending {
                    message: "m3".into(),
                    part: "m3.p0".into()
                },
            ]
        );
        assert!(doc.text.contains("# Pending message"));
        assert!(doc.text.contains("model test-model"));
        assert!(doc.text.contains(&format!("<!-- ctx:{} 5 pending -->", doc.nonce)));
    }

    #[test]
    fn readonly_fence_outgrows_content_backticks() {
        let doc = render(&sample(), None, &RenderOptions::default());
        assert!(doc.text.contains("````bash\ncat ```weird``` file\n````"));
    }

    #[test]
    fn history_limit_and_toggles() {
        let opts = RenderOptions {
            include_system: false,
            history_limit: Some(1),
            show_readonly: false,
            ..Default::default()
        };
        let doc = render(&sample(), None, &opts);
        assert_eq!(
            keys(&doc),
            vec![
                SectionKey::Text {
                    message: "m2".into(),
                    part: "m2.p0".into()
                },
                SectionKey::Pending {
                    message: "m3".into(),
                    part: "m3.p0".into()
                },
            ]
        );
        assert!(!doc.text.contains("# System prompt"));
    }

    #[test]
    fn captured_pending_id_wins() {
        let opts = RenderOptions {
            include_history: false,
            ..Default::default()
        };
        let doc = render(&sample(), Some("m1"), &opts);
        assert_eq!(
            keys(&doc)[2],
            SectionKey::Pending {
                message: "m1".into(),
                part: "m1.p0".into()
            }
        );
        assert_eq!(doc.sections.len(), 3);
    }

    #[test]
    fn messages_after_pending_get_their_own_group() {
        let doc = render(&sample(), Some("m1"), &RenderOptions::default());
        let pending = doc.text.find("# Pending message").unwrap();
        let after = doc.text.find("# After pending").unwrap();
        assert!(pending < after);
        assert!(!doc.text.contains("# Conversation"));
        assert_eq!(
            keys(&doc)[3],
            SectionKey::Text {
                message: "m2".into(),
                part: "m2.p0".into()
            }
        );
        // m3 is not the pending message here, so it renders as history text.
        assert_eq!(
            keys(&doc)[5],
            SectionKey::Text {
                message: "m3".into(),
                part: "m3.p0".into()
            }
        );
        assert!(doc.text[after..].contains("Now fix it"));
    }

    // ── parse ──

    #[test]
    fn unedited_document_parses_to_originals() {
        let doc = render(&sample(), None, &RenderOptions::default());
        let ParsedDocument::Sections { bodies, unknown, .. } = parse(&doc.text, &doc).unwrap() else {
            panic!("expected sections");
        };
        assert!(unknown.is_empty());
        assert_eq!(bodies.len(), doc.sections.len());
        for (i, section) in doc.sections.iter().enumerate() {
            if section.key.is_editable() {
                assert_eq!(bodies[&i], section.original);
            }
        }
    }

    #[test]
    fn empty_file_is_cancel() {
        let doc = render(&sample(), None, &RenderOptions::default());
        assert_eq!(parse("  \n\n", &doc).unwrap(), ParsedDocument::Empty);
    }

    #[test]
    fn foreign_nonce_is_plain_content() {
        let doc = render(&sample(), None, &RenderOptions::default());
        let edited = doc.text.replace(
            "Read main.rs",
            "Read main.rs\n## Fake <!-- ctx:deadbeef 0 system -->",
        );
        let ParsedDocument::Sections { bodies, .. } = parse(&edited, &doc).unwrap() else {
            panic!("expected sections");
        };
        assert_eq!(
            bodies[&2],
            "Read main.rs\n## Fake <!-- ctx:deadbeef 0 system -->"
        );
    }

    #[test]
    fn duplicate_marker_is_rejected() {
        let doc = render(&sample(), None, &RenderOptions::default());
        let dup = format!("\n## again <!-- ctx:{} 0 system -->\nx\n", doc.nonce);
        let edited = format!("{}{dup}", doc.text);
        assert!(matches!(
            parse(&edited, &doc),
            Err(DocumentError::DuplicateSection(0))
        ));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let doc = render(&sample(), None, &RenderOptions::default());
        let edited = doc.text.replace(
            &format!("ctx:{} 0 system", doc.nonce),
            &format!("ctx:{} 0 pending", doc.nonce),
        );
        assert!(matches!(
            parse(&edited, &doc),
            Err(DocumentError::KindMismatch { index: 0, .. })
        ));
    }

    #[test]
    fn mangled_marker_is_malformed() {
        let doc = render(&sample(), None, &RenderOptions::default());
        let edited = doc.text.replace(
            &format!("<!-- ctx:{} 1 system -->", doc.nonce),
            &format!("<!-- ctx:{} one system", doc.nonce),
        );
        assert!(matches!(
            parse(&edited, &doc),
            Err(DocumentError::MalformedMarker(_))
        ));
    }

    #[test]
    fn unknown_index_is_reported() {
        let doc = render(&sample(), None, &RenderOptions::default());
        let edited = format!("{}\n## x <!-- ctx:{} 99 text -->\nnew\n", doc.text, doc.nonce);
        let ParsedDocument::Sections { unknown, .. } = parse(&edited, &doc).unwrap() else {
            panic!("expected sections");
        };
        assert_eq!(unknown, vec![99]);
    }

    #[test]
    fn group_markers_count_as_markers() {
        let doc = render(&sample(), None, &RenderOptions::default());
        let groups_only: String = doc
            .text
            .lines()
            .filter(|l| l.contains(&format!("ctx:{} group", doc.nonce)))
            .map(|l| format!("{l}\n"))
            .collect();
        let ParsedDocument::Sections {
            bodies, markers, ..
        } = parse(&groups_only, &doc).unwrap()
        else {
            panic!("expected sections");
        };
        assert!(bodies.is_empty());
        assert_eq!(markers, 3);

        let ParsedDocument::Sections { markers, .. } = parse("plain prose", &doc).unwrap() else {
            panic!("expected sections");
        };
        assert_eq!(markers, 0);
    }
}

mod protocol;

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ctxedit_core::document::{self, RenderOptions};
use ctxedit_core::*;

#[derive(Parser)]
#[command(name = "ctxedit", version, about = "Edit LLM request context in $EDITOR before it is sent")]
struct Args {
    /// Editor command (overrides config, $VISUAL and $EDITOR)
    #[arg(long, global = true)]
    editor: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Handle one hook call: JSON envelope on stdin, JSON reply on stdout
    Hook,
    /// Print the markdown document for a request context JSON file
    Render {
        /// Request context JSON, or "-" for stdin
        #[arg(default_value = "-")]
        input: String,
        /// Id of the message to show as pending
        #[arg(long)]
        pending: Option<String>,
    },
    /// Open a request context JSON file in the editor and print the result
    Edit {
        /// Request context JSON, or "-" for stdin
        #[arg(default_value = "-")]
        input: String,
        /// Id of the message to show as pending
        #[arg(long)]
        pending: Option<String>,
        /// Write the result back to the input file
        #[arg(long)]
        in_place: bool,
        /// Print a diff of the document to stderr
        #[arg(long)]
        diff: bool,
    },
    /// Show the effective configuration
    Config {
        /// Write the default config file if none exists
        #[arg(long)]
        init: bool,
        /// Only print the config file locations
        #[arg(long)]
        path: bool,
    },
}

/// Logs go to ~/.ctxedit/ctxedit.log: the editor owns the terminal and
/// stdout carries the hook protocol.
fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter = || EnvFilter::try_from_env("CTXEDIT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    match open_log_file() {
        Ok(log_file) => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(log_file)
            .with_ansi(false)
            .init(),
        // A read-only home must not cost the host its hook reply.
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .init();
            tracing::warn!("file logging disabled: {e:#}");
        }
    }
}

fn open_log_file() -> anyhow::Result<std::fs::File> {
    let global = EditorConfig::global_path();
    let log_dir = global.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create {}", log_dir.display()))?;
    let path = log_dir.join("ctxedit.log");
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))
}

fn read_input(input: &str) -> anyhow::Result<String> {
    if input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("failed to read {input}"))
    }
}

fn read_context(input: &str) -> anyhow::Result<RequestContext> {
    let data = read_input(input)?;
    serde_json::from_str(&data).with_context(|| format!("invalid request context in {input}"))
}

fn load_config(editor: Option<String>) -> anyhow::Result<EditorConfig> {
    let mut config = EditorConfig::load()?;
    if editor.is_some() {
        config.editor = editor;
    }
    Ok(config)
}

/// A broken config must not block the request: fall back to defaults.
fn hook_config(loaded: anyhow::Result<EditorConfig>, editor: Option<String>) -> EditorConfig {
    loaded.unwrap_or_else(|e| {
        tracing::warn!("config error, using defaults: {e:#}");
        EditorConfig {
            editor,
            ..Default::default()
        }
    })
}

/// Answer one raw envelope. Never fails: errors become `ok: false`.
async fn hook_reply(plugin: ContextEditor, input: &str) -> protocol::Response {
    let reply = match serde_json::from_str::<protocol::Envelope>(input) {
        Ok(envelope) => protocol::handle(Arc::new(plugin), envelope)
            .await
            .unwrap_or_else(|e| protocol::Response::failure(format!("{e:#}"))),
        Err(e) => protocol::Response::failure(format!("invalid hook envelope: {e}")),
    };
    if let Some(error) = &reply.error {
        tracing::warn!("hook call failed: {error}");
    }
    reply
}

async fn run_hook(config: EditorConfig) -> anyhow::Result<()> {
    let reply = match read_input("-") {
        Ok(data) => hook_reply(ContextEditor::new(config), &data).await,
        Err(e) => protocol::Response::failure(format!("{e:#}")),
    };
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &reply)?;
    stdout.write_all(b"\n")?;
    Ok(())
}

fn render_context(plugin: &ContextEditor, input: &str, pending: Option<&str>) -> anyhow::Result<String> {
    let ctx = read_context(input)?;
    let doc = document::render(&ctx, pending, &RenderOptions::from(plugin.config()));
    Ok(doc.text)
}

/// Human summary of an edit for stderr.
fn edit_report(summary: Option<&EditSummary>, diff: bool) -> String {
    match summary {
        None => "nothing to edit\n".to_string(),
        Some(s) if s.cancelled => "empty document: context unchanged\n".to_string(),
        Some(s) => {
            let mut out = format!("{} edited, {} deleted, {} ignored\n", s.edited, s.deleted, s.ignored);
            if diff {
                out.push_str(&s.diff);
            }
            out
        }
    }
}

/// Run the round trip on a context file. Returns the resulting context
/// JSON, or `None` when it was written back in place.
async fn run_edit(
    plugin: &ContextEditor,
    input: &str,
    pending: Option<&str>,
    in_place: bool,
    diff: bool,
) -> anyhow::Result<Option<String>> {
    if in_place && input == "-" {
        anyhow::bail!("--in-place needs a file, not stdin");
    }
    let mut ctx = read_context(input)?;
    let summary = plugin.edit(&mut ctx, pending, None).await?;
    eprint!("{}", edit_report(summary.as_ref(), diff));

    let out = serde_json::to_string_pretty(&ctx)?;
    if in_place {
        std::fs::write(Path::new(input), format!("{out}\n"))
            .with_context(|| format!("failed to write {input}"))?;
        Ok(None)
    } else {
        Ok(Some(out))
    }
}

fn run_config(plugin: &ContextEditor, init: bool, path_only: bool) -> anyhow::Result<()> {
    if init {
        let (path, created) = EditorConfig::init()?;
        if created {
            eprintln!("wrote {}", path.display());
        } else {
            eprintln!("{} already exists", path.display());
        }
    }
    let cwd = std::env::current_dir()?;
    let project = ctxedit_core::config::find_project_file(&cwd);
    if path_only {
        println!("{}", EditorConfig::global_path().display());
        if let Some(p) = project {
            println!("{}", p.display());
        }
        return Ok(());
    }
    eprintln!("global:  {}", EditorConfig::global_path().display());
    match project {
        Some(p) => eprintln!("project: {}", p.display()),
        None => eprintln!("project: (none)"),
    }
    eprintln!("editor:  {}", plugin.editor().as_str());
    println!("{}", serde_json::to_string_pretty(plugin.config())?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    match args.command {
        Command::Hook => {
            let loaded = load_config(args.editor.clone());
            run_hook(hook_config(loaded, args.editor)).await
        }
        Command::Render { input, pending } => {
            let plugin = ContextEditor::new(load_config(args.editor)?);
            print!("{}", render_context(&plugin, &input, pending.as_deref())?);
            Ok(())
        }
        Command::Edit {
            input,
            pending,
            in_place,
            diff,
        } => {
            let plugin = ContextEditor::new(load_config(args.editor)?);
            if let Some(out) = run_edit(&plugin, &input, pending.as_deref(), in_place, diff).await? {
                println!("{out}");
            }
            Ok(())
        }
        Command::Config { init, path } => {
            let plugin = ContextEditor::new(load_config(args.editor)?);
            run_config(&plugin, init, path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn plugin(cmd: &str, dir: &TempDir) -> ContextEditor {
        let config = EditorConfig {
            require_tty: false,
            temp_dir: Some(dir.path().join("docs")),
            ..Default::default()
        };
        ContextEditor::with_editor(config, EditorCommand::new(cmd))
    }

    fn write_context(dir: &TempDir) -> String {
        let ctx = RequestContext {
            session_id: "ses_1".into(),
            system: vec!["Be terse.".into()],
            messages: vec![Message::user("m1", "send the draft")],
            ..Default::default()
        };
        let path = dir.path().join("ctx.json");
        std::fs::write(&path, serde_json::to_string(&ctx).unwrap()).unwrap();
        path.to_string_lossy().into_owned()
    }

    // ── hook ──

    #[test]
    fn hook_config_falls_back_to_defaults() {
        let config = hook_config(Err(anyhow::anyhow!("bad file")), Some("nano".into()));
        assert_eq!(config.editor.as_deref(), Some("nano"));
        assert_eq!(
            EditorConfig {
                editor: None,
                ..config
            },
            EditorConfig::default()
        );

        let loaded = EditorConfig {
            allow_delete: false,
            ..Default::default()
        };
        assert_eq!(hook_config(Ok(loaded.clone()), None), loaded);
    }

    #[tokio::test]
    async fn unreadable_envelope_is_a_failure_reply() {
        let dir = TempDir::new().unwrap();
        let reply = hook_reply(plugin("true", &dir), "{not json").await;
        assert!(!reply.ok);
        assert!(reply.payload.is_none());
        assert!(reply.error.unwrap().contains("invalid hook envelope"));
    }

    #[tokio::test]
    async fn payload_of_wrong_shape_is_a_failure_reply() {
        let dir = TempDir::new().unwrap();
        let reply = hook_reply(
            plugin("true", &dir),
            r#"{"hook": "chat_params", "payload": {"model": 3}}"#,
        )
        .await;
        assert!(!reply.ok);
    }

    // ── render ──

    #[test]
    fn render_prints_marked_sections() {
        let dir = TempDir::new().unwrap();
        let input = write_context(&dir);
        let text = render_context(&plugin("true", &dir), &input, None).unwrap();
        assert!(text.contains("# System prompt"));
        assert!(text.contains("Be terse."));
        assert!(text.contains("# Pending message"));
        assert!(text.contains("send the draft"));
        assert!(text.contains(" 1 pending -->"));
    }

    #[test]
    fn render_rejects_invalid_context() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "[]").unwrap();
        let err = render_context(&plugin("true", &dir), &path.to_string_lossy(), None).unwrap_err();
        assert!(format!("{err:#}").contains("invalid request context"));
    }

    // ── edit ──

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn edit_in_place_rewrites_the_file() {
        let dir = TempDir::new().unwrap();
        let input = write_context(&dir);
        let out = run_edit(
            &plugin("sed -i.bak 's/draft/final/'", &dir),
            &input,
            None,
            true,
            true,
        )
        .await
        .unwrap();
        assert!(out.is_none());
        let ctx: RequestContext =
            serde_json::from_str(&std::fs::read_to_string(&input).unwrap()).unwrap();
        assert_eq!(ctx.messages[0].text(), "send the final");
        assert_eq!(ctx.system, vec!["Be terse.".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn edit_prints_result_and_leaves_input() {
        let dir = TempDir::new().unwrap();
        let input = write_context(&dir);
        let before = std::fs::read_to_string(&input).unwrap();
        let out = run_edit(
            &plugin("sed -i.bak 's/Be terse./Be kind./'", &dir),
            &input,
            None,
            false,
            false,
        )
        .await
        .unwrap()
        .unwrap();
        let ctx: RequestContext = serde_json::from_str(&out).unwrap();
        assert_eq!(ctx.system, vec!["Be kind.".to_string()]);
        assert_eq!(std::fs::read_to_string(&input).unwrap(), before);
    }

    #[tokio::test]
    async fn in_place_needs_a_file() {
        let dir = TempDir::new().unwrap();
        let err = run_edit(&plugin("true", &dir), "-", None, true, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--in-place"));
    }

    #[test]
    fn report_includes_diff_only_when_asked() {
        let summary = EditSummary {
            edited: 1,
            diff: "--- rendered\n+++ edited\n-old\n+new\n".into(),
            ..Default::default()
        };
        let quiet = edit_report(Some(&summary), false);
        assert_eq!(quiet, "1 edited, 0 deleted, 0 ignored\n");
        let loud = edit_report(Some(&summary), true);
        assert!(loud.starts_with(&quiet));
        assert!(loud.contains("+new"));

        let cancelled = EditSummary {
            cancelled: true,
            ..Default::default()
        };
        assert!(edit_report(Some(&cancelled), true).contains("unchanged"));
        assert_eq!(edit_report(None, true), "nothing to edit\n");
    }
}

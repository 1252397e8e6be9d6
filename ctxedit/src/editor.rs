use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start editor `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("editor `{command}` exited with {status}")]
    Exited { command: String, status: ExitStatus },
    #[error("editor task panicked or was cancelled")]
    Join,
}

/// Where the temp document lives and whether it survives the round trip.
#[derive(Clone, Debug, Default)]
pub struct TempOptions {
    pub dir: Option<PathBuf>,
    pub keep: bool,
}

/// An editor invocation, run through `sh -c` so commands with arguments
/// (`code --wait`, `emacsclient -t`) work like they do for git.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditorCommand {
    command: String,
}

impl EditorCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// First non-empty of: the configured command, $CTXEDIT_EDITOR,
    /// $VISUAL, $EDITOR, then `vi`.
    pub fn resolve(configured: Option<&str>) -> Self {
        Self::resolve_with(configured, |key| std::env::var(key).ok())
    }

    pub fn resolve_with(configured: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Self {
        let command = configured
            .map(str::to_string)
            .into_iter()
            .chain(
                ["CTXEDIT_EDITOR", "VISUAL", "EDITOR"]
                    .into_iter()
                    .filter_map(|k| env(k)),
            )
            .find(|c| !c.trim().is_empty())
            .unwrap_or_else(|| "vi".to_string());
        Self { command }
    }

    pub fn as_str(&self) -> &str {
        &self.command
    }

    /// Open `path` and block until the editor exits.
    pub fn open(&self, path: &Path) -> Result<(), EditorError> {
        tracing::info!("opening {} with `{}`", path.display(), self.command);
        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c")
            .arg(format!("{} \"$1\"", self.command))
            .arg("ctxedit")
            .arg(path);
        attach_stdio(&mut cmd, std::io::stdin().is_terminal(), controlling_tty);
        let status = cmd
            .status()
            .map_err(|source| EditorError::Spawn {
                command: self.command.clone(),
                source,
            })?;
        if !status.success() {
            return Err(EditorError::Exited {
                command: self.command.clone(),
                status,
            });
        }
        Ok(())
    }

    /// Write `text` to a temp markdown file, let the user edit it, and
    /// return what was saved.
    pub fn round_trip(&self, text: &str, temp: &TempOptions) -> Result<String, EditorError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ctxedit-").suffix(".md");
        let file = match &temp.dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };
        std::fs::write(file.path(), text)?;

        let started = std::time::Instant::now();
        let result = self
            .open(file.path())
            .and_then(|()| std::fs::read_to_string(file.path()).map_err(EditorError::from));
        tracing::debug!(
            "editor closed after {:.1}s",
            started.elapsed().as_secs_f64()
        );

        if temp.keep {
            match file.keep() {
                Ok((_, path)) => tracing::info!("kept context document at {}", path.display()),
                Err(e) => tracing::warn!("failed to keep context document: {e}"),
            }
        }
        result
    }

    /// [`round_trip`](Self::round_trip) on a blocking thread, for async hooks.
    pub async fn round_trip_blocking(
        &self,
        text: String,
        temp: TempOptions,
    ) -> Result<String, EditorError> {
        let editor = self.clone();
        tokio::task::spawn_blocking(move || editor.round_trip(&text, &temp))
            .await
            .map_err(|_| EditorError::Join)?
    }
}

/// Hook mode pipes JSON through stdin and stdout; give the editor the
/// terminal, or keep it off the protocol stream when there is none.
fn attach_stdio(
    cmd: &mut std::process::Command,
    stdin_is_terminal: bool,
    tty: impl FnOnce() -> Option<(Stdio, Stdio)>,
) {
    if stdin_is_terminal {
        return;
    }
    match tty() {
        Some((input, output)) => {
            cmd.stdin(input).stdout(output);
        }
        None => {
            tracing::debug!("no terminal for the editor, sending its output to stderr");
            cmd.stdin(Stdio::null()).stdout(Stdio::from(std::io::stderr()));
        }
    }
}

/// Whether an editor started now could talk to a person.
pub fn terminal_available() -> bool {
    std::io::stdin().is_terminal() || controlling_tty().is_some()
}

#[cfg(unix)]
fn controlling_tty() -> Option<(Stdio, Stdio)> {
    let open = || {
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/tty")
            .ok()
    };
    Some((Stdio::from(open()?), Stdio::from(open()?)))
}

#[cfg(not(unix))]
fn controlling_tty() -> Option<(Stdio, Stdio)> {
    None
}

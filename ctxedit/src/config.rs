use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Project-level override file, looked up from the working directory upwards.
pub const PROJECT_FILE: &str = ".ctxedit.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Plugin settings. Every field has a default so partial files are fine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub enabled: bool,
    /// Editor command; falls back to $CTXEDIT_EDITOR, $VISUAL, $EDITOR, vi.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    pub include_system: bool,
    pub include_history: bool,
    /// Only the last N history messages are rendered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,
    pub show_readonly: bool,
    pub allow_delete: bool,
    pub keep_file: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    pub require_tty: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            editor: None,
            include_system: true,
            include_history: true,
            history_limit: None,
            show_readonly: true,
            allow_delete: true,
            keep_file: false,
            temp_dir: None,
            require_tty: true,
        }
    }
}

impl EditorConfig {
    /// ~/.ctxedit/config.json
    pub fn global_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".ctxedit").join("config.json")
    }

    /// Load defaults, then the global file, then the nearest project file,
    /// then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::load_from(&Self::global_path(), &cwd, |key| std::env::var(key).ok())
    }

    pub fn load_from(
        global: &Path,
        cwd: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut merged = serde_json::to_value(Self::default())?;
        let layers = [Some(global.to_path_buf()), find_project_file(cwd)];
        for path in layers.into_iter().flatten() {
            if let Some(layer) = read_layer(&path)? {
                merge(&mut merged, layer);
            }
        }
        let mut config: Self = serde_json::from_value(merged)?;
        config.apply_env(env);
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("CTXEDIT_ENABLED") {
            self.enabled = !matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off" | "no"
            );
        }
        if let Some(editor) = env("CTXEDIT_EDITOR").filter(|e| !e.trim().is_empty()) {
            self.editor = Some(editor);
        }
    }

    /// Save to the global config file.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::global_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Write the defaults to the global file unless one already exists.
    /// Returns the path and whether a file was created.
    pub fn init() -> Result<(PathBuf, bool), ConfigError> {
        let path = Self::global_path();
        if path.exists() {
            return Ok((path, false));
        }
        Self::default().save_to(&path)?;
        Ok((path, true))
    }
}

/// Nearest project file, walking from `cwd` up through its ancestors.
pub fn find_project_file(cwd: &Path) -> Option<PathBuf> {
    cwd.ancestors()
        .map(|dir| dir.join(PROJECT_FILE))
        .find(|p| p.is_file())
}

fn read_layer(path: &Path) -> Result<Option<serde_json::Value>, ConfigError> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if data.trim().is_empty() {
        return Ok(None);
    }
    let value: serde_json::Value =
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    if !value.is_object() {
        return Err(ConfigError::Parse {
            path: path.to_path_buf(),
            source: serde::de::Error::custom("expected a JSON object"),
        });
    }
    // Type errors are reported against this file, not the merged result.
    EditorConfig::deserialize(&value).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!("loaded config layer {}", path.display());
    Ok(Some(value))
}

/// Shallow merge: keys in `layer` replace keys in `base`.
fn merge(base: &mut serde_json::Value, layer: serde_json::Value) {
    if let (Some(base), serde_json::Value::Object(layer)) = (base.as_object_mut(), layer) {
        for (key, value) in layer {
            base.insert(key, value);
        }
    }
}

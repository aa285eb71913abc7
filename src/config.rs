//! Configuration management for live_code_search
//!
//! Supports loading configuration from TOML files, environment overrides and CLI
//! overrides. The resulting `Config` is built once at startup and handed to the
//! components by value.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Shortest accepted poll interval.
pub const MIN_INTERVAL_SECS: f64 = 0.2;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub indexer: IndexerConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

/// Change detection backend used by the watcher loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchBackend {
    /// Periodic walk + fingerprint diff
    #[default]
    Poll,
    /// OS notifications, verified against fingerprints
    Notify,
}

/// Watcher / indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Turns the background watcher/indexer loop on or off
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Watcher poll period in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,

    /// Directories to index (empty means the current directory)
    #[serde(default)]
    pub roots: Vec<String>,

    /// Globs a root-relative path must match (empty means all files)
    #[serde(default)]
    pub include_globs: Vec<String>,

    /// Globs that exclude a root-relative path
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,

    /// Maximum file size to index in bytes (default 10MB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default)]
    pub backend: WatchBackend,

    /// Detect and transcode non-UTF-8 text files (default: true)
    #[serde(default = "default_true")]
    pub transcode_non_utf8: bool,
}

/// Query defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Result cap applied when a query sets no explicit limit
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> f64 {
    1.0
}

fn default_exclude_globs() -> Vec<String> {
    vec![
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
        "**/.git/**".to_string(),
        "**/build/**".to_string(),
        "**/dist/**".to_string(),
        "**/__pycache__/**".to_string(),
        "**/venv/**".to_string(),
        "**/.venv/**".to_string(),
    ]
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_max_results() -> usize {
    100
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            roots: Vec::new(),
            include_globs: Vec::new(),
            exclude_globs: default_exclude_globs(),
            max_file_size: default_max_file_size(),
            backend: WatchBackend::default(),
            transcode_non_utf8: true,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
        }
    }
}

impl IndexerConfig {
    /// Poll period, never shorter than [`MIN_INTERVAL_SECS`].
    pub fn interval(&self) -> Duration {
        let secs = if self.interval_secs.is_finite() {
            self.interval_secs.max(MIN_INTERVAL_SECS)
        } else {
            default_interval_secs()
        };
        Duration::from_secs_f64(secs)
    }

    /// Configured roots, or the current directory when none are set.
    pub fn root_paths(&self) -> Vec<PathBuf> {
        if self.roots.is_empty() {
            vec![std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))]
        } else {
            self.roots.iter().map(PathBuf::from).collect()
        }
    }

    /// Apply `LCS_*` environment variable overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, get: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = get("LCS_INDEXER_ENABLED") {
            self.enabled = parse_flag(&val);
        }
        if let Some(val) = get("LCS_INDEXER_INTERVAL") {
            match val.trim().parse::<f64>() {
                Ok(secs) => self.interval_secs = secs,
                Err(_) => tracing::warn!(value = %val, "Ignoring invalid LCS_INDEXER_INTERVAL"),
            }
        }
        if let Some(val) = get("LCS_ROOTS") {
            self.roots = split_list(&val);
        }
        if let Some(val) = get("LCS_INCLUDE_GLOBS") {
            self.include_globs = split_list(&val);
        }
        if let Some(val) = get("LCS_EXCLUDE_GLOBS") {
            self.exclude_globs = split_list(&val);
        }
        self
    }
}

/// `1`, `true`, `yes` and `on` (any case) enable; everything else disables.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Split a comma or semicolon separated list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load config from default locations
    /// Returns None if no config file is found
    pub fn from_default_locations() -> Result<Option<(Self, PathBuf)>> {
        if let Ok(env_path) = std::env::var("LCS_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                let config = Self::from_file(&path)?;
                return Ok(Some((config, path)));
            }
        }

        let local_path = PathBuf::from("live_code_search.toml");
        if local_path.exists() {
            let config = Self::from_file(&local_path)?;
            return Ok(Some((config, local_path)));
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_path = config_dir.join("live_code_search").join("config.toml");
            if user_path.exists() {
                let config = Self::from_file(&user_path)?;
                return Ok(Some((config, user_path)));
            }
        }

        Ok(None)
    }

    /// Generate a template configuration file
    pub fn generate_template() -> String {
        r#"# live_code_search configuration

[indexer]
# Run the background watcher/indexer loop (env: LCS_INDEXER_ENABLED)
enabled = true

# Poll period in seconds, minimum 0.2 (env: LCS_INDEXER_INTERVAL)
interval_secs = 1.0

# Directories to index; empty means the current directory (env: LCS_ROOTS)
roots = [
    # "/home/user/projects/my-app",
]

# Root-relative globs a file must match; empty means all files (env: LCS_INCLUDE_GLOBS)
# include_globs = ["src/**/*.rs", "**/*.{js,ts}"]

# Root-relative globs that exclude a file (env: LCS_EXCLUDE_GLOBS)
exclude_globs = [
    "**/node_modules/**",
    "**/target/**",
    "**/.git/**",
    "**/build/**",
    "**/dist/**",
    "**/__pycache__/**",
    "**/venv/**",
    "**/.venv/**",
]

# Maximum file size to index in bytes (default: 10MB)
max_file_size = 10485760

# Change detection: "poll" (portable) or "notify" (OS notifications)
backend = "poll"

# Transcode non-UTF-8 text files before tokenizing
transcode_non_utf8 = true

[search]
# Result cap when a query sets no limit
max_results = 100
"#
        .to_string()
    }

    /// Write template config to the specified path
    pub fn write_template(path: &Path) -> Result<()> {
        let template = Self::generate_template();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
            }
        }

        std::fs::write(path, template)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Apply environment overrides, then CLI overrides.
    pub fn with_overrides(mut self, extra_roots: Vec<String>) -> Self {
        self.indexer = self.indexer.with_env_overrides();
        self.indexer.roots.extend(extra_roots);
        self
    }
}

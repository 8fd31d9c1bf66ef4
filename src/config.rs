//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$EMLX2MBOX_CONFIG` (environment variable)
//! 2. `~/.config/emlx2mbox/config.toml` (Linux)
//!    `~/Library/Application Support/emlx2mbox/config.toml` (macOS)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Source tree discovery.
    pub discovery: DiscoveryConfig,
    /// Output archive settings.
    pub archive: ArchiveConfig,
    /// Performance tuning.
    pub performance: PerformanceConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Source tree discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// File extension of message files, matched case-insensitively.
    pub extension: String,
    /// Directories whose name starts with this prefix (case-insensitive)
    /// are not descended into.
    pub skip_dir_prefix: String,
    /// Follow symbolic links while walking the tree.
    pub follow_symlinks: bool,
}

/// Output archive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Envelope address used when the `From:` header is missing or empty.
    pub sentinel_address: String,
    /// Also hold a `<archive>.lock` dot-lock file while writing.
    pub dotlock: bool,
    /// Sync file data to disk after every appended message.
    pub fsync: bool,
}

/// Performance tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Maximum message size in bytes (default: 268435456 = 256 MB).
    pub max_message_size: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            extension: "emlx".to_string(),
            skip_dir_prefix: "attachments".to_string(),
            follow_symlinks: false,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            sentinel_address: "MAILER-DAEMON".to_string(),
            dotlock: true,
            fsync: false,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_message_size: 256 * 1024 * 1024, // 256 MB
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("EMLX2MBOX_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("emlx2mbox").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("emlx2mbox")
}

//! Configuration file parser for bear.toml.
//!
//! The config file is optional; a missing or empty file yields
//! `Config::default()`. Unknown sections are accepted but logged as a
//! warning since they are usually typos.
use crate::extension::ExtensionConfig;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Written by `bear init`.
pub const DEFAULT_CONFIG: &str = r#"[settings]
db_path = "bear.db"
# Extensions run in this order.
extensions = []

[email]
from = "bear@localhost"
to = []
host = "localhost"
port = 25
tls = false
user = ""
# pass = ""

# [extension.guesser]
# allow_private = "false"

# [extension.summarize]
# max_width = "280"

# [extension.template]
# subject = "{feed.title}: {entry.title}"
# template_file = "entry.html"
"#;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All sections use `#[serde(default)]` so any subset of keys can be given.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub settings: Settings,
    pub email: EmailConfig,

    /// Per-extension option tables, keyed by extension name.
    pub extension: HashMap<String, ExtensionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database path, or `:memory:`.
    pub db_path: String,

    /// Extension names, loaded in this order.
    pub extensions: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: "bear.db".to_string(),
            extensions: Vec::new(),
        }
    }
}

/// SMTP settings and the default envelope.
///
/// The password is held as a `SecretString` so it never shows up in Debug
/// output.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub from: String,
    pub to: Vec<String>,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub user: String,
    pub pass: Option<SecretString>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from: "bear@localhost".to_string(),
            to: Vec::new(),
            host: "localhost".to_string(),
            port: 25,
            tls: false,
            user: String::new(),
            pass: None,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_SECTIONS: [&'static str; 3] = ["settings", "email", "extension"];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown top-level keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            extensions = config.settings.extensions.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_SECTIONS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        Ok(toml::from_str(content)?)
    }

    /// Write the default configuration to `path` unless a file is already
    /// there. Returns whether a file was written.
    pub fn write_default(path: &Path) -> Result<bool, ConfigError> {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path);
        match file {
            Ok(mut file) => {
                use std::io::Write;
                file.write_all(DEFAULT_CONFIG.as_bytes())?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Environment-driven configuration shared by the ledger and pollers.
//!
//! Values resolve in three layers: built-in defaults, then environment
//! variables, then explicit overrides applied by the caller (CLI flags).
//! Lookups go through a closure so tests never touch the process environment.

use std::path::PathBuf;

use thiserror::Error;

/// Default item ceiling for a ledger.
pub const DEFAULT_LEDGER_MAX_ITEMS: usize = 50_000;

/// Environment prefix for ledger settings.
const LEDGER_ENV_PREFIX: &str = "NEWSWATCH";

/// File name of the persistent ledger inside its directory.
pub const LEDGER_FILE_NAME: &str = "ledger.db";

/// Configuration errors. Fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set to a value that does not parse.
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        /// Variable or flag name.
        key: String,
        /// Offending raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A component name cannot be used for a named ledger.
    #[error("invalid ledger name '{0}': use letters, digits, '-' or '_'")]
    InvalidLedgerName(String),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Reads a variable from the process environment, treating empty as unset.
pub(crate) fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parses a boolean flag. Accepts `1/true/yes/y` and `0/false/no/n`.
pub(crate) fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(true),
        "0" | "false" | "no" | "n" => Ok(false),
        _ => Err(ConfigError::invalid(key, raw, "expected true/false")),
    }
}

/// Parses a finite, non-negative float.
pub(crate) fn parse_non_negative_f64(key: &str, raw: &str) -> Result<f64, ConfigError> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| ConfigError::invalid(key, raw, "expected a number"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::invalid(key, raw, "expected a non-negative number"));
    }
    Ok(value)
}

/// Parses a non-negative integer.
pub(crate) fn parse_u64(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::invalid(key, raw, "expected a non-negative integer"))
}

fn default_ledger_dir(lookup: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    lookup("HOME").map_or_else(
        || PathBuf::from(".newswatch"),
        |home| PathBuf::from(home).join(".newswatch"),
    )
}

/// Upper-cases a component name for use in an environment variable.
fn env_suffix(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Settings for a deduplication ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Directory holding `ledger.db`.
    pub dir: PathBuf,
    /// Item ceiling; `None` means unbounded.
    pub max_items: Option<usize>,
    /// Optional ceiling on the summed size of keys and values, in bytes.
    pub size_limit_bytes: Option<u64>,
    /// Persist to disk; `false` selects the in-memory ledger.
    pub persistent: bool,
    /// Drop all entries when the ledger is opened.
    pub clear_on_start: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".newswatch"),
            max_items: Some(DEFAULT_LEDGER_MAX_ITEMS),
            size_limit_bytes: None,
            persistent: true,
            clear_on_start: false,
        }
    }
}

impl LedgerConfig {
    /// Resolves the ledger configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to a malformed value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    /// Resolves the ledger configuration through `lookup`.
    ///
    /// Reads `NEWSWATCH_LEDGER_DIR`, `NEWSWATCH_LEDGER_MAX_ITEMS` (0 means
    /// unbounded), `NEWSWATCH_LEDGER_SIZE_LIMIT`, `NEWSWATCH_NO_LEDGER` and
    /// `NEWSWATCH_CLEAR_LEDGER`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to a malformed value.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self {
            dir: default_ledger_dir(lookup),
            ..Self::default()
        };

        let key = format!("{LEDGER_ENV_PREFIX}_LEDGER_DIR");
        if let Some(dir) = lookup(&key) {
            config.dir = PathBuf::from(dir);
        }

        let key = format!("{LEDGER_ENV_PREFIX}_LEDGER_MAX_ITEMS");
        if let Some(raw) = lookup(&key) {
            let value = parse_u64(&key, &raw)?;
            config.max_items = if value == 0 {
                None
            } else {
                Some(
                    usize::try_from(value)
                        .map_err(|_| ConfigError::invalid(&key, &raw, "value too large"))?,
                )
            };
        }

        let key = format!("{LEDGER_ENV_PREFIX}_LEDGER_SIZE_LIMIT");
        if let Some(raw) = lookup(&key) {
            let value = parse_u64(&key, &raw)?;
            config.size_limit_bytes = (value > 0).then_some(value);
        }

        let key = format!("{LEDGER_ENV_PREFIX}_NO_LEDGER");
        if let Some(raw) = lookup(&key) {
            config.persistent = !parse_bool(&key, &raw)?;
        }

        let key = format!("{LEDGER_ENV_PREFIX}_CLEAR_LEDGER");
        if let Some(raw) = lookup(&key) {
            config.clear_on_start = parse_bool(&key, &raw)?;
        }

        Ok(config)
    }

    /// Derives the configuration of a component's own ledger.
    ///
    /// The named ledger lives in a sub-directory and also honors
    /// `NEWSWATCH_CLEAR_LEDGER_<NAME>`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an unusable name or a malformed flag.
    pub fn named(
        &self,
        name: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::InvalidLedgerName(name.to_string()));
        }

        let mut config = self.clone();
        config.dir = self.dir.join(name);

        let key = format!("{LEDGER_ENV_PREFIX}_CLEAR_LEDGER_{}", env_suffix(name));
        if let Some(raw) = lookup(&key) {
            config.clear_on_start = config.clear_on_start || parse_bool(&key, &raw)?;
        }
        Ok(config)
    }

    /// Overrides the ledger directory.
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Overrides persistence.
    #[must_use]
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Overrides clear-on-start.
    #[must_use]
    pub fn with_clear_on_start(mut self, clear: bool) -> Self {
        self.clear_on_start = clear;
        self
    }

    /// Overrides the item ceiling.
    #[must_use]
    pub fn with_max_items(mut self, max_items: Option<usize>) -> Self {
        self.max_items = max_items;
        self
    }

    /// Overrides the byte ceiling.
    #[must_use]
    pub fn with_size_limit(mut self, size_limit_bytes: Option<u64>) -> Self {
        self.size_limit_bytes = size_limit_bytes;
        self
    }

    /// Path of the database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE_NAME)
    }
}

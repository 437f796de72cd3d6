//! # Ingest Configuration
//!
//! Runtime knobs for a decode run. Defaults suit a desktop machine; every
//! field can be overridden from the environment or a JSON document.
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `CHATEX_CHUNK_SIZE` | `chunk_size` | 1 MiB |
//! | `CHATEX_TZ_OFFSET_MINUTES` | `timezone_offset_minutes` | UTC |
//! | `CHATEX_MEDIA_WORKERS` | `media_workers` | 4 |
//! | `CHATEX_PARALLEL_SOURCES` | `max_parallel_sources` | 2 |
//! | `CHATEX_APP` | `app` | `standard` |
//! | `CHATEX_MAX_DECRYPTED_BYTES` | `max_decrypted_bytes` | 16 GiB |
//! | `CHATEX_VERBOSE` | `verbose_logging` | off |

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default ciphertext read size (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default ceiling on the plaintext one container may inflate to (16 GiB)
pub const DEFAULT_MAX_DECRYPTED_BYTES: u64 = 16 << 30;

/// Default number of concurrent media copies
pub const DEFAULT_MEDIA_WORKERS: usize = 4;

/// Default number of backup sources decoded at once in a batch
pub const DEFAULT_PARALLEL_SOURCES: usize = 2;

/// Largest accepted timezone offset, in minutes (±18h)
const MAX_OFFSET_MINUTES: i32 = 18 * 60;

/// Which flavour of the messaging app produced the backup
///
/// Only matters for iOS, where the two apps use different app-group
/// domains and therefore different content-hash identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppVariant {
    /// The consumer app
    #[default]
    Standard,
    /// The business app
    Business,
}

impl AppVariant {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" | "" => Ok(Self::Standard),
            "business" | "smb" => Ok(Self::Business),
            other => Err(Error::InvalidConfig(format!("unknown app variant '{}'", other))),
        }
    }
}

/// Configuration for one ingest run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Ciphertext read size for whole-container decryption
    pub chunk_size: usize,

    /// Decrypted output beyond this many bytes fails the source
    pub max_decrypted_bytes: u64,

    /// Offset applied to every message timestamp; `None` keeps UTC
    pub timezone_offset_minutes: Option<i32>,

    /// Concurrent media copy workers
    pub media_workers: usize,

    /// Concurrent backup sources in a batch run
    pub max_parallel_sources: usize,

    /// App flavour (selects iOS identifiers)
    pub app: AppVariant,

    /// Copy resolved media here after extraction, if set
    pub copy_media_to: Option<PathBuf>,

    /// Debug-level logging for this crate, applied when the one-shot
    /// entry points install the global subscriber
    pub verbose_logging: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_decrypted_bytes: DEFAULT_MAX_DECRYPTED_BYTES,
            timezone_offset_minutes: None,
            media_workers: DEFAULT_MEDIA_WORKERS,
            max_parallel_sources: DEFAULT_PARALLEL_SOURCES,
            app: AppVariant::Standard,
            copy_media_to: None,
            verbose_logging: false,
        }
    }
}

impl IngestConfig {
    /// Build a config from `CHATEX_*` environment variables
    ///
    /// Unset variables keep their defaults; set-but-unparseable ones are
    /// rejected rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("CHATEX_CHUNK_SIZE") {
            config.chunk_size = parse_number("CHATEX_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("CHATEX_TZ_OFFSET_MINUTES") {
            config.timezone_offset_minutes = Some(parse_number("CHATEX_TZ_OFFSET_MINUTES", &v)?);
        }
        if let Some(v) = lookup("CHATEX_MEDIA_WORKERS") {
            config.media_workers = parse_number("CHATEX_MEDIA_WORKERS", &v)?;
        }
        if let Some(v) = lookup("CHATEX_PARALLEL_SOURCES") {
            config.max_parallel_sources = parse_number("CHATEX_PARALLEL_SOURCES", &v)?;
        }
        if let Some(v) = lookup("CHATEX_APP") {
            config.app = AppVariant::parse(&v)?;
        }
        if let Some(v) = lookup("CHATEX_MAX_DECRYPTED_BYTES") {
            config.max_decrypted_bytes = parse_number("CHATEX_MAX_DECRYPTED_BYTES", &v)?;
        }
        if let Some(v) = lookup("CHATEX_VERBOSE") {
            config.verbose_logging = parse_flag("CHATEX_VERBOSE", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration document; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or misbehave at runtime
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be non-zero".into()));
        }
        if self.max_decrypted_bytes == 0 {
            return Err(Error::InvalidConfig("max_decrypted_bytes must be non-zero".into()));
        }
        if self.media_workers == 0 {
            return Err(Error::InvalidConfig("media_workers must be non-zero".into()));
        }
        if self.max_parallel_sources == 0 {
            return Err(Error::InvalidConfig("max_parallel_sources must be non-zero".into()));
        }
        if let Some(offset) = self.timezone_offset_minutes {
            if offset.abs() > MAX_OFFSET_MINUTES {
                return Err(Error::InvalidConfig(format!(
                    "timezone offset {} minutes is outside ±18h",
                    offset
                )));
            }
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{} is not a valid number: '{}'", name, value)))
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::InvalidConfig(format!("{} is not a valid flag: '{}'", name, value))),
    }
}

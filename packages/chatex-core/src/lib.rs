//! # Chatex Core
//!
//! Reads chat backups produced by a mobile messenger on Android and iOS and
//! turns them into one normalized, serializable chat model.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         CHATEX CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │   Crypto    │  │  Manifest   │  │    Plist    │  │    Schema    │   │
//! │  │             │  │             │  │             │  │              │   │
//! │  │ - Detect    │  │ - Files     │  │ - bplist00  │  │ - Catalog    │   │
//! │  │ - KDF       │  │ - Props     │  │ - Keyed     │  │ - Families   │   │
//! │  │ - AES-GCM   │  │ - Content   │  │   archives  │  │ - Features   │   │
//! │  └──────┬──────┘  └──────┬──────┘  └─────────────┘  └──────┬───────┘   │
//! │         │                │                                 │           │
//! │         └────────────────┴────────────┬────────────────────┘           │
//! │                                       ▼                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │   Extract   │─►│  Normalize  │─►│    Model    │◄─│   Pipeline   │   │
//! │  │ (raw rows)  │  │ (+ media)   │  │ (chats)     │  │ (batch, mpsc)│   │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └──────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types and stable error kinds
//! - [`crypto`] - Encrypted Android containers (generations 12, 14, 15)
//! - [`plist`] - Binary property list decoding
//! - [`manifest`] - iOS backup `Manifest.db` / `Manifest.plist`
//! - [`schema`] - Schema probing against known database layouts
//! - [`extract`] - Raw row extraction per schema family
//! - [`normalize`] - Raw rows to the canonical model
//! - [`media`] - Media path resolution and the copy pool
//! - [`pipeline`] - Per-source pipeline and parallel batches
//! - [`diagnostics`] - Warnings, errors and the run report
//!
//! ## Quick Start
//!
//! ```no_run
//! use chatex_core::{ingest_source, BackupSource, IngestConfig, KeyMaterial};
//! use std::path::Path;
//!
//! let key = KeyMaterial::from_path(Path::new("key")).unwrap();
//! let source = BackupSource::detect(Path::new("msgstore.db.crypt14"), Some(key)).unwrap();
//! let report = ingest_source(source, IngestConfig::default()).unwrap();
//! for line in report.summary_lines() {
//!     println!("{}", line);
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod crypto;
pub mod diagnostics;
pub mod error;
pub mod extract;
pub mod logging;
pub mod manifest;
pub mod media;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod plist;
pub mod progress;
pub mod schema;
/// Timestamp conversion for both platforms.
pub mod time;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::{AppVariant, IngestConfig};
pub use crypto::{FormatGeneration, KeyMaterial};
pub use diagnostics::{Diagnostic, IngestReport, RunStatus, SourceReport, SourceStatus};
pub use error::{Error, ErrorKind, Result};
pub use model::{
    CallDetails, CallOutcome, Chat, ChatCollection, Collapsed, MediaRef, Message, MessageKind,
    MessageStatus, Platform,
};
pub use pipeline::{ingest_batch, ingest_source, BackupSource, Ingestor, SourceOutcome};
pub use progress::{CancelToken, NoProgress, Progress, ProgressSink, Stage};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Chatex Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns build information for debugging
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        target: std::env::consts::OS,
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
        sqlite: rusqlite::version(),
    }
}

/// Build information for debugging
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
    /// Target operating system
    pub target: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
    /// Version of the bundled SQLite
    pub sqlite: &'static str,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = build_info();
        assert_eq!(info.version, version());
        assert!(info.sqlite.starts_with('3'));
    }
}

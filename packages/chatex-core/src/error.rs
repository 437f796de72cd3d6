//! # Error Handling
//!
//! Error types for the whole ingestion core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Format & Key Errors                                               │
//! │  │   ├── UnsupportedFormat     - Unrecognized container header         │
//! │  │   ├── MalformedKeyMaterial  - Key blob wrong length/shape           │
//! │  │   └── EmptyBackup           - Header present, no ciphertext         │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── AuthenticationError   - AEAD tag mismatch (wrong key/tamper)  │
//! │  │   ├── NotADatabase          - Verified plaintext is not SQLite      │
//! │  │   └── CorruptBackup         - Verified payload fails to inflate     │
//! │  │                                                                      │
//! │  ├── Plist Errors                                                      │
//! │  │   └── CorruptPlist          - Malformed bplist00 container          │
//! │  │                                                                      │
//! │  ├── Extraction Errors                                                 │
//! │  │   ├── SchemaUnsupported     - No descriptor matches the database    │
//! │  │   └── Database              - SQLite failure                        │
//! │  │                                                                      │
//! │  ├── Media Errors                                                      │
//! │  │   └── MissingMedia          - Reference without a backing file      │
//! │  │                                                                      │
//! │  ├── I/O Errors                                                        │
//! │  │   └── Io                    - Filesystem-level failure              │
//! │  │                                                                      │
//! │  └── Pipeline Errors                                                   │
//! │      ├── Cancelled             - Cancellation observed at a boundary   │
//! │      └── InvalidConfig         - Rejected configuration value          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      ERROR PROPAGATION FLOW                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Fatal for the source             Recorded, processing continues       │
//! │  ─────────────────────            ──────────────────────────────        │
//! │  AuthenticationError              SchemaUnsupported (contacts db)      │
//! │  CorruptPlist (backup plists)     MissingMedia                         │
//! │  UnsupportedFormat                Unsupported message type/status      │
//! │  MalformedKeyMaterial             CorruptPlist (one manifest entry)    │
//! │  SchemaUnsupported (message db)   Call history or contacts unreadable  │
//! │                                   Duplicate message across sources     │
//! │                                                                         │
//! │  A fatal error drops everything the source produced; the batch run     │
//! │  keeps going with the remaining sources.                               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the ingestion core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Format & Key Errors (100-199)
    // ========================================================================

    /// Container header (or backup layout) is not one we can decode
    #[error("Unsupported backup format: {0}")]
    UnsupportedFormat(String),

    /// Key file/string/blob has the wrong length or shape
    #[error("Malformed key material: {0}")]
    MalformedKeyMaterial(String),

    /// Container carries a header but no ciphertext
    #[error("Backup contains no data after its header")]
    EmptyBackup,

    // ========================================================================
    // Crypto Errors (200-299)
    // ========================================================================

    /// AEAD tag mismatch
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// Verified plaintext is not a SQLite database
    #[error("Decrypted data is not a SQLite database")]
    NotADatabase,

    /// Verified payload could not be inflated
    #[error("Corrupt backup payload: {0}")]
    CorruptBackup(String),

    // ========================================================================
    // Plist Errors (300-399)
    // ========================================================================

    /// Malformed binary property list
    #[error("Corrupt binary plist: {0}")]
    CorruptPlist(String),

    // ========================================================================
    // Extraction Errors (400-499)
    // ========================================================================

    /// No schema descriptor matched the database catalog
    #[error("Unsupported database schema in {database}: {detail}")]
    SchemaUnsupported {
        /// Which database was inspected
        database: String,
        /// What was missing
        detail: String,
    },

    /// SQLite error
    #[error("Database error: {0}")]
    Database(String),

    // ========================================================================
    // Media Errors (500-599)
    // ========================================================================

    /// Media reference without a backing file
    #[error("Missing media: {0}")]
    MissingMedia(String),

    // ========================================================================
    // I/O Errors (600-699)
    // ========================================================================

    /// Filesystem-level failure
    #[error("I/O error: {0}")]
    Io(String),

    // ========================================================================
    // Pipeline Errors (700-799)
    // ========================================================================

    /// Cancellation was requested
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration value rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse error category carried by diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unrecognized container or backup layout
    UnsupportedFormat,
    /// Key material of the wrong shape
    MalformedKeyMaterial,
    /// Header-only container
    EmptyBackup,
    /// AEAD verification failure
    AuthenticationError,
    /// Verified plaintext is not SQLite
    NotADatabase,
    /// Verified payload is structurally broken
    CorruptBackup,
    /// Malformed binary plist
    CorruptPlist,
    /// No schema descriptor matched
    SchemaUnsupported,
    /// SQLite failure
    Database,
    /// Media without a backing file
    MissingMedia,
    /// Message type or status code outside the lookup tables
    UnsupportedMessageType,
    /// Identical message seen in more than one source
    DuplicateMessage,
    /// Filesystem failure
    Io,
    /// Cancellation
    Cancelled,
    /// Configuration rejected
    InvalidConfig,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Stable snake_case name, as used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat => "unsupported_format",
            Self::MalformedKeyMaterial => "malformed_key_material",
            Self::EmptyBackup => "empty_backup",
            Self::AuthenticationError => "authentication_error",
            Self::NotADatabase => "not_a_database",
            Self::CorruptBackup => "corrupt_backup",
            Self::CorruptPlist => "corrupt_plist",
            Self::SchemaUnsupported => "schema_unsupported",
            Self::Database => "database",
            Self::MissingMedia => "missing_media",
            Self::UnsupportedMessageType => "unsupported_message_type",
            Self::DuplicateMessage => "duplicate_message",
            Self::Io => "io",
            Self::Cancelled => "cancelled",
            Self::InvalidConfig => "invalid_config",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Format & key material
    /// - 200-299: Crypto
    /// - 300-399: Plist
    /// - 400-499: Extraction
    /// - 500-599: Media
    /// - 600-699: I/O
    /// - 700-799: Pipeline
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Format & key (100-199)
            Error::UnsupportedFormat(_) => 100,
            Error::MalformedKeyMaterial(_) => 101,
            Error::EmptyBackup => 102,

            // Crypto (200-299)
            Error::AuthenticationError(_) => 200,
            Error::NotADatabase => 201,
            Error::CorruptBackup(_) => 202,

            // Plist (300-399)
            Error::CorruptPlist(_) => 300,

            // Extraction (400-499)
            Error::SchemaUnsupported { .. } => 400,
            Error::Database(_) => 401,

            // Media (500-599)
            Error::MissingMedia(_) => 500,

            // I/O (600-699)
            Error::Io(_) => 600,

            // Pipeline (700-799)
            Error::Cancelled => 700,
            Error::InvalidConfig(_) => 701,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::Serialization(_) => 901,
        }
    }

    /// Diagnostic category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Error::MalformedKeyMaterial(_) => ErrorKind::MalformedKeyMaterial,
            Error::EmptyBackup => ErrorKind::EmptyBackup,
            Error::AuthenticationError(_) => ErrorKind::AuthenticationError,
            Error::NotADatabase => ErrorKind::NotADatabase,
            Error::CorruptBackup(_) => ErrorKind::CorruptBackup,
            Error::CorruptPlist(_) => ErrorKind::CorruptPlist,
            Error::SchemaUnsupported { .. } => ErrorKind::SchemaUnsupported,
            Error::Database(_) => ErrorKind::Database,
            Error::MissingMedia(_) => ErrorKind::MissingMedia,
            Error::Io(_) => ErrorKind::Io,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::Internal(_) | Error::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error aborts the decode of the backup source it came from
    ///
    /// Non-fatal errors are recorded as diagnostics and the source still
    /// produces best-effort output.
    pub fn is_fatal_for_source(&self) -> bool {
        !matches!(self, Error::MissingMedia(_))
    }

    /// Message suitable for the end-of-run report
    pub fn user_message(&self) -> String {
        match self {
            Error::AuthenticationError(_) => {
                "Backup integrity check failed: likely wrong key or corrupted backup. \
                 Check that the key file belongs to this backup."
                    .to_string()
            }
            Error::MalformedKeyMaterial(detail) => format!(
                "The key could not be read ({}). Expected a 158-byte key file, \
                 a 64-character hex key or an exported key blob.",
                detail
            ),
            Error::EmptyBackup => "The backup contains no messages.".to_string(),
            Error::Io(detail) => format!("File system problem: {}", detail),
            other => other.to_string(),
        }
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

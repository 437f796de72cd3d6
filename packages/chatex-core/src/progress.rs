//! Progress reporting and cooperative cancellation.
//!
//! Long-running stages call [`ProgressSink::report`] at chunk, frame or row
//! granularity and poll a [`CancelToken`] at the same boundaries. Sinks must
//! not block: they run on the decoding thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, Result};

/// Pipeline stage a progress event or diagnostic belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Source and container format detection
    Detect,
    /// Key material parsing and key derivation
    KeyDerivation,
    /// Authenticated decryption
    Decrypt,
    /// Property-list and manifest decoding
    Manifest,
    /// Schema probing and row extraction
    Extract,
    /// Row normalization and media resolution
    Normalize,
    /// Merging sources into one collection
    Merge,
    /// Media copying
    Media,
}

impl Stage {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Detect => "detect",
            Stage::KeyDerivation => "key_derivation",
            Stage::Decrypt => "decrypt",
            Stage::Manifest => "manifest",
            Stage::Extract => "extract",
            Stage::Normalize => "normalize",
            Stage::Merge => "merge",
            Stage::Media => "media",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Stage reporting
    pub stage: Stage,
    /// Units done (bytes, frames or rows depending on stage)
    pub done: u64,
    /// Units expected, when known
    pub total: Option<u64>,
}

/// Receiver of progress events
pub trait ProgressSink: Send + Sync {
    /// Called at every chunk/frame/row boundary. Must return promptly.
    fn report(&self, progress: Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn report(&self, progress: Progress) {
        self(progress)
    }
}

/// A sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: Progress) {}
}

/// Shared cancellation flag
///
/// Cloning shares the flag; cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an un-cancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

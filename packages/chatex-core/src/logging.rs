//! Logging setup and redaction helpers.
//!
//! Key material and message bodies never reach a log line verbatim; wrap
//! them in [`Redacted`] or [`RedactedBytes`] before handing them to a
//! `tracing` macro.

use std::fmt;

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence. Without it, `verbose` (or the
/// `verbose-logging` feature) selects debug output for this crate.
/// Calling this more than once is harmless; later calls are no-ops.
pub fn init(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose))),
        )
        .with_target(false)
        .try_init();
}

/// Filter used when `RUST_LOG` is unset
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose || cfg!(feature = "verbose-logging") {
        "chatex_core=debug"
    } else {
        "chatex_core=info"
    }
}

/// A wrapper that redacts sensitive data when displayed.
pub struct Redacted<T>(pub T);

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Redact a byte slice, showing only its length.
pub struct RedactedBytes<'a>(pub &'a [u8]);

impl fmt::Display for RedactedBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes]", self.0.len())
    }
}

impl fmt::Debug for RedactedBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Redact a chat identifier, keeping only the server part and last digits.
///
/// `15551234567@s.whatsapp.net` renders as `…4567@s.whatsapp.net`.
pub struct RedactedJid<'a>(pub &'a str);

impl fmt::Display for RedactedJid<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (user, server) = match self.0.split_once('@') {
            Some((user, server)) => (user, Some(server)),
            None => (self.0, None),
        };
        let tail: String = {
            let chars: Vec<char> = user.chars().collect();
            let start = chars.len().saturating_sub(4);
            chars[start..].iter().collect()
        };
        match server {
            Some(server) => write!(f, "…{}@{}", tail, server),
            None => write!(f, "…{}", tail),
        }
    }
}

impl fmt::Debug for RedactedJid<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

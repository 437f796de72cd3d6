//! Structured warnings and the per-run report.
//!
//! Every non-fatal problem becomes a [`Diagnostic`] tagged with the source it
//! came from and the stage that found it. A failed source contributes a
//! single fatal diagnostic and nothing else.

use serde::Serialize;

use crate::crypto::FormatGeneration;
use crate::error::{Error, ErrorKind};
use crate::model::ChatCollection;
use crate::progress::Stage;

/// One warning or error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Source identifier (usually the input path)
    pub source: String,
    /// Stage that recorded it
    pub stage: Stage,
    /// Taxonomy kind
    pub kind: ErrorKind,
    /// Human-readable detail
    pub detail: String,
    /// Whether it aborted the source
    pub fatal: bool,
}

impl Diagnostic {
    /// Non-fatal warning
    pub fn warning(source: &str, stage: Stage, kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::warn!(source, stage = %stage, kind = %kind, "{}", detail);
        Self {
            source: source.to_string(),
            stage,
            kind,
            detail,
            fatal: false,
        }
    }

    /// Diagnostic for an error; fatality follows the error's own policy
    pub fn from_error(source: &str, stage: Stage, error: &Error) -> Self {
        let fatal = error.is_fatal_for_source();
        let detail = error.user_message();
        if fatal {
            tracing::error!(source, stage = %stage, code = error.code(), "{}", detail);
        } else {
            tracing::warn!(source, stage = %stage, code = error.code(), "{}", detail);
        }
        Self {
            source: source.to_string(),
            stage,
            kind: error.kind(),
            detail,
            fatal,
        }
    }
}

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every source decoded without warnings
    Success,
    /// Output produced, with warnings or some failed sources
    PartialSuccess,
    /// No source produced output
    Failure,
}

/// How one source ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Decoded; may still carry warnings
    Completed,
    /// Aborted; contributed no chats
    Failed,
}

/// Per-source summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    /// Source identifier
    pub source: String,
    /// Outcome
    pub status: SourceStatus,
    /// Container generation, for encrypted Android sources
    pub generation: Option<FormatGeneration>,
    /// Chats produced
    pub chats: usize,
    /// Messages produced
    pub messages: usize,
    /// Warnings recorded
    pub warnings: usize,
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    /// Merged chats of every completed source
    pub chats: ChatCollection,
    /// All diagnostics in source order
    pub diagnostics: Vec<Diagnostic>,
    /// Per-source summaries in input order
    pub sources: Vec<SourceReport>,
    /// Overall status
    pub status: RunStatus,
}

impl IngestReport {
    /// Assemble a report and derive its status
    pub fn new(chats: ChatCollection, diagnostics: Vec<Diagnostic>, sources: Vec<SourceReport>) -> Self {
        let status = run_status(&sources, &diagnostics);
        Self {
            chats,
            diagnostics,
            sources,
            status,
        }
    }

    /// Non-fatal diagnostics
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.fatal)
    }

    /// Fatal diagnostics
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.fatal)
    }

    /// One line per source plus one per diagnostic, for a CLI summary
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.sources.len() + self.diagnostics.len() + 1);
        lines.push(format!(
            "{}: {} chats, {} messages",
            match self.status {
                RunStatus::Success => "success",
                RunStatus::PartialSuccess => "partial success",
                RunStatus::Failure => "failure",
            },
            self.chats.len(),
            self.chats.message_count()
        ));
        for source in &self.sources {
            lines.push(match source.status {
                SourceStatus::Completed => format!(
                    "  {}: {} chats, {} messages, {} warnings",
                    source.source, source.chats, source.messages, source.warnings
                ),
                SourceStatus::Failed => format!("  {}: failed", source.source),
            });
        }
        for diagnostic in &self.diagnostics {
            lines.push(format!(
                "  [{}] {} ({}): {}",
                if diagnostic.fatal { "error" } else { "warning" },
                diagnostic.source,
                diagnostic.stage,
                diagnostic.detail
            ));
        }
        lines
    }
}

fn run_status(sources: &[SourceReport], diagnostics: &[Diagnostic]) -> RunStatus {
    let completed = sources
        .iter()
        .filter(|s| s.status == SourceStatus::Completed)
        .count();

    if completed == 0 {
        RunStatus::Failure
    } else if completed < sources.len() || !diagnostics.is_empty() {
        RunStatus::PartialSuccess
    } else {
        RunStatus::Success
    }
}

//! Error types for trace ingestion and analysis.
//!
//! Errors fall into three classes:
//!
//! - **Parse errors**: a malformed trace line. Fatal for the file being read;
//!   the error locates the offending line.
//! - **Position-lookup failures**: a trace identifier that does not round-trip
//!   to `file:line@pre`. These are *not* errors of this type — detectors log
//!   them via `tracing::warn!` and skip the affected record.
//! - **Invariant violations**: internal state that must not occur on a
//!   well-formed trace (e.g. a release without a matching hold). Fatal; the
//!   invariant id is surfaced in the message.
//!
//! Analysis is a pure function of the input trace; no error is retried.

use std::io;
use thiserror::Error;

/// Errors produced while reading a trace or running the analysis.
#[derive(Debug, Error)]
pub enum HindsightError {
    /// A trace line could not be parsed.
    #[error("malformed trace line {file}:{line_no}: {reason}")]
    Parse {
        /// The trace file containing the bad line.
        file: String,
        /// 1-based line number within the file.
        line_no: usize,
        /// What was wrong with the line.
        reason: String,
    },

    /// An internal invariant was violated. This indicates a malformed trace
    /// or an engine bug; the run is aborted.
    #[error("internal invariant violated: {id}")]
    Invariant {
        /// Stable identifier of the violated invariant.
        id: &'static str,
    },

    /// An I/O error while reading trace files.
    #[error("i/o error reading {path}: {source}")]
    Io {
        /// The path being read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl HindsightError {
    /// Shorthand for an invariant violation.
    #[must_use]
    pub const fn invariant(id: &'static str) -> Self {
        Self::Invariant { id }
    }
}

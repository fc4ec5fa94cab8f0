//! hindsight — post-mortem concurrency analyzer.
//!
//! hindsight ingests an execution trace recorded by an instrumented
//! runtime (channels, mutexes, wait groups, once-guards, condition
//! variables) and reports:
//!
//! - **actual** bugs observed in the recorded schedule (send on closed
//!   channel, concurrent receives, …),
//! - **possible** bugs a feasible reordering would expose (send/recv on
//!   closed channel, negative wait-group counter, cyclic deadlock),
//! - **leaks**: operations whose post event is missing because a partner
//!   never arrived, with the likely partner attached when one exists.
//!
//! The engine is a single happens-before sweep: events are sorted by their
//! pre timestamp (stuck operations last), per-routine vector clocks are
//! advanced in place, and per-primitive detectors maintain recency indices
//! and leak buckets. A separate resource-deadlock detector mines abstract
//! lock dependencies during the same sweep and searches them for
//! lock-order cycles afterwards.
//!
//! # Usage
//!
//! ```no_run
//! use hindsight::analysis::AnalysisConfig;
//! use hindsight::trace::ReaderConfig;
//! use std::path::Path;
//!
//! let report = hindsight::analyze_dir(
//!     Path::new("recorded_trace"),
//!     &ReaderConfig::new(),
//!     &AnalysisConfig::new(),
//! )?;
//! for record in report.records() {
//!     println!("{record}");
//! }
//! # Ok::<(), hindsight::HindsightError>(())
//! ```
//!
//! The analysis is a pure function of the trace: identical inputs produce
//! identical result sequences. All state lives in per-run values, so
//! several traces can be analyzed in one process independently.

pub mod analysis;
pub mod clock;
pub mod error;
pub mod results;
pub mod trace;
pub mod types;

pub use analysis::{AnalysisConfig, AnalysisOutcome, Analyzer};
pub use clock::{HappensBefore, VectorClock};
pub use error::HindsightError;
pub use results::{AnalysisReport, Participant, ResultKind, ResultRecord, Severity};
pub use trace::{read_trace_dir, ReaderConfig, Trace};
pub use types::{EventId, ObjectId, RoutineId};

use std::path::Path;

/// Reads a trace directory and runs the full analysis.
pub fn analyze_dir(
    path: &Path,
    reader: &ReaderConfig,
    analysis: &AnalysisConfig,
) -> Result<AnalysisReport, HindsightError> {
    let trace = read_trace_dir(path, reader)?;
    let outcome = Analyzer::new(analysis.clone()).analyze(&trace)?;
    Ok(outcome.into_report())
}

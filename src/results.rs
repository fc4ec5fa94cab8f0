//! Result sink: structured findings with severity, kind code, and
//! participants.
//!
//! Every detector reports through [`ResultSink::report`]. Records carry one
//! or two participant lists under role labels (e.g. `"send"` / `"close"`).
//! Duplicate records — same kind, same participants — are suppressed;
//! emission order is preserved so identical inputs produce identical
//! reports. Rendering beyond plain text and JSON is an external concern.

use crate::types::{ObjectId, RoutineId};
use core::fmt;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The bug class crashes or wedges the program.
    Critical,
    /// The bug class is suspicious but survivable.
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => f.write_str("critical"),
            Self::Warning => f.write_str("warning"),
        }
    }
}

/// The fixed catalog of finding kinds.
///
/// Codes are stable: `Axx` for bugs observed in the recorded schedule,
/// `Pxx` for bugs a feasible reordering would expose, `Lxx` for leaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResultKind {
    /// Send on a closed channel was observed.
    SendOnClosed,
    /// Receive on a closed channel was observed.
    RecvOnClosed,
    /// Close of an already-closed channel was observed.
    CloseOnClosed,
    /// Two completed receives on the same channel are concurrent.
    ConcurrentRecv,
    /// A select case has no partner anywhere in the trace.
    SelectCaseWithoutPartner,
    /// A reordering could send on a closed channel.
    PossibleSendOnClosed,
    /// A reordering could receive on a closed channel.
    PossibleRecvOnClosed,
    /// A reordering could drive the wait-group counter negative.
    PossibleNegativeWaitGroup,
    /// A lock-order cycle makes a resource deadlock possible.
    PossibleCyclicDeadlock,
    /// Leak on an unbuffered channel, possible partner found.
    LeakUnbufferedWith,
    /// Leak on an unbuffered channel, no partner.
    LeakUnbufferedWithout,
    /// Leak on a buffered channel, possible partner found.
    LeakBufferedWith,
    /// Leak on a buffered channel, no partner.
    LeakBufferedWithout,
    /// Leak on a nil channel.
    LeakNilChannel,
    /// Leak on a select, possible partner found.
    LeakSelectWith,
    /// Leak on a select, no partner.
    LeakSelectWithout,
    /// Leak on a mutex.
    LeakMutex,
    /// Leak on a wait group.
    LeakWaitGroup,
    /// Leak on a condition variable.
    LeakCond,
    /// A routine never finished although its last operation completed.
    LeakStuckRoutine,
}

impl ResultKind {
    /// The stable kind code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::SendOnClosed => "A01",
            Self::RecvOnClosed => "A02",
            Self::CloseOnClosed => "A03",
            Self::ConcurrentRecv => "A04",
            Self::SelectCaseWithoutPartner => "A05",
            Self::PossibleSendOnClosed => "P01",
            Self::PossibleRecvOnClosed => "P02",
            Self::PossibleNegativeWaitGroup => "P03",
            Self::PossibleCyclicDeadlock => "P04",
            Self::LeakUnbufferedWith => "L01",
            Self::LeakUnbufferedWithout => "L02",
            Self::LeakBufferedWith => "L03",
            Self::LeakBufferedWithout => "L04",
            Self::LeakNilChannel => "L05",
            Self::LeakSelectWith => "L06",
            Self::LeakSelectWithout => "L07",
            Self::LeakMutex => "L08",
            Self::LeakWaitGroup => "L09",
            Self::LeakCond => "L10",
            Self::LeakStuckRoutine => "LWithoutBlock",
        }
    }

    /// The severity this kind is reported with.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::SendOnClosed
            | Self::CloseOnClosed
            | Self::PossibleSendOnClosed
            | Self::PossibleNegativeWaitGroup
            | Self::PossibleCyclicDeadlock
            | Self::LeakUnbufferedWith
            | Self::LeakUnbufferedWithout
            | Self::LeakBufferedWith
            | Self::LeakBufferedWithout
            | Self::LeakNilChannel
            | Self::LeakSelectWith
            | Self::LeakSelectWithout
            | Self::LeakMutex
            | Self::LeakWaitGroup
            | Self::LeakCond
            | Self::LeakStuckRoutine => Severity::Critical,
            Self::RecvOnClosed
            | Self::ConcurrentRecv
            | Self::SelectCaseWithoutPartner
            | Self::PossibleRecvOnClosed => Severity::Warning,
        }
    }

    /// Human-readable headline for the finding.
    #[must_use]
    pub const fn headline(self) -> &'static str {
        match self {
            Self::SendOnClosed => "Found send on closed channel",
            Self::RecvOnClosed => "Found receive on closed channel",
            Self::CloseOnClosed => "Found close on closed channel",
            Self::ConcurrentRecv => "Found concurrent receive on same channel",
            Self::SelectCaseWithoutPartner => "Found select case without partner",
            Self::PossibleSendOnClosed => "Possible send on closed channel",
            Self::PossibleRecvOnClosed => "Possible receive on closed channel",
            Self::PossibleNegativeWaitGroup => "Possible negative waitgroup counter",
            Self::PossibleCyclicDeadlock => "Possible cyclic deadlock",
            Self::LeakUnbufferedWith => {
                "Leak on unbuffered channel with possible partner"
            }
            Self::LeakUnbufferedWithout => {
                "Leak on unbuffered channel without possible partner"
            }
            Self::LeakBufferedWith => "Leak on buffered channel with possible partner",
            Self::LeakBufferedWithout => {
                "Leak on buffered channel without possible partner"
            }
            Self::LeakNilChannel => "Leak on nil channel",
            Self::LeakSelectWith => "Leak on select with possible partner",
            Self::LeakSelectWithout => "Leak on select without partner",
            Self::LeakMutex => "Leak on mutex",
            Self::LeakWaitGroup => "Leak on wait group",
            Self::LeakCond => "Leak on conditional variable",
            Self::LeakStuckRoutine => "Leak of routine without blocking operation",
        }
    }
}

/// One participant of a finding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Participant {
    /// Routine the participating operation ran on.
    pub routine: RoutineId,
    /// Object the operation targeted (`-1` when not applicable).
    pub object: ObjectId,
    /// Pre timestamp of the operation.
    pub pre: u64,
    /// Two-letter object-type tag (`CS`, `ML`, `DC`, …).
    pub obj_type: &'static str,
    /// Source file of the operation; empty when unknown.
    pub file: String,
    /// Source line; zero when unknown.
    pub line: u32,
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.file, self.line, self.pre)
    }
}

/// One reported finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRecord {
    /// Severity derived from the kind.
    pub severity: Severity,
    /// Finding kind.
    pub kind: ResultKind,
    /// Stable kind code (serialized convenience copy).
    pub code: &'static str,
    /// Role label of the first participant list.
    pub role1: &'static str,
    /// First participant list; never empty.
    pub participants1: Vec<Participant>,
    /// Role label of the second participant list; empty when unused.
    pub role2: &'static str,
    /// Second participant list; may be empty.
    pub participants2: Vec<Participant>,
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}):", self.kind.headline(), self.code)?;
        write!(f, "\n\t{}: ", self.role1)?;
        for (i, p) in self.participants1.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{p}")?;
        }
        if !self.role2.is_empty() {
            write!(f, "\n\t{}: ", self.role2)?;
            if self.participants2.is_empty() {
                write!(f, "-")?;
            }
            for (i, p) in self.participants2.iter().enumerate() {
                if i > 0 {
                    write!(f, ";")?;
                }
                write!(f, "{p}")?;
            }
        }
        Ok(())
    }
}

/// Collects findings, suppressing duplicates, preserving emission order.
#[derive(Debug, Default)]
pub struct ResultSink {
    records: Vec<ResultRecord>,
    seen: HashSet<(ResultKind, Vec<Participant>, Vec<Participant>)>,
}

impl ResultSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports a finding. Duplicates (same kind and participants) are
    /// dropped.
    pub fn report(
        &mut self,
        kind: ResultKind,
        role1: &'static str,
        participants1: Vec<Participant>,
        role2: &'static str,
        participants2: Vec<Participant>,
    ) {
        let key = (kind, participants1.clone(), participants2.clone());
        if !self.seen.insert(key) {
            return;
        }
        debug!(code = kind.code(), "finding reported");
        self.records.push(ResultRecord {
            severity: kind.severity(),
            kind,
            code: kind.code(),
            role1,
            participants1,
            role2,
            participants2,
        });
    }

    /// The findings reported so far, in emission order.
    #[must_use]
    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    /// Consumes the sink into a report.
    #[must_use]
    pub fn into_report(self) -> AnalysisReport {
        AnalysisReport {
            records: self.records,
        }
    }
}

/// The outcome of one analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    records: Vec<ResultRecord>,
}

impl AnalysisReport {
    /// All findings in emission order.
    #[must_use]
    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    /// True if nothing was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of findings of one kind.
    #[must_use]
    pub fn count_of(&self, kind: ResultKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }

    /// Findings of one kind, in emission order.
    pub fn of_kind(&self, kind: ResultKind) -> impl Iterator<Item = &ResultRecord> {
        self.records.iter().filter(move |r| r.kind == kind)
    }

    /// Serializes the report to JSON for machine consumption.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.records {
            writeln!(f, "{record}")?;
        }
        Ok(())
    }
}

//! Trace events and data types.
//!
//! Each event represents one observable synchronization action recorded by
//! the runtime hooks. Events carry a shared envelope (routine, pre/post
//! timestamps, source position) and an operation-specific payload in
//! [`EventBody`]. The tagged union enables exhaustive matching in the
//! analysis; there is no dynamic dispatch on the hot path.
//!
//! `post == 0` marks an operation that never completed (blocked or stuck).

use crate::types::{ObjectId, RoutineId};
use core::fmt;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Source position of an operation, `<file>:<line>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourcePos {
    /// Source file path as recorded.
    pub file: String,
    /// 1-based line number; zero when unknown.
    pub line: u32,
}

impl SourcePos {
    /// Creates a source position.
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// A placeholder for events the recorder does not attribute to a
    /// source location (atomics, routine ends).
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            file: String::new(),
            line: 0,
        }
    }

    /// Parses `"<file>:<line>"`. The line number is the suffix after the
    /// last colon, so Windows-style drive prefixes survive.
    #[must_use]
    pub fn parse(pos: &str) -> Option<Self> {
        let (file, line) = pos.rsplit_once(':')?;
        let line = line.parse().ok()?;
        Some(Self::new(file, line))
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Channel operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelOp {
    /// Send a value.
    Send,
    /// Receive a value.
    Recv,
    /// Close the channel.
    Close,
}

/// A channel operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    /// Channel id; nil channels are at or below zero.
    pub id: ObjectId,
    /// The operation performed.
    pub op: ChannelOp,
    /// True if the operation finished because the channel was closed.
    pub closed: bool,
    /// Id of the matching partner communication, zero if none recorded.
    pub partner: u64,
    /// Buffer capacity; zero means unbuffered.
    pub qsize: u32,
}

impl ChannelEvent {
    /// True if the channel carries a buffer.
    #[must_use]
    pub const fn buffered(&self) -> bool {
        self.qsize > 0
    }
}

/// Direction of a select case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseDir {
    /// The case sends on its channel.
    Send,
    /// The case receives from its channel.
    Recv,
}

/// One case of a select statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectCase {
    /// The channel the case communicates on.
    pub channel: ObjectId,
    /// Direction of the communication.
    pub dir: CaseDir,
    /// True if the channel is buffered.
    pub buffered: bool,
}

/// A select statement over several channel cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectEvent {
    /// Id of the select statement itself.
    pub id: ObjectId,
    /// The cases in source order.
    pub cases: SmallVec<[SelectCase; 4]>,
    /// Index of the chosen case; `-1` when no case fired (default branch
    /// or the select never completed).
    pub chosen: i32,
}

impl SelectEvent {
    /// Returns the chosen case, if a channel case fired.
    #[must_use]
    pub fn chosen_case(&self) -> Option<&SelectCase> {
        usize::try_from(self.chosen)
            .ok()
            .and_then(|i| self.cases.get(i))
    }
}

/// Mutex operation kind. Read variants apply to RW locks only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutexOp {
    /// Blocking write lock.
    Lock,
    /// Blocking read lock.
    RLock,
    /// Non-blocking write lock attempt.
    TryLock,
    /// Non-blocking read lock attempt.
    TryRLock,
    /// Write unlock.
    Unlock,
    /// Read unlock.
    RUnlock,
}

impl MutexOp {
    /// True for operations that acquire the lock (blocking or try).
    #[must_use]
    pub const fn is_acquire(self) -> bool {
        matches!(self, Self::Lock | Self::RLock | Self::TryLock | Self::TryRLock)
    }

    /// True for read-side operations.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::RLock | Self::TryRLock | Self::RUnlock)
    }

    /// True for the non-blocking try variants.
    #[must_use]
    pub const fn is_try(self) -> bool {
        matches!(self, Self::TryLock | Self::TryRLock)
    }
}

/// A mutex operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexEvent {
    /// Mutex id.
    pub id: ObjectId,
    /// True if the object is a reader/writer lock.
    pub rw: bool,
    /// The operation performed.
    pub op: MutexOp,
    /// Whether the operation succeeded; meaningful for try variants only.
    pub success: bool,
}

/// Wait-group operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitOp {
    /// Counter increment (delta may be negative).
    Add,
    /// Counter decrement by one.
    Done,
    /// Block until the counter reaches zero.
    Wait,
}

/// A wait-group operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitEvent {
    /// Wait-group id.
    pub id: ObjectId,
    /// The operation performed.
    pub op: WaitOp,
    /// Delta applied by an add; zero otherwise.
    pub delta: i64,
    /// Counter value after the operation, as recorded.
    pub value: i64,
}

/// A once-guard invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnceEvent {
    /// Once id.
    pub id: ObjectId,
    /// True iff this call executed the guarded function.
    pub success: bool,
}

/// Condition-variable operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondOp {
    /// Block until signalled.
    Wait,
    /// Wake one waiter.
    Signal,
    /// Wake all waiters.
    Broadcast,
}

/// A condition-variable operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondEvent {
    /// Condition-variable id.
    pub id: ObjectId,
    /// The operation performed.
    pub op: CondOp,
}

/// Atomic memory operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicOp {
    /// Atomic load.
    Load,
    /// Atomic store.
    Store,
    /// Atomic read-modify-write.
    Rmw,
}

/// An atomic memory operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicEvent {
    /// Id of the atomic variable.
    pub id: ObjectId,
    /// The operation performed.
    pub op: AtomicOp,
    /// Memory address, as recorded.
    pub addr: u64,
}

/// The operation-specific payload of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBody {
    /// Channel send/recv/close.
    Channel(ChannelEvent),
    /// Select over channel cases.
    Select(SelectEvent),
    /// Mutex lock/unlock (incl. RW and try variants).
    Mutex(MutexEvent),
    /// Wait-group add/done/wait.
    Wait(WaitEvent),
    /// Once-guard invocation.
    Once(OnceEvent),
    /// Condition-variable wait/signal/broadcast.
    Cond(CondEvent),
    /// Spawn of a child routine.
    Fork {
        /// The spawned routine.
        child: RoutineId,
    },
    /// Normal termination of the routine.
    RoutineEnd,
    /// Atomic memory operation.
    Atomic(AtomicEvent),
}

/// One recorded event: envelope plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Routine the event was recorded on.
    pub routine: RoutineId,
    /// Timestamp at the start of the operation.
    pub pre: u64,
    /// Timestamp at the end; zero if the operation never completed.
    pub post: u64,
    /// Source position of the operation.
    pub pos: SourcePos,
    /// Operation payload.
    pub body: EventBody,
}

impl Event {
    /// True if the operation never completed.
    #[must_use]
    pub const fn is_stuck(&self) -> bool {
        self.post == 0
    }

    /// Sort key for the happens-before sweep: stuck events order after
    /// every completed event.
    #[must_use]
    pub const fn sort_key(&self) -> u64 {
        if self.post == 0 {
            u64::MAX
        } else {
            self.pre
        }
    }

    /// The trace identifier `"<file>:<line>@<pre>"` used to locate this
    /// event across passes.
    #[must_use]
    pub fn tid(&self) -> String {
        format!("{}@{}", self.pos, self.pre)
    }

    /// The synchronization object this event operates on, if any.
    #[must_use]
    pub fn object_id(&self) -> Option<ObjectId> {
        match &self.body {
            EventBody::Channel(c) => Some(c.id),
            EventBody::Select(s) => Some(s.id),
            EventBody::Mutex(m) => Some(m.id),
            EventBody::Wait(w) => Some(w.id),
            EventBody::Once(o) => Some(o.id),
            EventBody::Cond(c) => Some(c.id),
            EventBody::Atomic(a) => Some(a.id),
            EventBody::Fork { .. } | EventBody::RoutineEnd => None,
        }
    }

    /// The two-letter participant tag for this event in result records.
    #[must_use]
    pub fn obj_type(&self) -> &'static str {
        match &self.body {
            EventBody::Channel(c) => match c.op {
                ChannelOp::Send => "CS",
                ChannelOp::Recv => "CR",
                ChannelOp::Close => "CC",
            },
            EventBody::Select(_) => "SS",
            EventBody::Mutex(m) => match m.op {
                MutexOp::Lock => "ML",
                MutexOp::RLock => "MR",
                MutexOp::TryLock => "MT",
                MutexOp::TryRLock => "MY",
                MutexOp::Unlock => "MU",
                MutexOp::RUnlock => "MN",
            },
            EventBody::Wait(w) => match w.op {
                WaitOp::Add => "WA",
                WaitOp::Done => "WD",
                WaitOp::Wait => "WW",
            },
            EventBody::Once(o) => {
                if o.success {
                    "OE"
                } else {
                    "ON"
                }
            }
            EventBody::Cond(c) => match c.op {
                CondOp::Wait => "NW",
                CondOp::Signal => "NS",
                CondOp::Broadcast => "NB",
            },
            EventBody::Fork { .. } | EventBody::RoutineEnd => "GE",
            EventBody::Atomic(_) => "AT",
        }
    }
}

/// Splits a trace identifier back into `(file, line, pre)`.
///
/// Returns `None` when the identifier does not round-trip; callers log and
/// skip the affected participant.
#[must_use]
pub fn parse_tid(tid: &str) -> Option<(String, u32, u64)> {
    let (pos, pre) = tid.rsplit_once('@')?;
    let pre = pre.parse().ok()?;
    let pos = SourcePos::parse(pos)?;
    Some((pos.file, pos.line, pre))
}

//! Trace-directory ingestion.
//!
//! A recorded run is a directory of files named `trace_<routine>.log`, one
//! per routine id (starting at 1). Each line is one event; fields are
//! comma-separated and the first field is the event tag. Unknown tags and
//! malformed fields abort the file with an error locating the line.
//!
//! Atomic events can be filtered out with [`ReaderConfig::ignore_atomics`];
//! they are by far the most frequent event kind and only contribute weak
//! happens-before edges.

use crate::error::HindsightError;
use crate::trace::event::{
    AtomicEvent, AtomicOp, CaseDir, ChannelEvent, ChannelOp, CondEvent, CondOp, Event, EventBody,
    MutexEvent, MutexOp, OnceEvent, SelectCase, SelectEvent, SourcePos, WaitEvent, WaitOp,
};
use crate::trace::Trace;
use crate::types::{ObjectId, RoutineId};
use smallvec::SmallVec;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Configuration for trace ingestion.
#[derive(Debug, Clone, Default)]
pub struct ReaderConfig {
    /// Drop atomic events while reading.
    pub ignore_atomics: bool,
}

impl ReaderConfig {
    /// Creates the default configuration (atomics kept).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether atomic events are dropped.
    #[must_use]
    pub const fn with_ignore_atomics(mut self, ignore: bool) -> Self {
        self.ignore_atomics = ignore;
        self
    }
}

/// Reads every `trace_<routine>.log` file in a directory into a [`Trace`].
///
/// Files that do not match the naming scheme (e.g. `times.log`) are
/// skipped. The routine count is the largest routine id seen in a file name
/// or referenced by a fork event.
pub fn read_trace_dir(path: &Path, config: &ReaderConfig) -> Result<Trace, HindsightError> {
    let entries = fs::read_dir(path).map_err(|source| HindsightError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut files: Vec<(u32, std::path::PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| HindsightError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file_path = entry.path();
        if file_path.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        match routine_from_file_name(&name) {
            Some(routine) => files.push((routine, file_path)),
            None => debug!(file = %name, "skipping non-trace file"),
        }
    }
    files.sort_by_key(|(routine, _)| *routine);

    let mut events = Vec::new();
    let mut max_routine = 0;
    for (routine, file_path) in files {
        max_routine = max_routine.max(routine);
        read_trace_file(&file_path, RoutineId::new(routine), config, &mut events)?;
    }

    let trace = Trace::with_routines(events, max_routine as usize);
    info!(
        routines = trace.num_routines(),
        events = trace.len(),
        "trace loaded"
    );
    Ok(trace)
}

/// Reads one routine's trace file, appending its events.
fn read_trace_file(
    path: &Path,
    routine: RoutineId,
    config: &ReaderConfig,
    events: &mut Vec<Event>,
) -> Result<(), HindsightError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    debug!(file = %file_name, %routine, "reading trace file");

    let file = fs::File::open(path).map_err(|source| HindsightError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let reader = BufReader::new(file);
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| HindsightError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let ctx = LineCtx {
            file: &file_name,
            line_no: i + 1,
        };
        if let Some(event) = parse_line(line, routine, &ctx, config)? {
            events.push(event);
        }
    }
    Ok(())
}

/// Extracts the routine id from a `trace_<n>.log` file name.
fn routine_from_file_name(name: &str) -> Option<u32> {
    name.strip_prefix("trace_")?
        .strip_suffix(".log")?
        .parse()
        .ok()
}

/// Error context for one trace line.
struct LineCtx<'a> {
    file: &'a str,
    line_no: usize,
}

impl LineCtx<'_> {
    fn err(&self, reason: impl Into<String>) -> HindsightError {
        HindsightError::Parse {
            file: self.file.to_string(),
            line_no: self.line_no,
            reason: reason.into(),
        }
    }

    fn u64(&self, field: &str, what: &str) -> Result<u64, HindsightError> {
        field
            .parse()
            .map_err(|_| self.err(format!("{what} is not an integer")))
    }

    fn i64(&self, field: &str, what: &str) -> Result<i64, HindsightError> {
        field
            .parse()
            .map_err(|_| self.err(format!("{what} is not an integer")))
    }

    fn u32(&self, field: &str, what: &str) -> Result<u32, HindsightError> {
        field
            .parse()
            .map_err(|_| self.err(format!("{what} is not an integer")))
    }

    fn i32(&self, field: &str, what: &str) -> Result<i32, HindsightError> {
        field
            .parse()
            .map_err(|_| self.err(format!("{what} is not an integer")))
    }

    fn bool(&self, field: &str, what: &str) -> Result<bool, HindsightError> {
        match field {
            "t" | "true" | "1" => Ok(true),
            "f" | "false" | "0" => Ok(false),
            _ => Err(self.err(format!("{what} is not a boolean"))),
        }
    }

    fn pos(&self, field: &str) -> Result<SourcePos, HindsightError> {
        SourcePos::parse(field).ok_or_else(|| self.err("pos is not file:line"))
    }
}

/// Parses one trace line. Returns `None` for filtered events.
fn parse_line(
    line: &str,
    routine: RoutineId,
    ctx: &LineCtx<'_>,
    config: &ReaderConfig,
) -> Result<Option<Event>, HindsightError> {
    let fields: Vec<&str> = line.split(',').collect();
    let tag = fields[0];

    let expect = |n: usize| -> Result<(), HindsightError> {
        if fields.len() == n {
            Ok(())
        } else {
            Err(ctx.err(format!(
                "expected {} fields for tag {tag}, got {}",
                n,
                fields.len()
            )))
        }
    };

    let event = match tag {
        "A" => {
            expect(5)?;
            if config.ignore_atomics {
                return Ok(None);
            }
            let pre = ctx.u64(fields[1], "tpre")?;
            let op = match fields[3] {
                "L" => AtomicOp::Load,
                "S" => AtomicOp::Store,
                "R" => AtomicOp::Rmw,
                other => return Err(ctx.err(format!("unknown atomic op {other:?}"))),
            };
            Event {
                routine,
                pre,
                // Atomics never block; they sort as completed events.
                post: pre,
                pos: SourcePos::unknown(),
                body: EventBody::Atomic(AtomicEvent {
                    id: ObjectId::new(ctx.i64(fields[2], "id")?),
                    op,
                    addr: ctx.u64(fields[4], "addr")?,
                }),
            }
        }
        "C" => {
            expect(9)?;
            let op = match fields[4] {
                "S" => ChannelOp::Send,
                "R" => ChannelOp::Recv,
                "C" => ChannelOp::Close,
                other => return Err(ctx.err(format!("unknown channel op {other:?}"))),
            };
            Event {
                routine,
                pre: ctx.u64(fields[1], "tpre")?,
                post: ctx.u64(fields[2], "tpost")?,
                pos: ctx.pos(fields[8])?,
                body: EventBody::Channel(ChannelEvent {
                    id: ObjectId::new(ctx.i64(fields[3], "id")?),
                    op,
                    closed: ctx.bool(fields[5], "closed")?,
                    partner: ctx.u64(fields[6], "partner id")?,
                    qsize: ctx.u32(fields[7], "qsize")?,
                }),
            }
        }
        "M" => {
            expect(8)?;
            let op = match fields[5] {
                "L" => MutexOp::Lock,
                "R" => MutexOp::RLock,
                "T" => MutexOp::TryLock,
                "Y" => MutexOp::TryRLock,
                "U" => MutexOp::Unlock,
                "N" => MutexOp::RUnlock,
                other => return Err(ctx.err(format!("unknown mutex op {other:?}"))),
            };
            Event {
                routine,
                pre: ctx.u64(fields[1], "tpre")?,
                post: ctx.u64(fields[2], "tpost")?,
                pos: ctx.pos(fields[7])?,
                body: EventBody::Mutex(MutexEvent {
                    id: ObjectId::new(ctx.i64(fields[3], "id")?),
                    rw: ctx.bool(fields[4], "rw flag")?,
                    op,
                    success: ctx.bool(fields[6], "success")?,
                }),
            }
        }
        "G" => {
            expect(5)?;
            Event {
                routine,
                pre: ctx.u64(fields[1], "tpre")?,
                post: ctx.u64(fields[2], "tpost")?,
                pos: ctx.pos(fields[4])?,
                body: EventBody::Fork {
                    child: RoutineId::new(ctx.u32(fields[3], "child routine")?),
                },
            }
        }
        "S" => {
            expect(7)?;
            let mut cases: SmallVec<[SelectCase; 4]> = SmallVec::new();
            if !fields[4].is_empty() {
                for case in fields[4].split('~') {
                    let parts: Vec<&str> = case.split('.').collect();
                    if parts.len() != 3 {
                        return Err(ctx.err(format!("malformed select case {case:?}")));
                    }
                    let dir = match parts[1] {
                        "S" => CaseDir::Send,
                        "R" => CaseDir::Recv,
                        other => {
                            return Err(ctx.err(format!("unknown case direction {other:?}")))
                        }
                    };
                    cases.push(SelectCase {
                        channel: ObjectId::new(ctx.i64(parts[0], "case channel")?),
                        dir,
                        buffered: ctx.bool(parts[2], "case buffered")?,
                    });
                }
            }
            Event {
                routine,
                pre: ctx.u64(fields[1], "tpre")?,
                post: ctx.u64(fields[2], "tpost")?,
                pos: ctx.pos(fields[6])?,
                body: EventBody::Select(SelectEvent {
                    id: ObjectId::new(ctx.i64(fields[3], "id")?),
                    cases,
                    chosen: ctx.i32(fields[5], "chosen index")?,
                }),
            }
        }
        "W" => {
            expect(8)?;
            let op = match fields[4] {
                "A" => WaitOp::Add,
                "D" => WaitOp::Done,
                "W" => WaitOp::Wait,
                other => return Err(ctx.err(format!("unknown wait op {other:?}"))),
            };
            Event {
                routine,
                pre: ctx.u64(fields[1], "tpre")?,
                post: ctx.u64(fields[2], "tpost")?,
                pos: ctx.pos(fields[7])?,
                body: EventBody::Wait(WaitEvent {
                    id: ObjectId::new(ctx.i64(fields[3], "id")?),
                    op,
                    delta: ctx.i64(fields[5], "delta")?,
                    value: ctx.i64(fields[6], "value")?,
                }),
            }
        }
        "O" => {
            expect(6)?;
            Event {
                routine,
                pre: ctx.u64(fields[1], "tpre")?,
                post: ctx.u64(fields[2], "tpost")?,
                pos: ctx.pos(fields[5])?,
                body: EventBody::Once(OnceEvent {
                    id: ObjectId::new(ctx.i64(fields[3], "id")?),
                    success: ctx.bool(fields[4], "success")?,
                }),
            }
        }
        "N" => {
            expect(6)?;
            let op = match fields[4] {
                "W" => CondOp::Wait,
                "S" => CondOp::Signal,
                "B" => CondOp::Broadcast,
                other => return Err(ctx.err(format!("unknown cond op {other:?}"))),
            };
            Event {
                routine,
                pre: ctx.u64(fields[1], "tpre")?,
                post: ctx.u64(fields[2], "tpost")?,
                pos: ctx.pos(fields[5])?,
                body: EventBody::Cond(CondEvent {
                    id: ObjectId::new(ctx.i64(fields[3], "id")?),
                    op,
                }),
            }
        }
        "E" => {
            expect(2)?;
            let pre = ctx.u64(fields[1], "tpre")?;
            Event {
                routine,
                pre,
                // Routine end is instantaneous; sorts as completed.
                post: pre,
                pos: SourcePos::unknown(),
                body: EventBody::RoutineEnd,
            }
        }
        other => {
            warn!(tag = other, file = ctx.file, line = ctx.line_no, "unknown event tag");
            return Err(ctx.err(format!("unknown event tag {other:?}")));
        }
    };

    Ok(Some(event))
}

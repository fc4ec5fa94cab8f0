//! The happens-before analysis engine.
//!
//! [`Analyzer`] drives one pass over a sorted trace. For every event it
//! ticks the owning routine's vector clock, hands the event to the detector
//! for its kind, and snapshots the resulting clock. Detectors perform the
//! cross-routine joins (always at the event that *observes* the
//! synchronization), maintain recency indices and leak buckets, and feed the
//! resource-deadlock recorder. After the sweep, the post-sweep phases drain
//! the leak buckets, scan for stuck routines and orphaned select cases,
//! check wait-group counters, and search the lock-dependency graph for
//! cycles.
//!
//! All engine state lives in [`AnalysisContext`]; analyses of different
//! traces are fully independent values.

pub mod channel;
pub mod cond;
pub mod deadlock;
pub mod leak;
pub mod mutex;
pub mod once;
pub mod waitgroup;

use crate::clock::VectorClock;
use crate::error::HindsightError;
use crate::results::{AnalysisReport, Participant, ResultSink};
use crate::trace::event::{parse_tid, AtomicOp, Event, EventBody, MutexOp};
use crate::trace::Trace;
use crate::types::{EventId, ObjectId, RoutineId};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Configuration of one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Run the resource-deadlock detector (lock-dependency mining + cycle
    /// search) alongside the happens-before analysis.
    pub resource_deadlock: bool,
    /// Cap on stored acquire requests per `(thread, lock, lockset)`
    /// dependency; the oldest request is evicted when full.
    pub max_dep_requests: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            resource_deadlock: true,
            max_dep_requests: 16,
        }
    }
}

impl AnalysisConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the resource-deadlock detector runs.
    #[must_use]
    pub const fn with_resource_deadlock(mut self, enabled: bool) -> Self {
        self.resource_deadlock = enabled;
        self
    }

    /// Sets the acquire-request cap per lock dependency.
    #[must_use]
    pub const fn with_max_dep_requests(mut self, cap: usize) -> Self {
        self.max_dep_requests = cap;
        self
    }
}

/// A recency-index entry: an event and the clock it was recorded with.
#[derive(Debug, Clone)]
pub(crate) struct ClockedRef {
    pub event: EventId,
    pub vc: VectorClock,
}

/// All mutable state of one analysis run.
pub(crate) struct AnalysisContext {
    /// One clock per routine, mutated in place by the sweep.
    pub clocks: Vec<VectorClock>,
    /// Snapshot clock per event, parallel to the arena.
    pub event_clocks: Vec<VectorClock>,
    /// Most recent completed send per channel per routine.
    pub most_recent_send: HashMap<ObjectId, BTreeMap<RoutineId, ClockedRef>>,
    /// Most recent completed receive per channel per routine.
    pub most_recent_receive: HashMap<ObjectId, BTreeMap<RoutineId, ClockedRef>>,
    /// The first close observed per channel.
    pub close_data: HashMap<ObjectId, ClockedRef>,
    /// Sends flagged closed before the close itself was swept.
    pub pending_closed_sends: HashMap<ObjectId, Vec<EventId>>,
    /// Receives flagged closed before the close itself was swept.
    pub pending_closed_recvs: HashMap<ObjectId, Vec<EventId>>,
    /// Deferred send clocks keyed by `(channel, partner id)`; the matching
    /// receive pops its slot, so producer order inside a buffer is
    /// respected.
    pub slot_clocks: HashMap<(ObjectId, u64), VectorClock>,
    /// Latest acquire per mutex, regardless of release.
    pub most_recent_acquire_total: HashMap<ObjectId, (ClockedRef, MutexOp)>,
    /// Clock of the last write unlock per mutex.
    pub release_write: HashMap<ObjectId, VectorClock>,
    /// Join of read-unlock clocks per mutex since the last write unlock.
    pub release_read: HashMap<ObjectId, VectorClock>,
    /// Per-wait-group counters and change clocks.
    pub wait_groups: BTreeMap<ObjectId, waitgroup::WaitGroupState>,
    /// Clock of the executing once call per once id.
    pub once_exec: HashMap<ObjectId, VectorClock>,
    /// Waiting routines per condition variable, oldest first.
    pub cond_waiters: HashMap<ObjectId, VecDeque<RoutineId>>,
    /// Deferred stuck channel operations per channel.
    pub leak_buckets: BTreeMap<ObjectId, Vec<leak::LeakEntry>>,
    /// Every select case seen in the trace, for late pairing and the
    /// orphaned-case scan.
    pub select_cases: Vec<channel::CaseRef>,
    /// Fork event per spawned routine.
    pub forks: HashMap<RoutineId, EventId>,
    /// Clock of the last atomic store per object.
    pub last_atomic_write: HashMap<ObjectId, VectorClock>,
    /// Lock-dependency store of the resource-deadlock detector.
    pub deadlock: deadlock::DeadlockState,
    /// Finding sink.
    pub sink: ResultSink,
}

impl AnalysisContext {
    fn new(num_routines: usize, num_events: usize, config: &AnalysisConfig) -> Self {
        Self {
            clocks: vec![VectorClock::new(num_routines); num_routines],
            event_clocks: vec![VectorClock::empty(); num_events],
            most_recent_send: HashMap::new(),
            most_recent_receive: HashMap::new(),
            close_data: HashMap::new(),
            pending_closed_sends: HashMap::new(),
            pending_closed_recvs: HashMap::new(),
            slot_clocks: HashMap::new(),
            most_recent_acquire_total: HashMap::new(),
            release_write: HashMap::new(),
            release_read: HashMap::new(),
            wait_groups: BTreeMap::new(),
            once_exec: HashMap::new(),
            cond_waiters: HashMap::new(),
            leak_buckets: BTreeMap::new(),
            select_cases: Vec::new(),
            forks: HashMap::new(),
            last_atomic_write: HashMap::new(),
            deadlock: deadlock::DeadlockState::new(config.max_dep_requests),
            sink: ResultSink::new(),
        }
    }

    /// The current clock of a routine.
    pub(crate) fn clock(&self, routine: RoutineId) -> &VectorClock {
        &self.clocks[routine.index()]
    }

    /// Mutable access to a routine's clock.
    pub(crate) fn clock_mut(&mut self, routine: RoutineId) -> &mut VectorClock {
        &mut self.clocks[routine.index()]
    }
}

/// The result of one analysis run: the report plus the computed per-event
/// clocks (exposed for downstream tooling and tests).
#[derive(Debug)]
pub struct AnalysisOutcome {
    report: AnalysisReport,
    event_clocks: Vec<VectorClock>,
}

impl AnalysisOutcome {
    /// The findings of the run.
    #[must_use]
    pub fn report(&self) -> &AnalysisReport {
        &self.report
    }

    /// Consumes the outcome, keeping only the report.
    #[must_use]
    pub fn into_report(self) -> AnalysisReport {
        self.report
    }

    /// The vector clock computed for an event (empty for events the sweep
    /// never reached).
    #[must_use]
    pub fn event_clock(&self, event: EventId) -> &VectorClock {
        &self.event_clocks[event.index()]
    }
}

/// Drives the happens-before sweep and the post-sweep phases over a trace.
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    config: AnalysisConfig,
}

impl Analyzer {
    /// Creates an analyzer with the given configuration.
    #[must_use]
    pub const fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Analyzes a trace and returns the findings.
    pub fn analyze(&self, trace: &Trace) -> Result<AnalysisOutcome, HindsightError> {
        let mut ctx = AnalysisContext::new(trace.num_routines(), trace.len(), &self.config);

        let order = trace.sweep_order();
        info!(
            events = order.len(),
            routines = trace.num_routines(),
            "starting happens-before sweep"
        );
        for id in order {
            self.step(trace, &mut ctx, id)?;
        }

        debug!("sweep finished; running post-sweep phases");
        waitgroup::check_concurrent_add_done(trace, &mut ctx);
        channel::check_select_cases_without_partner(trace, &mut ctx);
        leak::resolve(trace, &mut ctx);
        leak::check_stuck_routines(trace, &mut ctx);
        if self.config.resource_deadlock {
            deadlock::check_cycles(trace, &mut ctx);
        }

        let report = ctx.sink.into_report();
        info!(findings = report.records().len(), "analysis finished");
        Ok(AnalysisOutcome {
            report,
            event_clocks: ctx.event_clocks,
        })
    }

    /// Processes one event: tick, detector pre-hook, snapshot.
    fn step(
        &self,
        trace: &Trace,
        ctx: &mut AnalysisContext,
        id: EventId,
    ) -> Result<(), HindsightError> {
        let event = trace.event(id);
        let routine = event.routine;
        if routine.get() == 0 || routine.index() >= ctx.clocks.len() {
            return Err(HindsightError::invariant("unknown-routine"));
        }

        ctx.clock_mut(routine).tick(routine);

        match &event.body {
            EventBody::Channel(_) => channel::process(trace, ctx, id)?,
            EventBody::Select(_) => channel::process_select(trace, ctx, id)?,
            EventBody::Mutex(_) => {
                mutex::process(trace, ctx, id, self.config.resource_deadlock)?;
            }
            EventBody::Wait(_) => waitgroup::process(trace, ctx, id)?,
            EventBody::Once(_) => once::process(trace, ctx, id)?,
            EventBody::Cond(_) => cond::process(trace, ctx, id)?,
            EventBody::Fork { child } => self.process_fork(ctx, id, routine, *child)?,
            EventBody::RoutineEnd => {}
            EventBody::Atomic(_) => process_atomic(trace, ctx, id)?,
        }

        let snapshot = ctx.clock(routine).clone();
        ctx.event_clocks[id.index()] = snapshot;
        Ok(())
    }

    /// Fork creates the parent→child edge: the child starts from the
    /// parent's clock after the fork tick.
    fn process_fork(
        &self,
        ctx: &mut AnalysisContext,
        id: EventId,
        parent: RoutineId,
        child: RoutineId,
    ) -> Result<(), HindsightError> {
        if child.get() == 0 || child.index() >= ctx.clocks.len() {
            return Err(HindsightError::invariant("unknown-routine"));
        }
        ctx.forks.insert(child, id);
        let parent_vc = ctx.clock(parent).clone();
        ctx.clock_mut(child).join(&parent_vc)
    }
}

/// Atomic stores publish a clock per object; loads observe it.
fn process_atomic(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    id: EventId,
) -> Result<(), HindsightError> {
    let event = trace.event(id);
    let EventBody::Atomic(atomic) = &event.body else {
        return Ok(());
    };
    let routine = event.routine;
    match atomic.op {
        AtomicOp::Load => {
            if let Some(write_vc) = ctx.last_atomic_write.get(&atomic.id) {
                let write_vc = write_vc.clone();
                ctx.clock_mut(routine).join(&write_vc)?;
            }
        }
        AtomicOp::Store => {
            let vc = ctx.clock(routine).clone();
            ctx.last_atomic_write.insert(atomic.id, vc);
        }
        AtomicOp::Rmw => {
            if let Some(write_vc) = ctx.last_atomic_write.get(&atomic.id) {
                let write_vc = write_vc.clone();
                ctx.clock_mut(routine).join(&write_vc)?;
            }
            let vc = ctx.clock(routine).clone();
            ctx.last_atomic_write.insert(atomic.id, vc);
        }
    }
    Ok(())
}

/// Builds a participant for an event, going through the trace identifier.
///
/// A TID that does not round-trip is logged and yields `None`; the caller
/// skips the record rather than emitting a partial one.
pub(crate) fn participant_for(
    event: &Event,
    obj_type: &'static str,
    object: ObjectId,
) -> Option<Participant> {
    let tid = event.tid();
    match parse_tid(&tid) {
        Some((file, line, pre)) => Some(Participant {
            routine: event.routine,
            object,
            pre,
            obj_type,
            file,
            line,
        }),
        None => {
            warn!(%tid, "trace identifier does not round-trip; skipping participant");
            None
        }
    }
}

/// Builds a participant with the event's own tag and object.
pub(crate) fn event_participant(event: &Event) -> Option<Participant> {
    let object = event.object_id().unwrap_or(ObjectId::new(-1));
    participant_for(event, event.obj_type(), object)
}

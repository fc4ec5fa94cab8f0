//! Wait-group detector.
//!
//! Adds and dones join into a per-group "last change" clock; a completed
//! wait joins with that clock. The post-sweep scan flags groups where a
//! done is concurrent with a positive add — a reordering consistent with
//! happens-before could then drive the counter negative (P03).

use crate::analysis::{event_participant, AnalysisContext};
use crate::clock::{HappensBefore, VectorClock};
use crate::error::HindsightError;
use crate::results::{Participant, ResultKind};
use crate::trace::event::{EventBody, WaitOp};
use crate::trace::Trace;
use crate::types::EventId;
use std::collections::BTreeSet;
use tracing::debug;

/// Per-wait-group analysis state.
#[derive(Debug, Clone, Default)]
pub(crate) struct WaitGroupState {
    /// Join of the clocks of all adds and dones.
    pub last_change: VectorClock,
    /// Recorded counter value, tracked for diagnostics.
    pub counter: i64,
    /// Completed adds: event, clock, delta.
    pub adds: Vec<(EventId, VectorClock, i64)>,
    /// Completed dones: event, clock.
    pub dones: Vec<(EventId, VectorClock)>,
}

/// Processes one wait-group event (pre-hook of the sweep).
pub(crate) fn process(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    id: EventId,
) -> Result<(), HindsightError> {
    let event = trace.event(id);
    let EventBody::Wait(wait) = &event.body else {
        return Ok(());
    };
    let routine = event.routine;

    if event.is_stuck() {
        if wait.op == WaitOp::Wait {
            if let Some(part) = event_participant(event) {
                ctx.sink
                    .report(ResultKind::LeakWaitGroup, "wait", vec![part], "", vec![]);
            }
        }
        return Ok(());
    }

    match wait.op {
        WaitOp::Add => {
            let vc = ctx.clock(routine).clone();
            let state = ctx.wait_groups.entry(wait.id).or_default();
            state.last_change.join(&vc)?;
            state.counter += wait.delta;
            state.adds.push((id, vc, wait.delta));
        }
        WaitOp::Done => {
            let vc = ctx.clock(routine).clone();
            let state = ctx.wait_groups.entry(wait.id).or_default();
            state.last_change.join(&vc)?;
            state.counter -= 1;
            state.dones.push((id, vc));
        }
        WaitOp::Wait => {
            if let Some(state) = ctx.wait_groups.get(&wait.id) {
                debug!(group = %wait.id, counter = state.counter, "wait completed");
                let change_vc = state.last_change.clone();
                ctx.clock_mut(routine).join(&change_vc)?;
            }
        }
    }
    Ok(())
}

/// Post-sweep P03 scan: one record per wait group whose adds and dones can
/// be reordered into a negative counter.
pub(crate) fn check_concurrent_add_done(trace: &Trace, ctx: &mut AnalysisContext) {
    let mut findings: Vec<(Vec<Participant>, Vec<Participant>)> = Vec::new();

    for state in ctx.wait_groups.values() {
        let mut add_events: BTreeSet<EventId> = BTreeSet::new();
        let mut done_events: BTreeSet<EventId> = BTreeSet::new();
        for (done_event, done_vc) in &state.dones {
            for (add_event, add_vc, delta) in &state.adds {
                if *delta <= 0 {
                    continue;
                }
                if add_vc.relation(done_vc) == HappensBefore::Concurrent {
                    add_events.insert(*add_event);
                    done_events.insert(*done_event);
                }
            }
        }
        if add_events.is_empty() {
            continue;
        }
        let adds: Vec<Participant> = add_events
            .iter()
            .filter_map(|&e| event_participant(trace.event(e)))
            .collect();
        let dones: Vec<Participant> = done_events
            .iter()
            .filter_map(|&e| event_participant(trace.event(e)))
            .collect();
        if adds.is_empty() || dones.is_empty() {
            continue;
        }
        findings.push((adds, dones));
    }

    for (adds, dones) in findings {
        ctx.sink
            .report(ResultKind::PossibleNegativeWaitGroup, "add", adds, "done", dones);
    }
}

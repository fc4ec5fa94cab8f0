//! Mutex detector.
//!
//! Maintains the release-clock joins that order critical sections, the
//! most-recent-acquire index used by the mutex leak check, and forwards
//! acquire/release traffic to the resource-deadlock recorder.
//!
//! Reader/writer semantics: a write lock orders against both the last
//! write unlock and the accumulated read unlocks; a read lock orders
//! against the last write unlock only. Try variants take effect only when
//! the recorded `success` bit is set — including for the deadlock
//! recorder.

use crate::analysis::{event_participant, participant_for, AnalysisContext, ClockedRef};
use crate::analysis::deadlock::{self, LockId};
use crate::error::HindsightError;
use crate::results::ResultKind;
use crate::trace::event::{EventBody, MutexOp};
use crate::trace::Trace;
use crate::types::EventId;
use std::collections::hash_map::Entry;
use tracing::debug;

/// Processes one mutex event (pre-hook of the sweep).
pub(crate) fn process(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    id: EventId,
    record_deadlock: bool,
) -> Result<(), HindsightError> {
    let event = trace.event(id);
    let EventBody::Mutex(mu) = &event.body else {
        return Ok(());
    };
    let routine = event.routine;

    if event.is_stuck() {
        // Only blocking acquires can be stuck.
        if matches!(mu.op, MutexOp::Lock | MutexOp::RLock) {
            report_mutex_leak(trace, ctx, id);
            if record_deadlock {
                // The blocked request still documents "wants lock while
                // holding lockset".
                let lock = LockId::new(mu.id, mu.op.is_read());
                let vc = ctx.clock(routine).clone();
                deadlock::acquire(ctx, routine, lock, deadlock::request(event, id, vc), false);
            }
        }
        return Ok(());
    }

    match mu.op {
        MutexOp::Lock | MutexOp::TryLock | MutexOp::RLock | MutexOp::TryRLock => {
            if mu.op.is_try() && !mu.success {
                // Failed try acquires have no effect.
                debug!(mutex = %mu.id, %routine, "failed try acquire ignored");
                return Ok(());
            }
            // A write acquire orders after the last write unlock and all
            // read unlocks; a read acquire orders after the last write
            // unlock only.
            if let Some(release_vc) = ctx.release_write.get(&mu.id).cloned() {
                ctx.clock_mut(routine).join(&release_vc)?;
            }
            if !mu.op.is_read() {
                if let Some(read_vc) = ctx.release_read.get(&mu.id).cloned() {
                    ctx.clock_mut(routine).join(&read_vc)?;
                }
            }
            record_acquire(trace, ctx, id, record_deadlock)?;
        }
        MutexOp::Unlock => {
            let vc = ctx.clock(routine).clone();
            ctx.release_write.insert(mu.id, vc);
            // A write unlock supersedes the reads it ordered after.
            ctx.release_read.remove(&mu.id);
            if record_deadlock {
                deadlock::release(ctx, routine, LockId::new(mu.id, false))?;
            }
        }
        MutexOp::RUnlock => {
            let vc = ctx.clock(routine).clone();
            match ctx.release_read.entry(mu.id) {
                Entry::Occupied(mut joined) => joined.get_mut().join(&vc)?,
                Entry::Vacant(slot) => {
                    slot.insert(vc);
                }
            }
            if record_deadlock {
                deadlock::release(ctx, routine, LockId::new(mu.id, true))?;
            }
        }
    }
    Ok(())
}

/// Updates the most-recent-acquire index and the deadlock recorder for a
/// completed acquire.
fn record_acquire(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    id: EventId,
    record_deadlock: bool,
) -> Result<(), HindsightError> {
    let event = trace.event(id);
    let EventBody::Mutex(mu) = &event.body else {
        return Ok(());
    };
    let vc = ctx.clock(event.routine).clone();
    ctx.most_recent_acquire_total
        .insert(mu.id, (ClockedRef { event: id, vc: vc.clone() }, mu.op));
    if record_deadlock {
        let lock = LockId::new(mu.id, mu.op.is_read());
        deadlock::acquire(
            ctx,
            event.routine,
            lock,
            deadlock::request(event, id, vc),
            true,
        );
    }
    Ok(())
}

/// Reports L08 for a stuck lock/rlock, referencing the most recent acquire
/// of the mutex by any routine.
fn report_mutex_leak(trace: &Trace, ctx: &mut AnalysisContext, id: EventId) {
    let event = trace.event(id);
    let EventBody::Mutex(mu) = &event.body else {
        return;
    };
    let Some(stuck_part) = event_participant(event) else {
        return;
    };

    let last = ctx.most_recent_acquire_total.get(&mu.id).and_then(|(last, op)| {
        let tag = match op {
            MutexOp::Lock => "ML",
            MutexOp::RLock => "MR",
            MutexOp::TryLock => "MT",
            MutexOp::TryRLock => "MY",
            // The index only ever holds acquires.
            MutexOp::Unlock | MutexOp::RUnlock => return None,
        };
        participant_for(trace.event(last.event), tag, mu.id)
    });

    ctx.sink.report(
        ResultKind::LeakMutex,
        "mutex",
        vec![stuck_part],
        "last",
        last.into_iter().collect(),
    );
}

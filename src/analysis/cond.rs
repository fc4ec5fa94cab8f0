//! Condition-variable detector.
//!
//! Completed waits enqueue their routine; a signal joins its clock into
//! the oldest waiter, a broadcast into every waiter. A wait with no post
//! event leaks (L10).

use crate::analysis::{event_participant, AnalysisContext};
use crate::error::HindsightError;
use crate::results::ResultKind;
use crate::trace::event::{CondOp, EventBody};
use crate::trace::Trace;
use crate::types::EventId;

/// Processes one condition-variable event (pre-hook of the sweep).
pub(crate) fn process(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    id: EventId,
) -> Result<(), HindsightError> {
    let event = trace.event(id);
    let EventBody::Cond(cond) = &event.body else {
        return Ok(());
    };
    let routine = event.routine;

    if event.is_stuck() {
        if cond.op == CondOp::Wait {
            if let Some(part) = event_participant(event) {
                ctx.sink
                    .report(ResultKind::LeakCond, "cond", vec![part], "", vec![]);
            }
        }
        return Ok(());
    }

    match cond.op {
        CondOp::Wait => {
            ctx.cond_waiters.entry(cond.id).or_default().push_back(routine);
        }
        CondOp::Signal => {
            let signal_vc = ctx.clock(routine).clone();
            if let Some(waiter) = ctx
                .cond_waiters
                .get_mut(&cond.id)
                .and_then(|queue| queue.pop_front())
            {
                ctx.clock_mut(waiter).join(&signal_vc)?;
            }
        }
        CondOp::Broadcast => {
            let signal_vc = ctx.clock(routine).clone();
            let waiters: Vec<_> = ctx
                .cond_waiters
                .get_mut(&cond.id)
                .map(|queue| queue.drain(..).collect())
                .unwrap_or_default();
            for waiter in waiters {
                ctx.clock_mut(waiter).join(&signal_vc)?;
            }
        }
    }
    Ok(())
}

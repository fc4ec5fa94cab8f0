//! Once detector.
//!
//! The call with `success == true` executed the guarded function; every
//! other call on the same once id observed its effects and joins with the
//! executor's clock. A once never blocks, so there is no leak mode.

use crate::analysis::AnalysisContext;
use crate::error::HindsightError;
use crate::trace::event::EventBody;
use crate::trace::Trace;
use crate::types::EventId;

/// Processes one once event (pre-hook of the sweep).
pub(crate) fn process(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    id: EventId,
) -> Result<(), HindsightError> {
    let event = trace.event(id);
    let EventBody::Once(once) = &event.body else {
        return Ok(());
    };
    if event.is_stuck() {
        return Ok(());
    }
    let routine = event.routine;

    if once.success {
        let vc = ctx.clock(routine).clone();
        ctx.once_exec.insert(once.id, vc);
    } else if let Some(exec_vc) = ctx.once_exec.get(&once.id).cloned() {
        ctx.clock_mut(routine).join(&exec_vc)?;
    }
    Ok(())
}

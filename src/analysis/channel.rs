//! Channel and select detector.
//!
//! Handles the happens-before joins for channel communication and the
//! channel-specific bug classes: send/recv/close on closed channels (actual
//! and possible), concurrent receives, and orphaned select cases. Stuck
//! operations are handed to the leak machinery in [`super::leak`].
//!
//! Buffered sends publish their clock under `(channel, partner id)`; the
//! matching receive pops that slot and joins, so producer order within a
//! buffer is respected. Unbuffered pairs use the same slots — the
//! recorder's partner ids are authoritative either way, and no rendezvous
//! is synthesized for `qsize > 0`.

use crate::analysis::{event_participant, leak, participant_for, AnalysisContext, ClockedRef};
use crate::clock::{HappensBefore, VectorClock};
use crate::error::HindsightError;
use crate::results::ResultKind;
use crate::trace::event::{CaseDir, ChannelOp, EventBody};
use crate::trace::Trace;
use crate::types::{EventId, ObjectId};
use tracing::debug;

/// One select case as seen during the sweep, kept for late leak pairing and
/// the orphaned-case scan.
#[derive(Debug, Clone)]
pub(crate) struct CaseRef {
    /// The select event this case belongs to.
    pub select_event: EventId,
    /// Id of the select statement.
    pub select_id: ObjectId,
    /// Channel the case communicates on.
    pub channel: ObjectId,
    /// Direction of the case.
    pub dir: CaseDir,
    /// True if the case's channel is buffered.
    pub buffered: bool,
    /// The select's clock.
    pub vc: VectorClock,
    /// True once a potential partner for this case was seen (or the case
    /// fired).
    pub satisfied: bool,
    /// True if the owning select completed.
    pub completed_select: bool,
}

/// Processes one channel event (pre-hook of the sweep).
pub(crate) fn process(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    id: EventId,
) -> Result<(), HindsightError> {
    let event = trace.event(id);
    let EventBody::Channel(ch) = &event.body else {
        return Ok(());
    };
    let routine = event.routine;

    if event.is_stuck() {
        leak::channel_stuck(trace, ctx, id);
        return Ok(());
    }
    if ch.id.is_nil() {
        // Completed operations on nil channels cannot happen; ignore.
        debug!(event = %id, "completed channel op on nil channel ignored");
        return Ok(());
    }

    match ch.op {
        ChannelOp::Send => {
            if ch.closed {
                report_actual_on_closed(trace, ctx, ch.id, id, ResultKind::SendOnClosed);
            }
            if ch.partner != 0 {
                let vc = ctx.clock(routine).clone();
                ctx.slot_clocks.insert((ch.id, ch.partner), vc);
            }
            let vc = ctx.clock(routine).clone();
            ctx.most_recent_send
                .entry(ch.id)
                .or_default()
                .insert(routine, ClockedRef { event: id, vc: vc.clone() });
            mark_satisfied_cases(ctx, ch.id, ChannelOp::Send, &vc, id);
            leak::run(trace, ctx, ch.id, id, ChannelOp::Send, ch.buffered(), &vc);
        }
        ChannelOp::Recv => {
            if ch.partner != 0 {
                if let Some(send_vc) = ctx.slot_clocks.remove(&(ch.id, ch.partner)) {
                    ctx.clock_mut(routine).join(&send_vc)?;
                }
            }
            if ch.closed {
                if let Some(close) = ctx.close_data.get(&ch.id) {
                    let close_vc = close.vc.clone();
                    ctx.clock_mut(routine).join(&close_vc)?;
                    report_actual_on_closed(trace, ctx, ch.id, id, ResultKind::RecvOnClosed);
                } else {
                    ctx.pending_closed_recvs.entry(ch.id).or_default().push(id);
                }
            }
            let vc = ctx.clock(routine).clone();
            if !ch.buffered() {
                check_concurrent_recv(trace, ctx, ch.id, id, &vc);
            }
            ctx.most_recent_receive
                .entry(ch.id)
                .or_default()
                .insert(routine, ClockedRef { event: id, vc: vc.clone() });
            mark_satisfied_cases(ctx, ch.id, ChannelOp::Recv, &vc, id);
            leak::run(trace, ctx, ch.id, id, ChannelOp::Recv, ch.buffered(), &vc);
        }
        ChannelOp::Close => {
            let vc = ctx.clock(routine).clone();
            if ctx.close_data.contains_key(&ch.id) {
                report_close_on_closed(trace, ctx, ch.id, id);
            } else {
                ctx.close_data
                    .insert(ch.id, ClockedRef { event: id, vc: vc.clone() });
            }
            drain_pending_closed(trace, ctx, ch.id, id);
            check_possible_on_closed(trace, ctx, ch.id, id, &vc);
            mark_satisfied_cases(ctx, ch.id, ChannelOp::Close, &vc, id);
            leak::run(trace, ctx, ch.id, id, ChannelOp::Close, ch.buffered(), &vc);
        }
    }
    Ok(())
}

/// Processes one select event (pre-hook of the sweep).
pub(crate) fn process_select(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    id: EventId,
) -> Result<(), HindsightError> {
    let event = trace.event(id);
    let EventBody::Select(select) = &event.body else {
        return Ok(());
    };
    let routine = event.routine;
    let stuck = event.is_stuck();

    if !stuck {
        if let Some(case) = select.chosen_case() {
            if !case.channel.is_nil() {
                let vc = ctx.clock(routine).clone();
                match case.dir {
                    CaseDir::Send => {
                        ctx.most_recent_send
                            .entry(case.channel)
                            .or_default()
                            .insert(routine, ClockedRef { event: id, vc: vc.clone() });
                        mark_satisfied_cases(ctx, case.channel, ChannelOp::Send, &vc, id);
                        leak::run(
                            trace,
                            ctx,
                            case.channel,
                            id,
                            ChannelOp::Send,
                            case.buffered,
                            &vc,
                        );
                    }
                    CaseDir::Recv => {
                        ctx.most_recent_receive
                            .entry(case.channel)
                            .or_default()
                            .insert(routine, ClockedRef { event: id, vc: vc.clone() });
                        mark_satisfied_cases(ctx, case.channel, ChannelOp::Recv, &vc, id);
                        leak::run(
                            trace,
                            ctx,
                            case.channel,
                            id,
                            ChannelOp::Recv,
                            case.buffered,
                            &vc,
                        );
                    }
                }
            }
        }
    }

    register_cases(trace, ctx, id);

    if stuck {
        leak::select_stuck(trace, ctx, id);
    }
    Ok(())
}

/// Registers every non-nil case of a select in the case registry, marking
/// cases that already have a potential partner in the recency indices.
fn register_cases(trace: &Trace, ctx: &mut AnalysisContext, id: EventId) {
    let event = trace.event(id);
    let EventBody::Select(select) = &event.body else {
        return;
    };
    let routine = event.routine;
    let vc = ctx.clock(routine).clone();

    for (i, case) in select.cases.iter().enumerate() {
        if case.channel.is_nil() {
            continue;
        }
        let chosen = i32::try_from(i).map(|i| i == select.chosen).unwrap_or(false);
        let mut satisfied = chosen;
        if !satisfied {
            // The chosen case writes the select's own clock into the
            // recency index; exclude it so sibling cases do not pair with
            // their own select.
            satisfied = match case.dir {
                CaseDir::Send => ctx
                    .most_recent_receive
                    .get(&case.channel)
                    .is_some_and(|map| {
                        map.values().any(|mrr| {
                            mrr.event != id
                                && vc.relation(&mrr.vc) == HappensBefore::Concurrent
                        })
                    }),
                CaseDir::Recv => {
                    ctx.close_data.contains_key(&case.channel)
                        || ctx.most_recent_send.get(&case.channel).is_some_and(|map| {
                            map.values().any(|mrs| {
                                mrs.event != id
                                    && vc.relation(&mrs.vc) == HappensBefore::Concurrent
                            })
                        })
                }
            };
        }
        ctx.select_cases.push(CaseRef {
            select_event: id,
            select_id: select.id,
            channel: case.channel,
            dir: case.dir,
            buffered: case.buffered,
            vc: vc.clone(),
            satisfied,
            completed_select: !event.is_stuck(),
        });
    }
}

/// Marks registered select cases that a completed channel operation could
/// have paired with. A close satisfies every receive case on the channel; a
/// send or receive satisfies concurrent opposite-direction cases.
fn mark_satisfied_cases(
    ctx: &mut AnalysisContext,
    channel: ObjectId,
    op: ChannelOp,
    vc: &VectorClock,
    op_event: EventId,
) {
    for case in &mut ctx.select_cases {
        if case.satisfied || case.channel != channel || case.select_event == op_event {
            continue;
        }
        let direction_matches = match op {
            ChannelOp::Send | ChannelOp::Close => case.dir == CaseDir::Recv,
            ChannelOp::Recv => case.dir == CaseDir::Send,
        };
        if !direction_matches {
            continue;
        }
        if op == ChannelOp::Close || vc.relation(&case.vc) == HappensBefore::Concurrent {
            case.satisfied = true;
        }
    }
}

/// Reports A01/A02: the recorder observed an operation that finished on a
/// closed channel. When the close has not been swept yet, the operation is
/// parked and reported when the close arrives.
fn report_actual_on_closed(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    channel: ObjectId,
    op_event: EventId,
    kind: ResultKind,
) {
    let Some(close) = ctx.close_data.get(&channel) else {
        let pending = match kind {
            ResultKind::SendOnClosed => &mut ctx.pending_closed_sends,
            _ => &mut ctx.pending_closed_recvs,
        };
        pending.entry(channel).or_default().push(op_event);
        return;
    };
    let close_event = close.event;
    emit_on_closed(trace, ctx, kind, op_event, close_event);
}

/// Emits one A01/A02 record for an op/close pair.
fn emit_on_closed(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    kind: ResultKind,
    op_event: EventId,
    close_event: EventId,
) {
    let (Some(op_part), Some(close_part)) = (
        event_participant(trace.event(op_event)),
        event_participant(trace.event(close_event)),
    ) else {
        return;
    };
    let role = match kind {
        ResultKind::SendOnClosed => "send",
        _ => "recv",
    };
    ctx.sink
        .report(kind, role, vec![op_part], "close", vec![close_part]);
}

/// Reports A03 for a close on an already-closed channel.
fn report_close_on_closed(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    channel: ObjectId,
    close_event: EventId,
) {
    let Some(first) = ctx.close_data.get(&channel) else {
        return;
    };
    let first_event = first.event;
    let (Some(this_part), Some(first_part)) = (
        event_participant(trace.event(close_event)),
        event_participant(trace.event(first_event)),
    ) else {
        return;
    };
    ctx.sink.report(
        ResultKind::CloseOnClosed,
        "close",
        vec![this_part],
        "close",
        vec![first_part],
    );
}

/// Reports parked closed-flag operations once their close is swept.
fn drain_pending_closed(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    channel: ObjectId,
    close_event: EventId,
) {
    for op_event in ctx
        .pending_closed_sends
        .remove(&channel)
        .unwrap_or_default()
    {
        emit_on_closed(trace, ctx, ResultKind::SendOnClosed, op_event, close_event);
    }
    for op_event in ctx
        .pending_closed_recvs
        .remove(&channel)
        .unwrap_or_default()
    {
        emit_on_closed(trace, ctx, ResultKind::RecvOnClosed, op_event, close_event);
    }
}

/// Reports P01/P02: a send or receive whose clock is concurrent with the
/// close could be reordered onto the closed channel. Operations that
/// actually hit the close (closed flag) are already covered by A01/A02.
fn check_possible_on_closed(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    channel: ObjectId,
    close_event: EventId,
    close_vc: &VectorClock,
) {
    let mut findings: Vec<(ResultKind, &'static str, EventId)> = Vec::new();
    if let Some(sends) = ctx.most_recent_send.get(&channel) {
        for mrs in sends.values() {
            if flagged_closed(trace, mrs.event) {
                continue;
            }
            if mrs.vc.relation(close_vc) == HappensBefore::Concurrent {
                findings.push((ResultKind::PossibleSendOnClosed, "send", mrs.event));
            }
        }
    }
    if let Some(recvs) = ctx.most_recent_receive.get(&channel) {
        for mrr in recvs.values() {
            if flagged_closed(trace, mrr.event) {
                continue;
            }
            if mrr.vc.relation(close_vc) == HappensBefore::Concurrent {
                findings.push((ResultKind::PossibleRecvOnClosed, "recv", mrr.event));
            }
        }
    }
    for (kind, role, op_event) in findings {
        let (Some(op_part), Some(close_part)) = (
            event_participant(trace.event(op_event)),
            event_participant(trace.event(close_event)),
        ) else {
            continue;
        };
        ctx.sink
            .report(kind, role, vec![op_part], "close", vec![close_part]);
    }
}

/// True if the event is a channel op that completed due to a close.
fn flagged_closed(trace: &Trace, id: EventId) -> bool {
    matches!(&trace.event(id).body, EventBody::Channel(ch) if ch.closed)
}

/// Reports A04: two completed receives on the same unbuffered channel with
/// concurrent clocks.
fn check_concurrent_recv(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    channel: ObjectId,
    recv_event: EventId,
    vc: &VectorClock,
) {
    let routine = trace.event(recv_event).routine;
    let mut others: Vec<EventId> = Vec::new();
    if let Some(recvs) = ctx.most_recent_receive.get(&channel) {
        for (&other_routine, mrr) in recvs {
            if other_routine == routine {
                continue;
            }
            if vc.relation(&mrr.vc) == HappensBefore::Concurrent {
                others.push(mrr.event);
            }
        }
    }
    for other in others {
        let (Some(this_part), Some(other_part)) = (
            event_participant(trace.event(recv_event)),
            event_participant(trace.event(other)),
        ) else {
            continue;
        };
        ctx.sink.report(
            ResultKind::ConcurrentRecv,
            "recv",
            vec![this_part],
            "recv",
            vec![other_part],
        );
    }
}

/// Post-sweep A05 scan: a case of a completed select that never saw a
/// potential partner — no concurrent opposite operation, no executed
/// pairing, no close for a receive case — is reported as orphaned.
pub(crate) fn check_select_cases_without_partner(trace: &Trace, ctx: &mut AnalysisContext) {
    let mut i = 0;
    while i < ctx.select_cases.len() {
        let select_event = ctx.select_cases[i].select_event;
        let mut j = i;
        while j < ctx.select_cases.len() && ctx.select_cases[j].select_event == select_event {
            j += 1;
        }
        let group = &ctx.select_cases[i..j];
        if group[0].completed_select {
            let orphans: Vec<usize> = (i..j)
                .filter(|&k| !ctx.select_cases[k].satisfied)
                .collect();
            if !orphans.is_empty() {
                emit_select_without_partner(trace, ctx, select_event, &orphans);
            }
        }
        i = j;
    }
}

fn emit_select_without_partner(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    select_event: EventId,
    orphans: &[usize],
) {
    let event = trace.event(select_event);
    let Some(select_part) = event_participant(event) else {
        return;
    };
    let mut case_parts = Vec::with_capacity(orphans.len());
    for &k in orphans {
        let case = &ctx.select_cases[k];
        let tag = match case.dir {
            CaseDir::Send => "CS",
            CaseDir::Recv => "CR",
        };
        if let Some(part) = participant_for(event, tag, case.channel) {
            case_parts.push(part);
        }
    }
    if case_parts.is_empty() {
        return;
    }
    ctx.sink.report(
        ResultKind::SelectCaseWithoutPartner,
        "select",
        vec![select_part],
        "case",
        case_parts,
    );
}

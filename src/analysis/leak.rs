//! Leak buckets, stuck-operation checks, and the post-sweep resolver.
//!
//! A stuck channel operation first tries to pair with an already-swept
//! opposite operation through the recency indices. Failing that it is
//! parked in the channel's leak bucket. Every later completed operation on
//! the channel runs the bucket ([`run`]); whatever survives the sweep is
//! handed to the post-sweep [`resolve`] pass, which pairs against select
//! cases anywhere in the trace before reporting the operation as leaked
//! without a partner.
//!
//! Invariant: every bucket entry is consumed exactly once — matched during
//! the sweep, or resolved afterwards.

use crate::analysis::{event_participant, participant_for, AnalysisContext};
use crate::clock::{HappensBefore, VectorClock};
use crate::results::{Participant, ResultKind};
use crate::trace::event::{CaseDir, ChannelOp, EventBody};
use crate::trace::Trace;
use crate::types::{EventId, ObjectId, RoutineId};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// A stuck channel operation (or one case of a stuck select) awaiting a
/// partner.
#[derive(Debug, Clone)]
pub(crate) struct LeakEntry {
    /// Routine of the stuck operation.
    pub routine: RoutineId,
    /// Channel the operation targets.
    pub channel: ObjectId,
    /// Clock of the stuck operation.
    pub vc: VectorClock,
    /// Trace identifier of the stuck operation (the select's for case
    /// entries).
    pub tid: String,
    /// Direction of the stuck operation.
    pub op: CaseDir,
    /// Pre timestamp of the owning select; entries of one select share it
    /// and are purged as a group.
    pub select_pre: Option<u64>,
    /// True if the channel is buffered.
    pub buffered: bool,
    /// True for entries spawned from a stuck select.
    pub is_select: bool,
    /// Id of the owning select for select entries.
    pub select_id: ObjectId,
    /// The stuck event (the select for case entries).
    pub event: EventId,
}

impl LeakEntry {
    /// Participant describing the stuck side.
    fn participant(&self) -> Option<Participant> {
        let (obj_type, object) = if self.is_select {
            ("SS", self.select_id)
        } else {
            (
                match self.op {
                    CaseDir::Send => "CS",
                    CaseDir::Recv => "CR",
                },
                self.channel,
            )
        };
        participant_from_tid(&self.tid, self.routine, object, obj_type)
    }
}

/// Builds a participant from a raw trace identifier. Failures are logged
/// and skipped (error class 2).
fn participant_from_tid(
    tid: &str,
    routine: RoutineId,
    object: ObjectId,
    obj_type: &'static str,
) -> Option<Participant> {
    match crate::trace::event::parse_tid(tid) {
        Some((file, line, pre)) => Some(Participant {
            routine,
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

/// Handles a stuck channel operation: nil-channel leak, immediate partner
/// scan, or bucket push.
pub(crate) fn channel_stuck(trace: &Trace, ctx: &mut AnalysisContext, id: EventId) {
    let event = trace.event(id);
    let EventBody::Channel(ch) = &event.body else {
        return;
    };
    let routine = event.routine;

    if ch.id.is_nil() {
        if ch.op == ChannelOp::Close {
            return;
        }
        if let Some(part) = event_participant(event) {
            ctx.sink
                .report(ResultKind::LeakNilChannel, "channel", vec![part], "", vec![]);
        }
        return;
    }

    let vc = ctx.clock(routine).clone();
    let buffered = ch.buffered();
    let kind = if buffered {
        ResultKind::LeakBufferedWith
    } else {
        ResultKind::LeakUnbufferedWith
    };

    let mut partners: Vec<EventId> = Vec::new();
    match ch.op {
        ChannelOp::Send => {
            if let Some(recvs) = ctx.most_recent_receive.get(&ch.id) {
                for mrr in recvs.values() {
                    if mrr.vc.relation(&vc) == HappensBefore::Concurrent {
                        partners.push(mrr.event);
                    }
                }
            }
        }
        ChannelOp::Recv => {
            if let Some(sends) = ctx.most_recent_send.get(&ch.id) {
                for mrs in sends.values() {
                    if mrs.vc.relation(&vc) == HappensBefore::Concurrent {
                        partners.push(mrs.event);
                    }
                }
            }
            if let Some(close) = ctx.close_data.get(&ch.id) {
                if close.vc.relation(&vc) == HappensBefore::Concurrent {
                    partners.push(close.event);
                }
            }
        }
        // A close never blocks.
        ChannelOp::Close => return,
    }

    if partners.is_empty() {
        debug!(channel = %ch.id, %routine, "stuck channel op parked in leak bucket");
        ctx.leak_buckets.entry(ch.id).or_default().push(LeakEntry {
            routine,
            channel: ch.id,
            vc,
            tid: event.tid(),
            op: match ch.op {
                ChannelOp::Send => CaseDir::Send,
                _ => CaseDir::Recv,
            },
            select_pre: None,
            buffered,
            is_select: false,
            select_id: ObjectId::new(-1),
            event: id,
        });
        return;
    }

    for partner in partners {
        let (Some(stuck_part), Some(partner_part)) = (
            event_participant(event),
            event_participant(trace.event(partner)),
        ) else {
            continue;
        };
        ctx.sink.report(
            kind,
            "channel",
            vec![stuck_part],
            "partner",
            vec![partner_part],
        );
    }
}

/// Handles a stuck select: immediate partner scan across all cases, or one
/// bucket entry per case sharing the select's pre timestamp.
pub(crate) fn select_stuck(trace: &Trace, ctx: &mut AnalysisContext, id: EventId) {
    let event = trace.event(id);
    let EventBody::Select(select) = &event.body else {
        return;
    };
    let routine = event.routine;
    let vc = ctx.clock(routine).clone();

    let usable: Vec<_> = select
        .cases
        .iter()
        .filter(|case| !case.channel.is_nil())
        .collect();
    if usable.is_empty() {
        if let Some(part) = event_participant(event) {
            ctx.sink.report(
                ResultKind::LeakSelectWithout,
                "select",
                vec![part],
                "",
                vec![],
            );
        }
        return;
    }

    let mut partners: Vec<EventId> = Vec::new();
    for case in &usable {
        match case.dir {
            CaseDir::Send => {
                if let Some(recvs) = ctx.most_recent_receive.get(&case.channel) {
                    for mrr in recvs.values() {
                        if vc.relation(&mrr.vc) == HappensBefore::Concurrent {
                            partners.push(mrr.event);
                        }
                    }
                }
            }
            CaseDir::Recv => {
                if let Some(sends) = ctx.most_recent_send.get(&case.channel) {
                    for mrs in sends.values() {
                        if vc.relation(&mrs.vc) == HappensBefore::Concurrent {
                            partners.push(mrs.event);
                        }
                    }
                }
                if let Some(close) = ctx.close_data.get(&case.channel) {
                    if vc.relation(&close.vc) == HappensBefore::Concurrent {
                        partners.push(close.event);
                    }
                }
            }
        }
    }

    if partners.is_empty() {
        for case in &usable {
            ctx.leak_buckets
                .entry(case.channel)
                .or_default()
                .push(LeakEntry {
                    routine,
                    channel: case.channel,
                    vc: vc.clone(),
                    tid: event.tid(),
                    op: case.dir,
                    select_pre: Some(event.pre),
                    buffered: case.buffered,
                    is_select: true,
                    select_id: select.id,
                    event: id,
                });
        }
        return;
    }

    for partner in partners {
        let (Some(select_part), Some(partner_part)) = (
            event_participant(event),
            event_participant(trace.event(partner)),
        ) else {
            continue;
        };
        ctx.sink.report(
            ResultKind::LeakSelectWith,
            "select",
            vec![select_part],
            "partner",
            vec![partner_part],
        );
    }
}

/// Runs the leak bucket of a channel against a completed operation.
///
/// A completed send or close matches parked receives; a completed receive
/// matches parked sends. Matching entries are reported with the completed
/// operation as partner and purged — select entries purge their whole
/// group.
pub(crate) fn run(
    trace: &Trace,
    ctx: &mut AnalysisContext,
    channel: ObjectId,
    completed: EventId,
    op: ChannelOp,
    buffered: bool,
    vc: &VectorClock,
) {
    let Some(bucket) = ctx.leak_buckets.get_mut(&channel) else {
        return;
    };
    if bucket.is_empty() {
        return;
    }

    let mut matched: Vec<LeakEntry> = Vec::new();
    let mut purged_groups: BTreeSet<u64> = BTreeSet::new();
    let mut keep: Vec<LeakEntry> = Vec::with_capacity(bucket.len());

    for entry in bucket.drain(..) {
        if let Some(pre) = entry.select_pre {
            if purged_groups.contains(&pre) {
                continue;
            }
        }
        let direction_matches = match op {
            ChannelOp::Send | ChannelOp::Close => entry.op == CaseDir::Recv,
            ChannelOp::Recv => entry.op == CaseDir::Send,
        };
        if direction_matches && entry.vc.relation(vc) == HappensBefore::Concurrent {
            if let Some(pre) = entry.select_pre {
                purged_groups.insert(pre);
            }
            matched.push(entry);
        } else {
            keep.push(entry);
        }
    }
    // Earlier-parked members of a purged select group.
    keep.retain(|entry| match entry.select_pre {
        Some(pre) => !purged_groups.contains(&pre),
        None => true,
    });
    *bucket = keep;

    for entry in matched {
        let kind = if entry.is_select {
            ResultKind::LeakSelectWith
        } else if buffered {
            ResultKind::LeakBufferedWith
        } else {
            ResultKind::LeakUnbufferedWith
        };
        let role1 = if entry.is_select { "select" } else { "channel" };
        let (Some(stuck_part), Some(partner_part)) = (
            entry.participant(),
            event_participant(trace.event(completed)),
        ) else {
            continue;
        };
        ctx.sink
            .report(kind, role1, vec![stuck_part], "partner", vec![partner_part]);
    }
}

/// Post-sweep resolver: pairs surviving bucket entries against select cases
/// recorded anywhere in the trace, then reports the rest as leaks without a
/// partner.
pub(crate) fn resolve(trace: &Trace, ctx: &mut AnalysisContext) {
    let buckets = std::mem::take(&mut ctx.leak_buckets);
    for (channel, bucket) in buckets {
        for entry in bucket {
            let mut partner: Option<usize> = None;
            for (k, case) in ctx.select_cases.iter().enumerate() {
                if case.channel != channel || case.select_event == entry.event {
                    continue;
                }
                let opposite = match entry.op {
                    CaseDir::Send => case.dir == CaseDir::Recv,
                    CaseDir::Recv => case.dir == CaseDir::Send,
                };
                if !opposite {
                    continue;
                }
                let hb = case.vc.relation(&entry.vc);
                if hb == HappensBefore::Concurrent {
                    partner = Some(k);
                    break;
                }
                // A buffered case can also unblock an ordered operation:
                // a send case before the stuck op fills the slot a stuck
                // recv needs, and symmetrically.
                if case.buffered
                    && ((case.dir == CaseDir::Send && hb == HappensBefore::Before)
                        || (case.dir == CaseDir::Recv && hb == HappensBefore::After))
                {
                    partner = Some(k);
                    break;
                }
            }

            match partner {
                Some(k) => {
                    let case = &ctx.select_cases[k];
                    let select_event = trace.event(case.select_event);
                    let partner_part =
                        participant_for(select_event, "SS", case.select_id);
                    let kind = if entry.is_select {
                        ResultKind::LeakSelectWith
                    } else if case.buffered {
                        ResultKind::LeakBufferedWith
                    } else {
                        ResultKind::LeakUnbufferedWith
                    };
                    let role1 = if entry.is_select { "select" } else { "channel" };
                    let (Some(stuck_part), Some(partner_part)) =
                        (entry.participant(), partner_part)
                    else {
                        continue;
                    };
                    ctx.sink.report(
                        kind,
                        role1,
                        vec![stuck_part],
                        "partner",
                        vec![partner_part],
                    );
                }
                None => {
                    let (kind, role1) = if entry.is_select {
                        (ResultKind::LeakSelectWithout, "select")
                    } else if entry.buffered {
                        (ResultKind::LeakBufferedWithout, "channel")
                    } else {
                        (ResultKind::LeakUnbufferedWithout, "channel")
                    };
                    let Some(stuck_part) = entry.participant() else {
                        continue;
                    };
                    ctx.sink.report(kind, role1, vec![stuck_part], "", vec![]);
                }
            }
        }
    }
}

/// Post-sweep scan for routines that leaked without blocking: the last
/// event completed but is not a routine end. Routines whose last event is
/// stuck are already covered by the blocked-operation leak.
pub(crate) fn check_stuck_routines(trace: &Trace, ctx: &mut AnalysisContext) {
    for r in 1..=trace.num_routines() {
        let routine = RoutineId::new(r as u32);
        let Some(last) = trace.last_event_of(routine) else {
            continue;
        };
        let event = trace.event(last);
        if matches!(event.body, EventBody::RoutineEnd) {
            continue;
        }
        if event.is_stuck() {
            continue;
        }

        let (file, line) = ctx
            .forks
            .get(&routine)
            .map(|fork| {
                let pos = &trace.event(*fork).pos;
                (pos.file.clone(), pos.line)
            })
            .unwrap_or_default();

        ctx.sink.report(
            ResultKind::LeakStuckRoutine,
            "fork",
            vec![Participant {
                routine,
                object: ObjectId::new(-1),
                pre: event.pre,
                obj_type: "GE",
                file,
                line,
            }],
            "",
            vec![],
        );
    }
}

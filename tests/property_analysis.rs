//! Property-based tests for the universal engine invariants: sort
//! stability, vector-clock monotonicity, happens-before on matched pairs,
//! leak-bucket draining, and determinism.

mod common;
use common::*;

use hindsight::analysis::{AnalysisConfig, Analyzer};
use hindsight::clock::HappensBefore;
use hindsight::trace::{Event, Trace};
use hindsight::{EventId, ResultKind, RoutineId};
use proptest::prelude::*;

const ROUTINES: u32 = 3;

/// One step of a generated schedule, routed to a routine at merge time.
#[derive(Debug, Clone, Copy)]
enum Op {
    Send(i64, u32),
    Recv(i64, u32),
    CloseChan(i64),
    StuckSend(i64, u32),
    StuckRecv(i64, u32),
    WgAdd,
    WgDone,
    WgWait,
    OnceCall(bool),
    CondWait,
    CondSignal,
    CondBroadcast,
    LockPair(i64),
}

fn arb_op() -> impl Strategy<Value = Op> {
    let chan = 1i64..3;
    let qsize = prop_oneof![Just(0u32), Just(2u32)];
    prop_oneof![
        (chan.clone(), qsize.clone()).prop_map(|(c, q)| Op::Send(c, q)),
        (chan.clone(), qsize.clone()).prop_map(|(c, q)| Op::Recv(c, q)),
        chan.clone().prop_map(Op::CloseChan),
        (chan.clone(), qsize.clone()).prop_map(|(c, q)| Op::StuckSend(c, q)),
        (chan, qsize).prop_map(|(c, q)| Op::StuckRecv(c, q)),
        Just(Op::WgAdd),
        Just(Op::WgDone),
        Just(Op::WgWait),
        any::<bool>().prop_map(Op::OnceCall),
        Just(Op::CondWait),
        Just(Op::CondSignal),
        Just(Op::CondBroadcast),
        (1i64..3).prop_map(Op::LockPair),
    ]
}

/// A random interleaved schedule. A stuck operation kills its routine, so
/// stuck events are always a routine's last.
fn arb_schedule() -> impl Strategy<Value = Vec<Event>> {
    proptest::collection::vec((0..ROUTINES, arb_op()), 0..24).prop_map(|steps| {
        let mut events = Vec::new();
        let mut dead = [false; ROUTINES as usize];
        let mut ts = 0u64;
        let mut next = || {
            ts += 2;
            ts
        };
        for (r, op) in steps {
            if dead[r as usize] {
                continue;
            }
            let routine = r + 1;
            match op {
                Op::Send(c, q) => {
                    let pre = next();
                    events.push(send(routine, pre, pre + 1, c, q, "gen.go:1"));
                }
                Op::Recv(c, q) => {
                    let pre = next();
                    events.push(recv(routine, pre, pre + 1, c, q, "gen.go:2"));
                }
                Op::CloseChan(c) => {
                    let pre = next();
                    events.push(close_chan(routine, pre, pre + 1, c, "gen.go:3"));
                }
                Op::StuckSend(c, q) => {
                    let pre = next();
                    events.push(send(routine, pre, 0, c, q, "gen.go:4"));
                    dead[r as usize] = true;
                }
                Op::StuckRecv(c, q) => {
                    let pre = next();
                    events.push(recv(routine, pre, 0, c, q, "gen.go:5"));
                    dead[r as usize] = true;
                }
                Op::WgAdd => {
                    let pre = next();
                    events.push(wg_add(routine, pre, pre + 1, 10, 1, "gen.go:6"));
                }
                Op::WgDone => {
                    let pre = next();
                    events.push(wg_done(routine, pre, pre + 1, 10, "gen.go:7"));
                }
                Op::WgWait => {
                    let pre = next();
                    events.push(wg_wait(routine, pre, pre + 1, 10, "gen.go:8"));
                }
                Op::OnceCall(success) => {
                    let pre = next();
                    events.push(once_call(routine, pre, pre + 1, 20, success, "gen.go:9"));
                }
                Op::CondWait => {
                    let pre = next();
                    events.push(cond_wait(routine, pre, pre + 1, 30, "gen.go:10"));
                }
                Op::CondSignal => {
                    let pre = next();
                    events.push(cond_signal(routine, pre, pre + 1, 30, "gen.go:11"));
                }
                Op::CondBroadcast => {
                    let pre = next();
                    events.push(cond_broadcast(routine, pre, pre + 1, 30, "gen.go:12"));
                }
                Op::LockPair(m) => {
                    let pre = next();
                    events.push(lock(routine, pre, pre + 1, m, "gen.go:13"));
                    let pre = next();
                    events.push(unlock(routine, pre, pre + 1, m, "gen.go:14"));
                }
            }
        }
        // Close surviving routines so the stuck-routine scan stays quiet.
        for r in 0..ROUTINES {
            if !dead[r as usize] && events.iter().any(|e| e.routine == RoutineId::new(r + 1)) {
                let pre = next();
                events.push(routine_end(r + 1, pre));
            }
        }
        events
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Sweep order is a stable sort by sort key, with every stuck event
    /// after every completed one.
    #[test]
    fn sweep_order_is_stable_and_stuck_last(events in arb_schedule()) {
        let trace = Trace::from_events(events);
        let order = trace.sweep_order();

        let mut expected: Vec<usize> = (0..trace.len()).collect();
        expected.sort_by_key(|&i| (trace.events()[i].sort_key(), i));
        let got: Vec<usize> = order.iter().map(|id| id.index()).collect();
        prop_assert_eq!(got, expected);

        let mut seen_stuck = false;
        for id in &order {
            let stuck = trace.event(*id).is_stuck();
            if seen_stuck {
                prop_assert!(stuck, "completed event after a stuck one");
            }
            seen_stuck = stuck;
        }
    }

    /// Per routine, every event's own coordinate strictly increases.
    #[test]
    fn vector_clocks_are_monotonic(events in arb_schedule()) {
        let trace = Trace::from_events(events);
        let outcome = Analyzer::new(AnalysisConfig::new()).analyze(&trace).unwrap();
        for r in 1..=trace.num_routines() {
            let routine = RoutineId::new(r as u32);
            let mut prev = 0u64;
            for id in trace.routine_events(routine) {
                let own = outcome.event_clock(id).get(routine);
                prop_assert!(own > prev, "own coordinate must strictly increase");
                prev = own;
            }
        }
    }

    /// Identical inputs produce identical result sequences.
    #[test]
    fn analysis_is_deterministic(events in arb_schedule()) {
        let trace = Trace::from_events(events.clone());
        let first = Analyzer::new(AnalysisConfig::new()).analyze(&trace).unwrap();
        let trace2 = Trace::from_events(events);
        let second = Analyzer::new(AnalysisConfig::new()).analyze(&trace2).unwrap();
        prop_assert_eq!(first.report().records(), second.report().records());
    }

    /// Every stuck channel operation surfaces in exactly one leak class:
    /// with a partner or without, buffered or not — never silently
    /// dropped.
    #[test]
    fn stuck_channel_ops_drain_to_reports(events in arb_schedule()) {
        let trace = Trace::from_events(events);
        let stuck_pres: Vec<u64> = trace
            .events()
            .iter()
            .filter(|e| {
                e.is_stuck()
                    && matches!(&e.body, hindsight::trace::EventBody::Channel(c)
                        if !c.id.is_nil() && c.op != hindsight::trace::ChannelOp::Close)
            })
            .map(|e| e.pre)
            .collect();

        let outcome = Analyzer::new(AnalysisConfig::new()).analyze(&trace).unwrap();
        let leak_kinds = [
            ResultKind::LeakUnbufferedWith,
            ResultKind::LeakUnbufferedWithout,
            ResultKind::LeakBufferedWith,
            ResultKind::LeakBufferedWithout,
        ];
        for pre in stuck_pres {
            let mentioned = outcome.report().records().iter().any(|record| {
                leak_kinds.contains(&record.kind)
                    && record.participants1.iter().any(|p| p.pre == pre)
            });
            prop_assert!(mentioned, "stuck op at pre {} not reported", pre);
        }
    }

    /// A matched send/recv pair is ordered send-before-recv.
    #[test]
    fn matched_pairs_are_ordered(
        pairs in proptest::collection::vec((0..ROUTINES, 0..ROUTINES, 1i64..3, prop_oneof![Just(0u32), Just(2u32)]), 1..4),
    ) {
        let mut events = Vec::new();
        let mut sends = Vec::new();
        let mut recvs = Vec::new();
        for (k, &(sender, _, chan, qsize)) in pairs.iter().enumerate() {
            let pre = 2 * k as u64 + 1;
            sends.push(events.len());
            events.push(send_paired(sender + 1, pre, pre + 1, chan, qsize, k as u64 + 1, "s.go:1"));
        }
        for (k, &(_, receiver, chan, qsize)) in pairs.iter().enumerate() {
            let pre = 100 + 2 * k as u64;
            recvs.push(events.len());
            events.push(recv_paired(receiver + 1, pre, pre + 1, chan, qsize, k as u64 + 1, "r.go:1"));
        }
        let trace = Trace::from_events(events);
        let outcome = Analyzer::new(AnalysisConfig::new()).analyze(&trace).unwrap();
        for (s, r) in sends.into_iter().zip(recvs) {
            prop_assert_eq!(
                outcome.event_clock(EventId::new(s)).relation(outcome.event_clock(EventId::new(r))),
                HappensBefore::Before
            );
        }
    }
}

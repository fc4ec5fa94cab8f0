//! Happens-before sweep benchmarks.
//!
//! Measures the full analysis (sort, sweep, detectors, post-sweep phases)
//! over synthetic traces:
//!
//! - `ping_pong`: paired sends/receives across routines (channel-heavy)
//! - `lock_heavy`: nested lock pairs feeding the deadlock recorder
//! - `mixed`: channels, wait groups and locks interleaved

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hindsight::analysis::{AnalysisConfig, Analyzer};
use hindsight::trace::{
    ChannelEvent, ChannelOp, Event, EventBody, MutexEvent, MutexOp, SourcePos, Trace, WaitEvent,
    WaitOp,
};
use hindsight::{ObjectId, RoutineId};

const ROUTINES: u32 = 8;

fn channel_event(
    routine: u32,
    pre: u64,
    chan: i64,
    op: ChannelOp,
    partner: u64,
    qsize: u32,
) -> Event {
    Event {
        routine: RoutineId::new(routine),
        pre,
        post: pre + 1,
        pos: SourcePos::new("bench.go", routine),
        body: EventBody::Channel(ChannelEvent {
            id: ObjectId::new(chan),
            op,
            closed: false,
            partner,
            qsize,
        }),
    }
}

fn mutex_event(routine: u32, pre: u64, id: i64, op: MutexOp) -> Event {
    Event {
        routine: RoutineId::new(routine),
        pre,
        post: pre + 1,
        pos: SourcePos::new("bench.go", routine),
        body: EventBody::Mutex(MutexEvent {
            id: ObjectId::new(id),
            rw: false,
            op,
            success: true,
        }),
    }
}

fn wait_event(routine: u32, pre: u64, id: i64, op: WaitOp, delta: i64) -> Event {
    Event {
        routine: RoutineId::new(routine),
        pre,
        post: pre + 1,
        pos: SourcePos::new("bench.go", routine),
        body: EventBody::Wait(WaitEvent {
            id: ObjectId::new(id),
            op,
            delta,
            value: 0,
        }),
    }
}

/// Paired send/recv traffic between routine pairs.
fn ping_pong_trace(pairs: usize) -> Trace {
    let mut events = Vec::with_capacity(pairs * 2);
    let mut ts = 0u64;
    for k in 0..pairs {
        let sender = (k as u32 % ROUTINES) + 1;
        let receiver = ((k as u32 + 1) % ROUTINES) + 1;
        let chan = (k % 4) as i64 + 1;
        ts += 2;
        events.push(channel_event(sender, ts, chan, ChannelOp::Send, k as u64 + 1, 0));
        ts += 2;
        events.push(channel_event(receiver, ts, chan, ChannelOp::Recv, k as u64 + 1, 0));
    }
    Trace::from_events(events)
}

/// Nested lock pairs per routine; exercises the dependency store and the
/// cycle DFS.
fn lock_heavy_trace(rounds: usize) -> Trace {
    let mut events = Vec::with_capacity(rounds * 4);
    let mut ts = 0u64;
    for k in 0..rounds {
        let routine = (k as u32 % ROUTINES) + 1;
        let outer = (k % 3) as i64 + 1;
        let inner = ((k + 1) % 3) as i64 + 1;
        for op in [
            (outer, MutexOp::Lock),
            (inner, MutexOp::Lock),
            (inner, MutexOp::Unlock),
            (outer, MutexOp::Unlock),
        ] {
            ts += 2;
            events.push(mutex_event(routine, ts, op.0, op.1));
        }
    }
    Trace::from_events(events)
}

/// Channels, wait-group traffic and lock pairs interleaved.
fn mixed_trace(rounds: usize) -> Trace {
    let mut events = Vec::with_capacity(rounds * 5);
    let mut ts = 0u64;
    for k in 0..rounds {
        let routine = (k as u32 % ROUTINES) + 1;
        let peer = ((k as u32 + 3) % ROUTINES) + 1;
        ts += 2;
        events.push(channel_event(routine, ts, 1, ChannelOp::Send, k as u64 + 1, 2));
        ts += 2;
        events.push(channel_event(peer, ts, 1, ChannelOp::Recv, k as u64 + 1, 2));
        let wg = 9 + (k % 16) as i64;
        ts += 2;
        events.push(wait_event(routine, ts, wg, WaitOp::Add, 1));
        ts += 2;
        events.push(wait_event(peer, ts, wg, WaitOp::Done, 0));
        ts += 2;
        events.push(mutex_event(routine, ts, 5, MutexOp::Lock));
        ts += 2;
        events.push(mutex_event(routine, ts, 5, MutexOp::Unlock));
    }
    Trace::from_events(events)
}

fn bench_sweep(c: &mut Criterion) {
    let analyzer = Analyzer::new(AnalysisConfig::new());
    let mut group = c.benchmark_group("hb_sweep");

    for size in [1_000usize, 10_000] {
        let trace = ping_pong_trace(size);
        group.throughput(Throughput::Elements(trace.len() as u64));
        group.bench_with_input(BenchmarkId::new("ping_pong", size), &trace, |b, trace| {
            b.iter(|| analyzer.analyze(trace).unwrap());
        });

        let trace = lock_heavy_trace(size / 2);
        group.throughput(Throughput::Elements(trace.len() as u64));
        group.bench_with_input(BenchmarkId::new("lock_heavy", size), &trace, |b, trace| {
            b.iter(|| analyzer.analyze(trace).unwrap());
        });

        let trace = mixed_trace(size / 3);
        group.throughput(Throughput::Elements(trace.len() as u64));
        group.bench_with_input(BenchmarkId::new("mixed", size), &trace, |b, trace| {
            b.iter(|| analyzer.analyze(trace).unwrap());
        });
    }
    group.finish();
}

fn bench_sort(c: &mut Criterion) {
    let trace = mixed_trace(20_000);
    c.bench_function("sweep_order_120k", |b| {
        b.iter(|| trace.sweep_order());
    });
}

criterion_group!(benches, bench_sweep, bench_sort);
criterion_main!(benches);

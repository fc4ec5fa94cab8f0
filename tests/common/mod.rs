//! Shared fixture builders for integration tests.
//!
//! Events are constructed with explicit pre/post timestamps so the tests
//! read like the recorded schedules they model. `post = 0` marks a stuck
//! operation.

#![allow(dead_code)]

use hindsight::trace::{
    AtomicEvent, AtomicOp, CaseDir, ChannelEvent, ChannelOp, CondEvent, CondOp, Event, EventBody,
    MutexEvent, MutexOp, OnceEvent, SelectCase, SelectEvent, SourcePos, WaitEvent, WaitOp,
};
use hindsight::{ObjectId, RoutineId};

fn pos(p: &str) -> SourcePos {
    SourcePos::parse(p).expect("fixture pos must be file:line")
}

fn event(routine: u32, pre: u64, post: u64, p: &str, body: EventBody) -> Event {
    Event {
        routine: RoutineId::new(routine),
        pre,
        post,
        pos: pos(p),
        body,
    }
}

fn channel(
    routine: u32,
    pre: u64,
    post: u64,
    chan: i64,
    op: ChannelOp,
    closed: bool,
    partner: u64,
    qsize: u32,
    p: &str,
) -> Event {
    event(
        routine,
        pre,
        post,
        p,
        EventBody::Channel(ChannelEvent {
            id: ObjectId::new(chan),
            op,
            closed,
            partner,
            qsize,
        }),
    )
}

/// A send with no recorded partner.
pub fn send(routine: u32, pre: u64, post: u64, chan: i64, qsize: u32, p: &str) -> Event {
    channel(routine, pre, post, chan, ChannelOp::Send, false, 0, qsize, p)
}

/// A send paired with the matching receive via the recorder's partner id.
pub fn send_paired(
    routine: u32,
    pre: u64,
    post: u64,
    chan: i64,
    qsize: u32,
    partner: u64,
    p: &str,
) -> Event {
    channel(routine, pre, post, chan, ChannelOp::Send, false, partner, qsize, p)
}

/// A send that completed because the channel was closed.
pub fn send_closed(routine: u32, pre: u64, post: u64, chan: i64, qsize: u32, p: &str) -> Event {
    channel(routine, pre, post, chan, ChannelOp::Send, true, 0, qsize, p)
}

/// A receive with no recorded partner.
pub fn recv(routine: u32, pre: u64, post: u64, chan: i64, qsize: u32, p: &str) -> Event {
    channel(routine, pre, post, chan, ChannelOp::Recv, false, 0, qsize, p)
}

/// A receive paired with its send via the recorder's partner id.
pub fn recv_paired(
    routine: u32,
    pre: u64,
    post: u64,
    chan: i64,
    qsize: u32,
    partner: u64,
    p: &str,
) -> Event {
    channel(routine, pre, post, chan, ChannelOp::Recv, false, partner, qsize, p)
}

/// A receive that completed because the channel was closed.
pub fn recv_closed(routine: u32, pre: u64, post: u64, chan: i64, qsize: u32, p: &str) -> Event {
    channel(routine, pre, post, chan, ChannelOp::Recv, true, 0, qsize, p)
}

/// A channel close.
pub fn close_chan(routine: u32, pre: u64, post: u64, chan: i64, p: &str) -> Event {
    channel(routine, pre, post, chan, ChannelOp::Close, false, 0, 0, p)
}

/// A select case.
pub fn case(chan: i64, dir: CaseDir, buffered: bool) -> SelectCase {
    SelectCase {
        channel: ObjectId::new(chan),
        dir,
        buffered,
    }
}

/// A select statement; `chosen` is the fired case index or -1.
pub fn select(
    routine: u32,
    pre: u64,
    post: u64,
    id: i64,
    cases: Vec<SelectCase>,
    chosen: i32,
    p: &str,
) -> Event {
    event(
        routine,
        pre,
        post,
        p,
        EventBody::Select(SelectEvent {
            id: ObjectId::new(id),
            cases: cases.into_iter().collect(),
            chosen,
        }),
    )
}

fn mutex(
    routine: u32,
    pre: u64,
    post: u64,
    id: i64,
    rw: bool,
    op: MutexOp,
    success: bool,
    p: &str,
) -> Event {
    event(
        routine,
        pre,
        post,
        p,
        EventBody::Mutex(MutexEvent {
            id: ObjectId::new(id),
            rw,
            op,
            success,
        }),
    )
}

/// A blocking write lock.
pub fn lock(routine: u32, pre: u64, post: u64, id: i64, p: &str) -> Event {
    mutex(routine, pre, post, id, false, MutexOp::Lock, true, p)
}

/// A write unlock.
pub fn unlock(routine: u32, pre: u64, post: u64, id: i64, p: &str) -> Event {
    mutex(routine, pre, post, id, false, MutexOp::Unlock, true, p)
}

/// A blocking read lock.
pub fn rlock(routine: u32, pre: u64, post: u64, id: i64, p: &str) -> Event {
    mutex(routine, pre, post, id, true, MutexOp::RLock, true, p)
}

/// A read unlock.
pub fn runlock(routine: u32, pre: u64, post: u64, id: i64, p: &str) -> Event {
    mutex(routine, pre, post, id, true, MutexOp::RUnlock, true, p)
}

/// A try-lock with the recorded success bit.
pub fn try_lock(routine: u32, pre: u64, post: u64, id: i64, success: bool, p: &str) -> Event {
    mutex(routine, pre, post, id, false, MutexOp::TryLock, success, p)
}

fn wait(routine: u32, pre: u64, post: u64, id: i64, op: WaitOp, delta: i64, p: &str) -> Event {
    event(
        routine,
        pre,
        post,
        p,
        EventBody::Wait(WaitEvent {
            id: ObjectId::new(id),
            op,
            delta,
            value: 0,
        }),
    )
}

/// A wait-group add.
pub fn wg_add(routine: u32, pre: u64, post: u64, id: i64, delta: i64, p: &str) -> Event {
    wait(routine, pre, post, id, WaitOp::Add, delta, p)
}

/// A wait-group done.
pub fn wg_done(routine: u32, pre: u64, post: u64, id: i64, p: &str) -> Event {
    wait(routine, pre, post, id, WaitOp::Done, 0, p)
}

/// A wait-group wait.
pub fn wg_wait(routine: u32, pre: u64, post: u64, id: i64, p: &str) -> Event {
    wait(routine, pre, post, id, WaitOp::Wait, 0, p)
}

/// A once invocation; `success` marks the executing call.
pub fn once_call(routine: u32, pre: u64, post: u64, id: i64, success: bool, p: &str) -> Event {
    event(
        routine,
        pre,
        post,
        p,
        EventBody::Once(OnceEvent {
            id: ObjectId::new(id),
            success,
        }),
    )
}

fn cond(routine: u32, pre: u64, post: u64, id: i64, op: CondOp, p: &str) -> Event {
    event(
        routine,
        pre,
        post,
        p,
        EventBody::Cond(CondEvent {
            id: ObjectId::new(id),
            op,
        }),
    )
}

/// A condition-variable wait.
pub fn cond_wait(routine: u32, pre: u64, post: u64, id: i64, p: &str) -> Event {
    cond(routine, pre, post, id, CondOp::Wait, p)
}

/// A condition-variable signal.
pub fn cond_signal(routine: u32, pre: u64, post: u64, id: i64, p: &str) -> Event {
    cond(routine, pre, post, id, CondOp::Signal, p)
}

/// A condition-variable broadcast.
pub fn cond_broadcast(routine: u32, pre: u64, post: u64, id: i64, p: &str) -> Event {
    cond(routine, pre, post, id, CondOp::Broadcast, p)
}

/// A fork of a child routine.
pub fn fork(routine: u32, pre: u64, post: u64, child: u32, p: &str) -> Event {
    event(
        routine,
        pre,
        post,
        p,
        EventBody::Fork {
            child: RoutineId::new(child),
        },
    )
}

/// A routine end marker.
pub fn routine_end(routine: u32, pre: u64) -> Event {
    Event {
        routine: RoutineId::new(routine),
        pre,
        post: pre,
        pos: SourcePos::unknown(),
        body: EventBody::RoutineEnd,
    }
}

/// An atomic operation.
pub fn atomic(routine: u32, pre: u64, id: i64, op: AtomicOp) -> Event {
    Event {
        routine: RoutineId::new(routine),
        pre,
        post: pre,
        pos: SourcePos::unknown(),
        body: EventBody::Atomic(AtomicEvent {
            id: ObjectId::new(id),
            op,
            addr: 0,
        }),
    }
}

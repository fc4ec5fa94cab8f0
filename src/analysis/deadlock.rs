//! Resource-deadlock detector: lock-dependency mining and cycle search.
//!
//! During the sweep, every acquire of a lock `l` by a thread already
//! holding a non-empty lockset records the abstract dependency
//! `(thread, l, lockset, request)`. After the sweep, a DFS over threads
//! searches the dependencies for lock-order cycles. A chain of
//! dependencies predicts a deadlock when:
//!
//! - the locksets on the chain are pairwise conflict-disjoint,
//! - the lock requested by each chain entry is held by the next entry
//!   (conflicts with a member of its lockset),
//! - the last entry's requested lock closes the cycle back into the
//!   first lockset.
//!
//! Reader/writer locks stay distinct [`LockId`]s everywhere; only the
//! conflict relation treats `(object, read)` and `(object, write)` as
//! non-disjoint. Two read locks on the same object never conflict.
//!
//! Request lists are bounded: a new request evicts a stored one whose
//! clock is equal outside the thread's own coordinate (loop iterations),
//! and a hard cap per dependency evicts the oldest beyond that.
//!
//! # References
//!
//! - Zhou et al., "UNDEAD: Detecting and Preventing Deadlocks in
//!   Production Software" (ASE 2017) — the chain criteria and the
//!   thread-local dependency mining.

use crate::analysis::AnalysisContext;
use crate::clock::VectorClock;
use crate::results::{Participant, ResultKind};
use crate::trace::event::parse_tid;
use crate::trace::Trace;
use crate::types::{EventId, ObjectId, RoutineId};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::error::HindsightError;

/// A lock as seen by the deadlock detector: object plus read/write side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct LockId {
    /// The mutex object.
    pub object: ObjectId,
    /// True for the read side of a RW lock.
    pub read: bool,
}

impl LockId {
    pub(crate) const fn new(object: ObjectId, read: bool) -> Self {
        Self { object, read }
    }

    /// Two locks conflict when they target the same object and at least
    /// one side is a write lock.
    pub(crate) const fn conflicts(self, other: Self) -> bool {
        self.object.get() == other.object.get() && !(self.read && other.read)
    }
}

/// The set of locks a thread currently holds.
pub(crate) type Lockset = SmallVec<[LockId; 4]>;

fn lockset_contains(ls: &Lockset, lock: LockId) -> bool {
    ls.iter().any(|&held| held == lock)
}

fn lockset_equal(a: &Lockset, b: &Lockset) -> bool {
    a.len() == b.len() && a.iter().all(|&lock| lockset_contains(b, lock))
}

/// Conflict-aware disjointness: no member of `a` conflicts with a member
/// of `b`.
fn lockset_disjoint(a: &Lockset, b: &Lockset) -> bool {
    !a.iter().any(|&x| b.iter().any(|&y| x.conflicts(y)))
}

/// One acquire request backing a lock dependency. The owning thread is the
/// dependency-store key.
#[derive(Debug, Clone)]
pub(crate) struct AcquireReq {
    /// The acquire event.
    pub event: EventId,
    /// Trace identifier of the acquire.
    pub tid: String,
    /// Clock of the request.
    pub vc: VectorClock,
}

/// Requests grouped under one `(lock, lockset)` pair.
#[derive(Debug, Clone)]
struct Dep {
    lockset: Lockset,
    requests: Vec<AcquireReq>,
}

/// Per-thread lockset and dependency store.
#[derive(Debug, Clone, Default)]
struct ThreadState {
    lockset: Lockset,
    deps: BTreeMap<LockId, Vec<Dep>>,
}

/// The deadlock detector's recording state.
#[derive(Debug, Clone)]
pub(crate) struct DeadlockState {
    threads: BTreeMap<RoutineId, ThreadState>,
    max_requests: usize,
}

impl DeadlockState {
    pub(crate) fn new(max_requests: usize) -> Self {
        Self {
            threads: BTreeMap::new(),
            max_requests: max_requests.max(1),
        }
    }

    /// Records an acquire. A request under a non-empty lockset becomes a
    /// dependency; completed acquires extend the lockset (idempotently —
    /// recursive read locks collapse).
    pub(crate) fn acquire(
        &mut self,
        routine: RoutineId,
        lock: LockId,
        req: AcquireReq,
        completed: bool,
    ) {
        let max_requests = self.max_requests;
        let thread = self.threads.entry(routine).or_default();
        if !thread.lockset.is_empty() {
            let deps = thread.deps.entry(lock).or_default();
            insert_dep(deps, &thread.lockset, req, max_requests, routine);
        }
        if completed && !lockset_contains(&thread.lockset, lock) {
            thread.lockset.push(lock);
        }
    }

    /// Records a release. The lock is removed from the releasing thread's
    /// lockset; a lock held by another thread (cross-routine unlock) is
    /// removed there. Releasing a lock nobody holds violates the lockset
    /// invariant.
    pub(crate) fn release(
        &mut self,
        routine: RoutineId,
        lock: LockId,
    ) -> Result<(), HindsightError> {
        if let Some(thread) = self.threads.get_mut(&routine) {
            if let Some(i) = thread.lockset.iter().position(|&held| held == lock) {
                thread.lockset.remove(i);
                return Ok(());
            }
        }
        for (&holder, thread) in self.threads.iter_mut() {
            if let Some(i) = thread.lockset.iter().position(|&held| held == lock) {
                debug!(%routine, %holder, object = %lock.object, "cross-routine unlock");
                thread.lockset.remove(i);
                return Ok(());
            }
        }
        Err(HindsightError::invariant("release-without-hold"))
    }
}

/// True if the clocks agree on every coordinate except the thread's own.
///
/// Two requests of the same thread with such clocks differ only by loop
/// iterations without intervening synchronization; the newer one replaces
/// the older.
fn equal_modulo_thread(routine: RoutineId, a: &VectorClock, b: &VectorClock) -> bool {
    let width = a.width().max(b.width());
    for i in 0..width {
        if i == routine.index() {
            continue;
        }
        let r = RoutineId::new(i as u32 + 1);
        if a.get(r) != b.get(r) {
            return false;
        }
    }
    true
}

/// Inserts a request, merging with an existing `(lock, lockset)` entry and
/// applying the eviction rules.
fn insert_dep(
    deps: &mut Vec<Dep>,
    lockset: &Lockset,
    req: AcquireReq,
    max_requests: usize,
    routine: RoutineId,
) {
    for dep in deps.iter_mut() {
        if !lockset_equal(&dep.lockset, lockset) {
            continue;
        }
        for existing in dep.requests.iter_mut() {
            if equal_modulo_thread(routine, &req.vc, &existing.vc) {
                *existing = req;
                return;
            }
        }
        if dep.requests.len() >= max_requests {
            dep.requests.remove(0);
        }
        dep.requests.push(req);
        return;
    }
    deps.push(Dep {
        lockset: lockset.clone(),
        requests: vec![req],
    });
}

/// Convenience constructor for the recording half.
pub(crate) fn request(
    event: &crate::trace::Event,
    id: EventId,
    vc: VectorClock,
) -> AcquireReq {
    AcquireReq {
        event: id,
        tid: event.tid(),
        vc,
    }
}

/// One thread's contribution to a reported cycle.
#[derive(Debug, Clone)]
struct CycleEntry {
    thread: RoutineId,
    lock: LockId,
    lockset: Lockset,
    requests: Vec<AcquireReq>,
}

type Cycle = Vec<CycleEntry>;

/// A dependency on the DFS chain.
#[derive(Clone, Copy)]
struct ChainDep<'a> {
    thread: RoutineId,
    lock: LockId,
    lockset: &'a Lockset,
    requests: &'a [AcquireReq],
}

/// Chain test: the candidate's lockset is conflict-disjoint from every
/// stacked lockset, its requested lock repeats (or conflicts with) no
/// stacked request, and the top's requested lock is held by the candidate.
fn is_chain(stack: &[ChainDep<'_>], candidate: &ChainDep<'_>) -> bool {
    for dep in stack {
        if dep.lock.conflicts(candidate.lock) {
            return false;
        }
        if !lockset_disjoint(dep.lockset, candidate.lockset) {
            return false;
        }
    }
    let Some(top) = stack.last() else {
        return false;
    };
    candidate.lockset.iter().any(|&held| top.lock.conflicts(held))
}

/// Cycle-closure test: the candidate's requested lock is held by the
/// first chain entry.
fn is_cycle_chain(stack: &[ChainDep<'_>], candidate: &ChainDep<'_>) -> bool {
    stack[0]
        .lockset
        .iter()
        .any(|&held| candidate.lock.conflicts(held))
}

/// Enumerates all cyclic lock dependencies.
fn find_cycles(state: &DeadlockState) -> Vec<Cycle> {
    let mut cycles = Vec::new();
    let mut traversed: BTreeSet<RoutineId> = BTreeSet::new();

    for (&start, thread) in &state.threads {
        if thread.deps.is_empty() {
            continue;
        }
        // The start thread stays traversed afterwards, so each cycle is
        // discovered once rather than per rotation.
        traversed.insert(start);
        for (&lock, deps) in &thread.deps {
            for dep in deps {
                let mut stack = vec![ChainDep {
                    thread: start,
                    lock,
                    lockset: &dep.lockset,
                    requests: &dep.requests,
                }];
                dfs(state, &mut stack, &mut traversed, &mut cycles);
            }
        }
    }
    cycles
}

fn dfs<'a>(
    state: &'a DeadlockState,
    stack: &mut Vec<ChainDep<'a>>,
    traversed: &mut BTreeSet<RoutineId>,
    cycles: &mut Vec<Cycle>,
) {
    for (&tid, thread) in &state.threads {
        if thread.deps.is_empty() || traversed.contains(&tid) {
            continue;
        }
        for (&lock, deps) in &thread.deps {
            for dep in deps {
                let candidate = ChainDep {
                    thread: tid,
                    lock,
                    lockset: &dep.lockset,
                    requests: &dep.requests,
                };
                if !is_chain(stack, &candidate) {
                    continue;
                }
                if is_cycle_chain(stack, &candidate) {
                    let mut cycle: Cycle = stack
                        .iter()
                        .map(|d| CycleEntry {
                            thread: d.thread,
                            lock: d.lock,
                            lockset: d.lockset.clone(),
                            requests: d.requests.to_vec(),
                        })
                        .collect();
                    cycle.push(CycleEntry {
                        thread: tid,
                        lock,
                        lockset: dep.lockset.clone(),
                        requests: dep.requests.clone(),
                    });
                    cycles.push(cycle);
                } else {
                    traversed.insert(tid);
                    stack.push(candidate);
                    dfs(state, stack, traversed, cycles);
                    stack.pop();
                    traversed.remove(&tid);
                }
            }
        }
    }
}

/// Post-sweep phase: searches for cycles and reports each as P04 with one
/// chain-entry participant per thread.
pub(crate) fn check_cycles(_trace: &Trace, ctx: &mut AnalysisContext) {
    let cycles = find_cycles(&ctx.deadlock);
    if !cycles.is_empty() {
        debug!(cycles = cycles.len(), "lock-order cycles found");
    }
    for cycle in cycles {
        debug!(
            entries = cycle.len(),
            first_request = %cycle[0].requests[0].event,
            "reporting lock-order cycle"
        );
        let mut participants = Vec::with_capacity(cycle.len());
        for entry in &cycle {
            let req = &entry.requests[0];
            match parse_tid(&req.tid) {
                Some((file, line, pre)) => participants.push(Participant {
                    routine: entry.thread,
                    object: entry.lock.object,
                    pre,
                    obj_type: "DC",
                    file,
                    line,
                }),
                None => {
                    warn!(tid = %req.tid, "trace identifier does not round-trip; skipping participant");
                }
            }
        }
        if participants.is_empty() {
            continue;
        }
        ctx.sink.report(
            ResultKind::PossibleCyclicDeadlock,
            "head",
            vec![participants[0].clone()],
            "tail",
            participants,
        );
    }
}

/// Recording entry points used by the mutex detector.
pub(crate) fn acquire(
    ctx: &mut AnalysisContext,
    routine: RoutineId,
    lock: LockId,
    req: AcquireReq,
    completed: bool,
) {
    ctx.deadlock.acquire(routine, lock, req, completed);
}

/// See [`DeadlockState::release`].
pub(crate) fn release(
    ctx: &mut AnalysisContext,
    routine: RoutineId,
    lock: LockId,
) -> Result<(), HindsightError> {
    ctx.deadlock.release(routine, lock)
}

//! Trace model: the flat event arena and its ordering.
//!
//! A [`Trace`] owns every recorded event in a flat arena indexed by
//! [`EventId`]. Cross-references between events (partners, fork sites,
//! result records) go through indices, never owned pointers. The arena is
//! retained in memory for the whole analysis.
//!
//! # Submodules
//!
//! - [`event`]: event envelope and tagged payload union
//! - [`reader`]: trace-directory ingestion

pub mod event;
pub mod reader;

pub use event::{
    AtomicEvent, AtomicOp, CaseDir, ChannelEvent, ChannelOp, CondEvent, CondOp, Event, EventBody,
    MutexEvent, MutexOp, OnceEvent, SelectCase, SelectEvent, SourcePos, WaitEvent, WaitOp,
};
pub use reader::{read_trace_dir, ReaderConfig};

use crate::types::{EventId, RoutineId};

/// A complete recorded trace: all events of all routines.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    events: Vec<Event>,
    num_routines: usize,
}

impl Trace {
    /// Builds a trace from events, deriving the routine count from the
    /// largest routine id observed (including fork targets).
    #[must_use]
    pub fn from_events(events: Vec<Event>) -> Self {
        let mut max_routine = 0usize;
        for event in &events {
            max_routine = max_routine.max(event.routine.get() as usize);
            if let EventBody::Fork { child } = event.body {
                max_routine = max_routine.max(child.get() as usize);
            }
        }
        Self {
            events,
            num_routines: max_routine,
        }
    }

    /// Builds a trace with an explicit routine count (must cover every
    /// routine id referenced by the events).
    #[must_use]
    pub fn with_routines(events: Vec<Event>, num_routines: usize) -> Self {
        let derived = Self::from_events(events);
        Self {
            num_routines: derived.num_routines.max(num_routines),
            ..derived
        }
    }

    /// All events in arena order (per-routine recorded order, routines
    /// concatenated).
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// The event behind an arena index.
    #[must_use]
    pub fn event(&self, id: EventId) -> &Event {
        &self.events[id.index()]
    }

    /// Number of events in the trace.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if the trace holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of routines (width of every vector clock).
    #[must_use]
    pub const fn num_routines(&self) -> usize {
        self.num_routines
    }

    /// Event ids in sweep order: stable-sorted by [`Event::sort_key`], so
    /// per-routine order is preserved and every stuck event comes after all
    /// completed events.
    #[must_use]
    pub fn sweep_order(&self) -> Vec<EventId> {
        let mut order: Vec<EventId> = (0..self.events.len()).map(EventId::new).collect();
        order.sort_by_key(|id| self.events[id.index()].sort_key());
        order
    }

    /// Event ids of one routine, in recorded order.
    pub fn routine_events(&self, routine: RoutineId) -> impl Iterator<Item = EventId> + '_ {
        self.events
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.routine == routine)
            .map(|(i, _)| EventId::new(i))
    }

    /// The last recorded event of a routine, if any.
    #[must_use]
    pub fn last_event_of(&self, routine: RoutineId) -> Option<EventId> {
        self.routine_events(routine).last()
    }
}

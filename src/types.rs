//! Core identifier types shared across the trace model and the analysis.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Identifier of a routine (lightweight concurrent execution unit).
///
/// Routine ids are 1-based, matching the recorder's `trace_<routine>.log`
/// numbering; each routine owns one vector-clock coordinate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RoutineId(u32);

impl RoutineId {
    /// Creates a routine id from its 1-based value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the 1-based id value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns the 0-based clock coordinate for this routine.
    #[must_use]
    pub const fn index(self) -> usize {
        (self.0 as usize).saturating_sub(1)
    }
}

impl fmt::Display for RoutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a synchronization object (channel, mutex, wait group, …).
///
/// Ids at or below zero denote a nil object; the recorder emits `-1` (some
/// versions `0`) for operations on nil channels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ObjectId(i64);

impl ObjectId {
    /// Creates an object id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// True if this id denotes a nil object.
    #[must_use]
    pub const fn is_nil(self) -> bool {
        self.0 <= 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of an event in the flat event arena.
///
/// Events reference each other through indices rather than owned pointers;
/// the arena lives for the whole analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(usize);

impl EventId {
    /// Creates an event id from an arena index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the underlying arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routine_index_is_zero_based() {
        assert_eq!(RoutineId::new(1).index(), 0);
        assert_eq!(RoutineId::new(7).index(), 6);
    }

    #[test]
    fn nil_object_ids() {
        assert!(ObjectId::new(-1).is_nil());
        assert!(ObjectId::new(0).is_nil());
        assert!(!ObjectId::new(1).is_nil());
    }
}

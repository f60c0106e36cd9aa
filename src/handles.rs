//! Generation-checked handle arena for tracker sessions.
//!
//! Foreign-language bindings cannot hold Rust ownership, so sessions are
//! parked in an arena and addressed by small integer handles. A handle
//! carries the generation of the slot it was issued for; destroying a
//! session bumps the slot's generation, so stale handles from a destroyed
//! session can never reach a session that happens to reuse the slot.
//!
//! The arena is the sole owner of its sessions: callers get borrows, never
//! a second owner.

use crate::tracker::EyeTracker;

/// A generation-checked handle to an [`EyeTracker`] in a [`TrackerArena`].
///
/// Handles are plain data: copyable, hashable, and meaningless outside the
/// arena that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackerHandle {
    index: u32,
    generation: u32,
}

impl TrackerHandle {
    /// The raw slot index, for diagnostics.
    pub fn index(&self) -> u32 {
        self.index
    }
}

struct Slot {
    generation: u32,
    tracker: Option<EyeTracker>,
}

/// Arena of tracker sessions with explicit create/destroy.
#[derive(Default)]
pub struct TrackerArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl TrackerArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Takes ownership of a session and returns its handle.
    pub fn insert(&mut self, tracker: EyeTracker) -> TrackerHandle {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.tracker = Some(tracker);
                TrackerHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    tracker: Some(tracker),
                });
                TrackerHandle {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Borrows the session for a handle, or `None` if the handle is stale
    /// or was never issued by this arena.
    pub fn get(&self, handle: TrackerHandle) -> Option<&EyeTracker> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.tracker.as_ref()
    }

    /// Mutable twin of [`get`](Self::get).
    pub fn get_mut(&mut self, handle: TrackerHandle) -> Option<&mut EyeTracker> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.tracker.as_mut()
    }

    /// Destroys a session, returning it. The slot's generation is bumped so
    /// the handle (and any copy of it) is dead from here on.
    pub fn remove(&mut self, handle: TrackerHandle) -> Option<EyeTracker> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let tracker = slot.tracker.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Some(tracker)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.tracker.is_some()).count()
    }

    /// Returns true if no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TrackerBackend;
    use crate::simulator::SimulatorBackend;
    use std::sync::Arc;

    fn session() -> EyeTracker {
        EyeTracker::new(Arc::new(SimulatorBackend::new()) as Arc<dyn TrackerBackend>)
    }

    #[test]
    fn test_insert_get_remove() {
        let mut arena = TrackerArena::new();
        assert!(arena.is_empty());

        let handle = arena.insert(session());
        assert_eq!(arena.len(), 1);
        assert!(arena.get(handle).is_some());
        assert!(arena.get_mut(handle).is_some());

        assert!(arena.remove(handle).is_some());
        assert!(arena.is_empty());
        assert!(arena.get(handle).is_none());
    }

    #[test]
    fn test_stale_handle_does_not_reach_reused_slot() {
        let mut arena = TrackerArena::new();
        let old = arena.insert(session());
        arena.remove(old);

        // The slot is reused, but under a new generation.
        let new = arena.insert(session());
        assert_eq!(old.index(), new.index());
        assert!(arena.get(old).is_none());
        assert!(arena.remove(old).is_none());
        assert!(arena.get(new).is_some());
    }

    #[test]
    fn test_handles_are_independent() {
        let mut arena = TrackerArena::new();
        let a = arena.insert(session());
        let b = arena.insert(session());
        assert_ne!(a, b);

        arena.remove(a);
        assert!(arena.get(b).is_some());
        assert_eq!(arena.len(), 1);
    }
}

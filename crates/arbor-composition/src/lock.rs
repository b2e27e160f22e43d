//! Tree-wide reader/writer lock with per-thread re-entrancy
//!
//! One lock guards every structural mutation of a hierarchy. Writers
//! (attach, detach, compose) take it exclusively; export queries take it
//! shared. A thread that already holds the lock in either mode skips
//! reacquiring it for reads, and a thread holding it for writing skips
//! reacquiring it for writes. Upgrading a read to a write is refused.

use arbor_core::{ArborError, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

thread_local! {
    static HELD: RefCell<Vec<(u64, Mode)>> = const { RefCell::new(Vec::new()) };
}

fn held_mode(lock_id: u64) -> Option<Mode> {
    HELD.with(|held| {
        let held = held.borrow();
        // A write entry anywhere in the stack dominates.
        let mut mode = None;
        for (id, m) in held.iter() {
            if *id == lock_id {
                if *m == Mode::Write {
                    return Some(Mode::Write);
                }
                mode = Some(*m);
            }
        }
        mode
    })
}

/// The hierarchy's structural lock
#[derive(Debug)]
pub struct HierarchyLock {
    id: u64,
    gate: RwLock<()>,
}

enum GuardKind<'a> {
    Read(RwLockReadGuard<'a, ()>),
    Write(RwLockWriteGuard<'a, ()>),
    Reentrant,
}

/// Held lock; releases (or pops the re-entrant marker) on drop
pub struct HierarchyGuard<'a> {
    lock_id: u64,
    kind: GuardKind<'a>,
}

impl HierarchyGuard<'_> {
    /// Whether this guard actually acquired the lock
    pub fn is_reentrant(&self) -> bool {
        matches!(self.kind, GuardKind::Reentrant)
    }

    /// Whether this guard grants exclusive access
    pub fn is_exclusive(&self) -> bool {
        match self.kind {
            GuardKind::Write(_) => true,
            GuardKind::Read(_) => false,
            GuardKind::Reentrant => held_mode(self.lock_id) == Some(Mode::Write),
        }
    }
}

impl Drop for HierarchyGuard<'_> {
    fn drop(&mut self) {
        if matches!(self.kind, GuardKind::Reentrant) {
            return;
        }
        let lock_id = self.lock_id;
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|(id, _)| *id == lock_id) {
                held.remove(pos);
            }
        });
    }
}

impl HierarchyLock {
    /// Create a new, unheld lock
    pub fn new() -> Self {
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            gate: RwLock::new(()),
        }
    }

    /// Acquire shared access, or re-enter if this thread already holds the lock
    pub fn read(&self) -> HierarchyGuard<'_> {
        if held_mode(self.id).is_some() {
            return HierarchyGuard {
                lock_id: self.id,
                kind: GuardKind::Reentrant,
            };
        }
        let guard = self.gate.read();
        HELD.with(|held| held.borrow_mut().push((self.id, Mode::Read)));
        HierarchyGuard {
            lock_id: self.id,
            kind: GuardKind::Read(guard),
        }
    }

    /// Acquire exclusive access, or re-enter an exclusive hold
    ///
    /// Fails when this thread holds the lock only for reading, since the
    /// upgrade would deadlock.
    pub fn write(&self) -> Result<HierarchyGuard<'_>> {
        match held_mode(self.id) {
            Some(Mode::Write) => Ok(HierarchyGuard {
                lock_id: self.id,
                kind: GuardKind::Reentrant,
            }),
            Some(Mode::Read) => Err(ArborError::protocol_violation(
                "structural change requested while holding the hierarchy read lock",
            )),
            None => {
                let guard = self.gate.write();
                HELD.with(|held| held.borrow_mut().push((self.id, Mode::Write)));
                Ok(HierarchyGuard {
                    lock_id: self.id,
                    kind: GuardKind::Write(guard),
                })
            }
        }
    }

    /// Whether the calling thread holds this lock in any mode
    pub fn is_held_by_current_thread(&self) -> bool {
        held_mode(self.id).is_some()
    }

    /// Whether the calling thread holds this lock exclusively
    pub fn is_write_held_by_current_thread(&self) -> bool {
        held_mode(self.id) == Some(Mode::Write)
    }
}

impl Default for HierarchyLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_read_reenters() {
        let lock = HierarchyLock::new();
        let outer = lock.read();
        assert!(!outer.is_reentrant());
        let inner = lock.read();
        assert!(inner.is_reentrant());
        drop(inner);
        assert!(lock.is_held_by_current_thread());
        drop(outer);
        assert!(!lock.is_held_by_current_thread());
    }

    #[test]
    fn test_read_under_write_reenters() {
        let lock = HierarchyLock::new();
        let write = lock.write().unwrap();
        assert!(write.is_exclusive());
        let read = lock.read();
        assert!(read.is_reentrant());
        assert!(read.is_exclusive());
        let nested_write = lock.write().unwrap();
        assert!(nested_write.is_reentrant());
    }

    #[test]
    fn test_upgrade_refused() {
        let lock = HierarchyLock::new();
        let _read = lock.read();
        assert!(matches!(
            lock.write(),
            Err(ArborError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_distinct_locks_are_independent() {
        let a = HierarchyLock::new();
        let b = HierarchyLock::new();
        let _a = a.write().unwrap();
        let b_guard = b.read();
        assert!(!b_guard.is_reentrant());
    }

    #[test]
    fn test_writer_excludes_other_threads() {
        let lock = Arc::new(HierarchyLock::new());
        let guard = lock.write().unwrap();
        let other = Arc::clone(&lock);
        let handle = std::thread::spawn(move || other.is_held_by_current_thread());
        assert!(!handle.join().unwrap());
        drop(guard);
        let other = Arc::clone(&lock);
        let handle = std::thread::spawn(move || {
            let g = other.read();
            g.is_reentrant()
        });
        assert!(!handle.join().unwrap());
    }
}

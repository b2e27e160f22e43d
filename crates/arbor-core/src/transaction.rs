//! Atomic composition transactions
//!
//! A transaction collects deferred actions while a composition batch is being
//! applied. Commit actions run once, in registration order, when the
//! transaction completes; revert actions run in reverse order if it is
//! rolled back or dropped without completing.

use crate::errors::{ArborError, Result};
use parking_lot::Mutex;
use std::fmt;
use uuid::Uuid;

type Action = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    Pending,
    Completed,
    RolledBack,
}

/// A transactional scope for a composition batch
pub struct AtomicComposition {
    id: Uuid,
    state: Mutex<TransactionState>,
    complete_actions: Mutex<Vec<Action>>,
    revert_actions: Mutex<Vec<Action>>,
}

impl AtomicComposition {
    /// Start a new transaction
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(TransactionState::Pending),
            complete_actions: Mutex::new(Vec::new()),
            revert_actions: Mutex::new(Vec::new()),
        }
    }

    /// Transaction identity
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Defer an action until the transaction commits
    pub fn add_complete_action(&self, action: impl FnOnce() + Send + 'static) {
        self.complete_actions.lock().push(Box::new(action));
    }

    /// Register an action to undo work if the transaction is rolled back
    pub fn add_revert_action(&self, action: impl FnOnce() + Send + 'static) {
        self.revert_actions.lock().push(Box::new(action));
    }

    /// Whether the transaction is still open
    pub fn is_pending(&self) -> bool {
        *self.state.lock() == TransactionState::Pending
    }

    /// Whether the transaction committed
    pub fn is_completed(&self) -> bool {
        *self.state.lock() == TransactionState::Completed
    }

    /// Commit: run every deferred commit action once
    pub fn complete(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != TransactionState::Pending {
                return Err(ArborError::protocol_violation(format!(
                    "transaction {} already finished ({:?})",
                    self.id, *state
                )));
            }
            *state = TransactionState::Completed;
        }
        self.revert_actions.lock().clear();
        let actions = std::mem::take(&mut *self.complete_actions.lock());
        for action in actions {
            action();
        }
        Ok(())
    }

    /// Roll back: run revert actions newest first and drop commit actions
    pub fn rollback(&self) {
        {
            let mut state = self.state.lock();
            if *state != TransactionState::Pending {
                return;
            }
            *state = TransactionState::RolledBack;
        }
        self.complete_actions.lock().clear();
        let actions = std::mem::take(&mut *self.revert_actions.lock());
        tracing::debug!(
            transaction = %self.id,
            reverts = actions.len(),
            "rolling back composition"
        );
        for action in actions.into_iter().rev() {
            action();
        }
    }
}

impl Default for AtomicComposition {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AtomicComposition {
    fn drop(&mut self) {
        self.rollback();
    }
}

impl fmt::Debug for AtomicComposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicComposition")
            .field("id", &self.id)
            .field("state", &*self.state.lock())
            .field("complete_actions", &self.complete_actions.lock().len())
            .field("revert_actions", &self.revert_actions.lock().len())
            .finish()
    }
}

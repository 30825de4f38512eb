//! Per-user event sequencing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use common::UserId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;
type Slots = Arc<Mutex<HashMap<UserId, Slot>>>;

/// Serializes event handling per user while different users run in parallel.
///
/// Waiters for the same user are woken in arrival order. A user's slot is
/// dropped once nobody holds or waits for it, so the map only grows with
/// the number of users active at the same moment.
#[derive(Debug, Clone, Default)]
pub struct UserSequencer {
    slots: Slots,
}

/// Exclusive turn of one user. The next event of that user runs after drop.
#[derive(Debug)]
pub struct UserTurn {
    user_id: UserId,
    guard: Option<OwnedMutexGuard<()>>,
    slot: Slot,
    slots: Slots,
}

impl UserSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until every earlier event of the user has been handled.
    pub async fn acquire(&self, user_id: UserId) -> UserTurn {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(user_id).or_default().clone()
        };
        let guard = slot.clone().lock_owned().await;

        UserTurn {
            user_id,
            guard: Some(guard),
            slot,
            slots: self.slots.clone(),
        }
    }

    /// Number of users currently holding or waiting for a turn.
    pub fn active_users(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl UserTurn {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

impl Drop for UserTurn {
    fn drop(&mut self) {
        self.guard.take();

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here: nobody else is waiting.
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_user_runs_in_arrival_order() {
        let sequencer = UserSequencer::new();
        let log = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let user = UserId::new(1);

        let first = sequencer.acquire(user).await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let sequencer = sequencer.clone();
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                let _turn = sequencer.acquire(user).await;
                log.lock().await.push(i);
            }));
            // Let each task queue up before spawning the next one.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(log.lock().await.is_empty());
        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*log.lock().await, vec![0, 1, 2, 3, 4]);
        assert_eq!(sequencer.active_users(), 0);
    }

    #[tokio::test]
    async fn test_different_users_do_not_block_each_other() {
        let sequencer = UserSequencer::new();
        let _alice = sequencer.acquire(UserId::new(1)).await;

        let bob = tokio::time::timeout(Duration::from_secs(1), sequencer.acquire(UserId::new(2)))
            .await
            .expect("second user must not wait for the first");
        assert_eq!(bob.user_id(), UserId::new(2));
        assert_eq!(sequencer.active_users(), 2);
    }

    #[tokio::test]
    async fn test_slot_is_pruned_after_last_turn() {
        let sequencer = UserSequencer::new();
        {
            let _turn = sequencer.acquire(UserId::new(1)).await;
            assert_eq!(sequencer.active_users(), 1);
        }
        assert_eq!(sequencer.active_users(), 0);
    }
}

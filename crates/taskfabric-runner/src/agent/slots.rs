// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Capacity slots shared by the calls of one engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::AgentError;

/// Fixed number of slots; a call holds one from admission until it returns.
#[derive(Debug, Clone)]
pub struct SlotPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    wait: Duration,
}

/// A held slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl SlotPool {
    /// `capacity` slots; admission waits at most `wait` for one.
    pub fn new(capacity: usize, wait: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            wait,
        }
    }

    pub async fn acquire(&self) -> Result<Slot, AgentError> {
        match tokio::time::timeout(self.wait, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(Slot { _permit: permit }),
            Ok(Err(_)) => Err(AgentError::Rejected("capacity slots closed".to_string())),
            Err(_) => {
                debug!(capacity = self.capacity, "no slot free in time");
                Err(AgentError::NoCapacity(self.wait))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slot_is_released_on_drop() {
        let slots = SlotPool::new(1, Duration::from_millis(20));
        let slot = slots.acquire().await.unwrap();

        let err = slots.acquire().await.unwrap_err();
        assert!(matches!(err, AgentError::NoCapacity(_)));

        drop(slot);
        assert!(slots.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_slots() {
        let slots = SlotPool::new(2, Duration::from_millis(20));
        let other = slots.clone();
        let _first = slots.acquire().await.unwrap();
        let _second = other.acquire().await.unwrap();
        assert!(matches!(
            slots.acquire().await,
            Err(AgentError::NoCapacity(_))
        ));
    }
}

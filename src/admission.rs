//! Fixed pool of worker slots bounding concurrent probe tasks.
//!
//! Capacity is enforced by a semaphore; a small slot table hands out slot
//! ids so callers can tell which slot they hold. Waiters are not ordered:
//! a caller must not rely on being served before a later one.

use crate::counters::Counters;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

#[derive(Debug)]
struct Shared {
    capacity: usize,
    permits: Arc<Semaphore>,
    busy: Mutex<Vec<bool>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Clone, Debug)]
pub struct AdmissionController {
    shared: Arc<Shared>,
    counters: Arc<Counters>,
}

/// A claimed worker slot. Dropping it releases the slot, so a slot is
/// released exactly once whichever way its task ends.
#[derive(Debug)]
pub struct SlotGuard {
    id: usize,
    shared: Arc<Shared>,
    _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut busy = self.shared.busy.lock().unwrap_or_else(PoisonError::into_inner);
        busy[self.id] = false;
        self.shared.active.fetch_sub(1, Ordering::AcqRel);
        trace!(slot = self.id, "slot released");
        // the permit is returned after this body runs
    }
}

impl AdmissionController {
    pub fn new(capacity: usize, counters: Arc<Counters>) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity,
                permits: Arc::new(Semaphore::new(capacity)),
                busy: Mutex::new(vec![false; capacity]),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
            counters,
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Slots currently claimed.
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Highest number of slots ever claimed at once.
    pub fn peak(&self) -> usize {
        self.shared.peak.load(Ordering::Acquire)
    }

    /// Waits for a free slot and claims it.
    pub async fn acquire(&self) -> SlotGuard {
        let permit = self
            .shared
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("admission semaphore is never closed");
        Counters::bump(&self.counters.slot_acquisitions);

        let id = {
            let mut busy = self.shared.busy.lock().unwrap_or_else(PoisonError::into_inner);
            // A permit guarantees at least one entry is free.
            let id = busy
                .iter()
                .position(|b| !b)
                .expect("permit held without a free slot");
            busy[id] = true;
            id
        };
        let now = self.shared.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.peak.fetch_max(now, Ordering::AcqRel);
        trace!(slot = id, active = now, "slot claimed");

        SlotGuard {
            id,
            shared: self.shared.clone(),
            _permit: permit,
        }
    }

    /// Waits until every slot is free. Meant for shutdown only: while it
    /// waits, it holds back any new acquisitions.
    pub async fn drain(&self) {
        let all = u32::try_from(self.shared.capacity).unwrap_or(u32::MAX);
        let _all = self
            .shared
            .permits
            .acquire_many(all)
            .await
            .expect("admission semaphore is never closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn controller(n: usize) -> AdmissionController {
        AdmissionController::new(n, Arc::new(Counters::new()))
    }

    #[tokio::test]
    async fn hands_out_distinct_slots() {
        let ac = controller(3);
        let a = ac.acquire().await;
        let b = ac.acquire().await;
        let c = ac.acquire().await;
        let mut ids = vec![a.id(), b.id(), c.id()];
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(ac.active(), 3);
        drop(b);
        assert_eq!(ac.active(), 2);
        let d = ac.acquire().await;
        assert_eq!(d.id(), 1);
    }

    #[tokio::test]
    async fn acquire_blocks_at_capacity() {
        let ac = controller(1);
        let held = ac.acquire().await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), ac.acquire()).await;
        assert!(blocked.is_err());
        drop(held);
        let got = tokio::time::timeout(Duration::from_millis(500), ac.acquire()).await;
        assert!(got.is_ok());
    }

    #[tokio::test]
    async fn peak_never_exceeds_capacity() {
        let ac = controller(4);
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let ac = ac.clone();
            tasks.push(tokio::spawn(async move {
                let slot = ac.acquire().await;
                assert!(ac.active() <= ac.capacity());
                tokio::time::sleep(Duration::from_millis(2)).await;
                drop(slot);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert!(ac.peak() <= 4);
        assert_eq!(ac.active(), 0);
    }

    #[tokio::test]
    async fn drain_waits_for_outstanding_slots() {
        let ac = controller(2);
        let slot = ac.acquire().await;
        let released = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = released.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            flag.store(true, Ordering::SeqCst);
            drop(slot);
        });
        ac.drain().await;
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(ac.active(), 0);
    }
}

// src/guard/mod.rs

//! Named single-flight slots.
//!
//! Each job name owns one [`JobSlot`]. A slot is either free or held by
//! exactly one admission, identified by a generation number. Admission is a
//! single compare-and-swap on that number, so two triggers can never both
//! observe the slot as free.
//!
//! A successful admission returns a [`SlotPermit`]; dropping the permit
//! releases the slot, which covers early returns and panics in the Run that
//! holds it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

const FREE: u64 = 0;

/// Result of asking for a job's slot.
#[derive(Debug)]
pub enum Admission {
    Admitted(SlotPermit),
    /// Another Run holds the slot (or the wait queue is full).
    Rejected,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

/// Mutual-exclusion state for one job name.
pub struct JobSlot {
    name: String,
    /// `FREE` or the generation of the current holder.
    holder: AtomicU64,
    next_generation: AtomicU64,
    waiters: AtomicUsize,
    freed: Notify,
}

impl fmt::Debug for JobSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSlot")
            .field("name", &self.name)
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

impl JobSlot {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            holder: AtomicU64::new(FREE),
            next_generation: AtomicU64::new(1),
            waiters: AtomicUsize::new(0),
            freed: Notify::new(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.holder.load(Ordering::Acquire) != FREE
    }

    fn try_acquire(self: &Arc<Self>) -> Option<SlotPermit> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.holder
            .compare_exchange(FREE, generation, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SlotPermit {
                slot: Arc::clone(self),
                generation,
                released: false,
            })
    }

    /// Free the slot if `generation` still holds it.
    fn release_generation(&self, generation: u64) -> bool {
        let freed = self
            .holder
            .compare_exchange(generation, FREE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if freed {
            self.freed.notify_waiters();
        }
        freed
    }

    /// Free the slot regardless of holder.
    fn force_release(&self) -> bool {
        let previous = self.holder.swap(FREE, Ordering::AcqRel);
        if previous != FREE {
            self.freed.notify_waiters();
        }
        previous != FREE
    }
}

/// Scoped ownership of a job slot. Releases on drop.
pub struct SlotPermit {
    slot: Arc<JobSlot>,
    generation: u64,
    released: bool,
}

impl fmt::Debug for SlotPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPermit")
            .field("job", &self.slot.name)
            .field("generation", &self.generation)
            .field("released", &self.released)
            .finish()
    }
}

impl SlotPermit {
    pub fn job(&self) -> &str {
        &self.slot.name
    }

    /// Release the slot now. Returns whether this call freed it.
    pub fn release(mut self) -> bool {
        self.release_inner()
    }

    fn release_inner(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        let freed = self.slot.release_generation(self.generation);
        if freed {
            info!(job = %self.slot.name, generation = self.generation, "slot released");
        } else {
            debug!(
                job = %self.slot.name,
                generation = self.generation,
                "slot already released; nothing to do"
            );
        }
        freed
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Decrements the waiter count even if the waiting future is dropped.
struct WaiterGuard<'a>(&'a AtomicUsize);

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Registry of named slots.
#[derive(Debug, Default)]
pub struct ConcurrencyGuard {
    slots: Mutex<HashMap<String, Arc<JobSlot>>>,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, job: &str) -> Arc<JobSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            slots
                .entry(job.to_string())
                .or_insert_with(|| Arc::new(JobSlot::new(job))),
        )
    }

    /// Fail-fast admission: `Admitted` iff nobody holds the slot.
    pub fn acquire(&self, job: &str) -> Admission {
        let slot = self.slot(job);
        match slot.try_acquire() {
            Some(permit) => {
                info!(job, generation = permit.generation, "slot acquired");
                Admission::Admitted(permit)
            }
            None => {
                info!(job, "slot busy; admission rejected");
                Admission::Rejected
            }
        }
    }

    /// Queue-policy admission: wait for the slot to free.
    ///
    /// At most `max_waiters` callers may wait at once; callers beyond that
    /// are rejected immediately.
    pub async fn acquire_queued(&self, job: &str, max_waiters: usize) -> Admission {
        let slot = self.slot(job);

        if let Some(permit) = slot.try_acquire() {
            info!(job, generation = permit.generation, "slot acquired");
            return Admission::Admitted(permit);
        }

        if slot.waiters.fetch_add(1, Ordering::AcqRel) >= max_waiters {
            slot.waiters.fetch_sub(1, Ordering::AcqRel);
            info!(job, max_waiters, "slot busy and wait queue full; admission rejected");
            return Admission::Rejected;
        }
        let _waiting = WaiterGuard(&slot.waiters);
        info!(job, "slot busy; waiting for it to free");

        loop {
            let notified = slot.freed.notified();
            tokio::pin!(notified);
            // Register before re-checking so a release in between is not lost.
            notified.as_mut().enable();

            if let Some(permit) = slot.try_acquire() {
                info!(job, generation = permit.generation, "slot acquired after waiting");
                return Admission::Admitted(permit);
            }

            notified.await;
        }
    }

    /// Administrative override: free the job's slot by name, whoever holds
    /// it. Idempotent: releasing a free slot is a no-op and returns `false`.
    ///
    /// Runs release their own slot through [`SlotPermit`]; nothing in the
    /// Run path calls this. Freeing a slot whose Run is still executing lets
    /// the next trigger in, so the holder's permit becomes stale and its
    /// eventual drop leaves the new holder alone.
    pub fn release(&self, job: &str) -> bool {
        let freed = self.slot(job).force_release();
        if freed {
            warn!(job, "slot forcibly released; its current holder no longer excludes new runs");
        } else {
            debug!(job, "release on a free slot ignored");
        }
        freed
    }

    pub fn is_busy(&self, job: &str) -> bool {
        self.slot(job).is_busy()
    }
}

// crates/server/src/jobs/queue.rs
//! Admission queue: a global concurrency cap for heavy commands.
//!
//! Light commands bypass admission entirely. A heavy command takes a free
//! slot and starts immediately, or joins a strict-FIFO wait list. When a
//! heavy job finishes its slot is released and the wait-list head is
//! promoted; jobs cancelled while waiting are skipped, never reordered.
//!
//! Starting a job is a callback supplied by the caller, which keeps this
//! type free of any knowledge about runners or task spawning.

use super::registry::JobRegistry;
use super::types::{JobId, JobStatus};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct JobQueue {
    /// Free heavy-job slots. Lock order is always wait list before slots.
    slots: Mutex<usize>,
    waiting: Mutex<VecDeque<JobId>>,
}

impl JobQueue {
    /// `max_concurrent` may be zero, in which case every heavy job waits
    /// until the cap is raised (useful in tests and for draining).
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            slots: Mutex::new(max_concurrent),
            waiting: Mutex::new(VecDeque::new()),
        }
    }

    fn waiting_lock(&self) -> MutexGuard<'_, VecDeque<JobId>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_acquire_slot(&self) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if *slots > 0 {
            *slots -= 1;
            true
        } else {
            false
        }
    }

    fn release_slot(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        *slots += 1;
    }

    /// Submit a job. Light jobs start immediately; heavy jobs start if a
    /// slot is free, otherwise they join the tail of the wait list.
    pub fn enqueue(&self, id: JobId, heavy: bool, start: &dyn Fn(JobId)) {
        if !heavy {
            start(id);
            return;
        }
        // Hold the wait-list lock across the slot attempt so a concurrent
        // release-and-promote cannot slip between "no slot" and "enqueued".
        let mut waiting = self.waiting_lock();
        if self.try_acquire_slot() {
            drop(waiting);
            start(id);
        } else {
            waiting.push_back(id);
        }
    }

    /// 1-based position in the wait list, or `None` if the job is not waiting.
    pub fn queue_position(&self, id: JobId) -> Option<usize> {
        self.waiting_lock().iter().position(|j| *j == id).map(|i| i + 1)
    }

    /// Drop a job from the wait list (cancellation). Slot counts are
    /// unaffected: a waiting job holds no slot.
    pub fn remove(&self, id: JobId) {
        self.waiting_lock().retain(|j| *j != id);
    }

    /// Called when a started heavy job reaches a terminal state: return its
    /// slot and promote the next waiting job.
    pub fn release_and_promote(&self, registry: &JobRegistry, start: &dyn Fn(JobId)) {
        self.release_slot();
        self.promote_next(registry, start);
    }

    fn promote_next(&self, registry: &JobRegistry, start: &dyn Fn(JobId)) {
        loop {
            let mut waiting = self.waiting_lock();
            let Some(next) = waiting.pop_front() else {
                return;
            };
            let skip = match registry.get(next) {
                None => true,
                Some(job) => job.status == JobStatus::Cancelled,
            };
            if skip {
                // Cancelled (or vanished) while waiting: discard and try the
                // next candidate without consuming the slot.
                drop(waiting);
                continue;
            }
            if self.try_acquire_slot() {
                drop(waiting);
                start(next);
            } else {
                // The freed slot was claimed by a concurrent enqueue; keep
                // this job at the head so FIFO order is preserved.
                waiting.push_front(next);
            }
            return;
        }
    }

    #[cfg(test)]
    fn waiting_len(&self) -> usize {
        self.waiting_lock().len()
    }
}

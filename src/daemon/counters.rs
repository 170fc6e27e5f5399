//! Node-wide object counters reported by the `info` action.

use std::sync::atomic::{AtomicU64, Ordering};

static JOBS_PENDING: AtomicU64 = AtomicU64::new(0);
static JOBS_PROCESSED: AtomicU64 = AtomicU64::new(0);
static LOGGERS_ALIVE: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub jobs_pending: u64,
    pub jobs_processed: u64,
    pub loggers_alive: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        jobs_pending: JOBS_PENDING.load(Ordering::Relaxed),
        jobs_processed: JOBS_PROCESSED.load(Ordering::Relaxed),
        loggers_alive: LOGGERS_ALIVE.load(Ordering::Relaxed),
    }
}

/// Engines call this when a job enters their queue.
pub fn job_enqueued() {
    JOBS_PENDING.fetch_add(1, Ordering::Relaxed);
}

/// Engines call this when a job leaves their queue, whatever the outcome.
pub fn job_finished() {
    saturating_dec(&JOBS_PENDING);
    JOBS_PROCESSED.fetch_add(1, Ordering::Relaxed);
}

pub fn logger_created() {
    LOGGERS_ALIVE.fetch_add(1, Ordering::Relaxed);
}

pub fn logger_dropped() {
    saturating_dec(&LOGGERS_ALIVE);
}

fn saturating_dec(counter: &AtomicU64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
}

/// The counters are process globals; tests asserting on them take this lock
/// so parallel test threads cannot interleave.
#[cfg(test)]
pub(crate) fn serialize_tests() -> std::sync::MutexGuard<'static, ()> {
    static GUARD: std::sync::Mutex<()> = std::sync::Mutex::new(());
    GUARD.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//! Single-slot mutex enforcing at-most-one concurrent transcription, with a
//! cooperative cancellation flag the engine polls between segments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

struct ActiveJob {
    job_id: u64,
    client_name: String,
    cancel_requested: bool,
}

pub struct JobTracker {
    active: Mutex<Option<ActiveJob>>,
    next_job_id: AtomicU64,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
            next_job_id: AtomicU64::new(1),
        }
    }

    /// Reserves the slot. Returns `(ok, job_id, active_user)`: `active_user`
    /// is the current holder's name when the slot was already taken.
    pub async fn try_start_job(&self, client_name: &str) -> (bool, u64, Option<String>) {
        let mut guard = self.active.lock().await;
        if let Some(job) = guard.as_ref() {
            return (false, job.job_id, Some(job.client_name.clone()));
        }

        let job_id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        *guard = Some(ActiveJob {
            job_id,
            client_name: client_name.to_string(),
            cancel_requested: false,
        });

        (true, job_id, None)
    }

    pub async fn end_job(&self, job_id: u64) {
        let mut guard = self.active.lock().await;
        if guard.as_ref().map(|j| j.job_id) == Some(job_id) {
            *guard = None;
        }
    }

    /// Requests cancellation of the active job, if any.
    pub async fn cancel_job(&self) -> (bool, Option<String>) {
        let mut guard = self.active.lock().await;
        match guard.as_mut() {
            Some(job) => {
                job.cancel_requested = true;
                (true, Some(job.client_name.clone()))
            }
            None => (false, None),
        }
    }

    pub async fn is_cancelled(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|j| j.cancel_requested)
            .unwrap_or(false)
    }

    pub async fn active_count(&self) -> usize {
        if self.active.lock().await.is_some() {
            1
        } else {
            0
        }
    }
}

pub type SharedJobTracker = Arc<JobTracker>;

/// RAII guard that always releases the job slot, even on an early return or
/// panic unwind, mirroring the recorder's "always return to inactive"
/// contract.
pub struct JobGuard {
    tracker: SharedJobTracker,
    job_id: u64,
}

impl JobGuard {
    pub fn new(tracker: SharedJobTracker, job_id: u64) -> Self {
        Self { tracker, job_id }
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let tracker = self.tracker.clone();
        let job_id = self.job_id;
        tokio::spawn(async move {
            tracker.end_job(job_id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_start_is_rejected_while_active() {
        let tracker = JobTracker::new();
        let (ok1, job_id, _) = tracker.try_start_job("alice").await;
        assert!(ok1);

        let (ok2, _, active_user) = tracker.try_start_job("bob").await;
        assert!(!ok2);
        assert_eq!(active_user, Some("alice".to_string()));

        tracker.end_job(job_id).await;
        let (ok3, _, _) = tracker.try_start_job("bob").await;
        assert!(ok3);
    }

    #[tokio::test]
    async fn cancel_when_idle_reports_no_user() {
        let tracker = JobTracker::new();
        let (cancelled, user) = tracker.cancel_job().await;
        assert!(!cancelled);
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn cancel_when_busy_is_observed_by_is_cancelled() {
        let tracker = JobTracker::new();
        tracker.try_start_job("alice").await;

        let (cancelled, user) = tracker.cancel_job().await;
        assert!(cancelled);
        assert_eq!(user, Some("alice".to_string()));
        assert!(tracker.is_cancelled().await);
    }

    #[tokio::test]
    async fn active_count_is_never_more_than_one() {
        let tracker = JobTracker::new();
        assert_eq!(tracker.active_count().await, 0);
        tracker.try_start_job("alice").await;
        assert_eq!(tracker.active_count().await, 1);
        tracker.try_start_job("bob").await;
        assert_eq!(tracker.active_count().await, 1);
    }
}

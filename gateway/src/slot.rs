//! The single proof-job slot.
//!
//! A gateway drives at most one non-terminal job at a time. The slot is the
//! only place job state lives: admission is an atomic check-and-set against
//! it, the driver task mutates it through [`JobSlot::update`], and clients
//! read snapshots. A terminal job stays readable until the next admission
//! replaces it.

use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::types::{now_unix_s, JobStatus, ProofJob};

struct SlotInner {
    job: Option<ProofJob>,
    cancel_tx: Option<watch::Sender<bool>>,
}

pub struct JobSlot {
    inner: RwLock<SlotInner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelResult {
    Cancelled,
    AlreadyTerminal,
    NotFound,
}

impl JobSlot {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SlotInner {
                job: None,
                cancel_tx: None,
            }),
        }
    }

    /// Claim the slot for a new job. Fails with a snapshot of the active job
    /// when one is still in flight; a terminal occupant is replaced.
    pub async fn try_claim(&self, job: ProofJob) -> Result<watch::Receiver<bool>, ProofJob> {
        let mut inner = self.inner.write().await;
        if let Some(active) = &inner.job {
            if !active.status.is_terminal() {
                return Err(active.clone());
            }
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        inner.job = Some(job);
        inner.cancel_tx = Some(cancel_tx);
        Ok(cancel_rx)
    }

    pub async fn snapshot(&self) -> Option<ProofJob> {
        self.inner.read().await.job.clone()
    }

    pub async fn get(&self, job_id: Uuid) -> Option<ProofJob> {
        let inner = self.inner.read().await;
        inner
            .job
            .as_ref()
            .filter(|job| job.job_id == job_id)
            .cloned()
    }

    /// Mutate the slotted job. Mutations against a terminal job or a stale
    /// job id are dropped; the driver races cancellation and this is what
    /// keeps terminal states immutable.
    pub async fn update<F>(&self, job_id: Uuid, mutate: F) -> Option<ProofJob>
    where
        F: FnOnce(&mut ProofJob),
    {
        let mut inner = self.inner.write().await;
        let job = inner.job.as_mut()?;
        if job.job_id != job_id {
            return None;
        }
        if job.status.is_terminal() {
            return Some(job.clone());
        }

        mutate(job);
        job.updated_at_unix_s = now_unix_s();
        if job.status.is_terminal() {
            job.completed_at_unix_s = Some(job.updated_at_unix_s);
        }
        Some(job.clone())
    }

    /// Cancel the slotted job: the job fails immediately (freeing the slot
    /// for the next admission) and the driver is signalled to stop.
    pub async fn cancel(&self, job_id: Uuid) -> CancelResult {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.job.as_mut() else {
            return CancelResult::NotFound;
        };
        if job.job_id != job_id {
            return CancelResult::NotFound;
        }
        if job.status.is_terminal() {
            return CancelResult::AlreadyTerminal;
        }

        job.status = JobStatus::Failed;
        job.error = Some("cancelled by client".to_string());
        job.error_code = Some("cancelled".to_string());
        job.updated_at_unix_s = now_unix_s();
        job.completed_at_unix_s = Some(job.updated_at_unix_s);
        if let Some(cancel_tx) = &inner.cancel_tx {
            // Receiver may already be gone if the driver finished.
            let _ = cancel_tx.send(true);
        }
        CancelResult::Cancelled
    }
}

impl Default for JobSlot {
    fn default() -> Self {
        Self::new()
    }
}

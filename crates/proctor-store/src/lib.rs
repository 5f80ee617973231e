//! In-memory record store and file store backends.
//!
//! `MemoryRecordStore` is the reference implementation of the behaviour's
//! storage collaborators: grading-job existence, comment idempotency flags,
//! regrade override records, and replay file loading. Cloning the store
//! yields another handle to the **same** inner state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use proctor_behaviour::{FileStore, RecordStore};
use proctor_types::{ProctorError, RegradeOverride, ResponseFile, Result, Step};

#[derive(Default)]
struct Inner {
    jobs: HashSet<Uuid>,
    applied_comments: HashSet<Uuid>,
    overrides: HashMap<(Uuid, u32), RegradeOverride>,
    files: HashMap<(Uuid, Uuid), Vec<ResponseFile>>,
}

/// Thread-safe in-memory backend for `RecordStore` and `FileStore`.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dispatched grading job as authoritative.
    pub async fn register_job(&self, job: Uuid) {
        self.inner.write().await.jobs.insert(job);
    }

    /// Revoke a grading job. This is what a regrade does when it supersedes
    /// an earlier dispatch; any result still in flight for the job becomes
    /// stale and will be discarded.
    pub async fn revoke_job(&self, job: Uuid) {
        let removed = self.inner.write().await.jobs.remove(&job);
        if removed {
            tracing::debug!(%job, "Grading job revoked");
        }
    }

    /// Create an override record, as external regrade tooling would.
    pub async fn seed_override(&self, usage_id: Uuid, slot: u32) {
        self.inner.write().await.overrides.insert(
            (usage_id, slot),
            RegradeOverride {
                usage_id,
                slot,
                new_fraction: None,
            },
        );
    }

    /// Persist a kept step for an attempt usage. This is the write that makes
    /// comment idempotency flags and replay files visible to later events.
    pub async fn record_step(&self, usage_id: Uuid, step: &Step) {
        let mut inner = self.inner.write().await;
        if step.comment_applied {
            inner.applied_comments.insert(step.id);
        }
        if !step.files.is_empty() {
            inner.files.insert((usage_id, step.id), step.files.clone());
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn job_exists(&self, job: Uuid) -> Result<bool> {
        Ok(self.inner.read().await.jobs.contains(&job))
    }

    async fn comment_applied(&self, step_id: Uuid) -> Result<bool> {
        Ok(self.inner.read().await.applied_comments.contains(&step_id))
    }

    async fn regrade_override(&self, usage_id: Uuid, slot: u32) -> Result<Option<RegradeOverride>> {
        Ok(self
            .inner
            .read()
            .await
            .overrides
            .get(&(usage_id, slot))
            .cloned())
    }

    async fn update_override(&self, record: &RegradeOverride) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.overrides.get_mut(&(record.usage_id, record.slot)) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(ProctorError::Store(format!(
                "no override record for usage {} slot {}",
                record.usage_id, record.slot
            ))),
        }
    }
}

#[async_trait]
impl FileStore for MemoryRecordStore {
    async fn load_files(&self, usage_id: Uuid, step_id: Uuid) -> Result<Vec<ResponseFile>> {
        Ok(self
            .inner
            .read()
            .await
            .files
            .get(&(usage_id, step_id))
            .cloned()
            .unwrap_or_default())
    }
}

//! `CheckpointStore`: one KV entry per task id, unconditionally
//! overwritten. No history; absence just means "restart from the
//! original prompt".

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use swarm_transport::{subjects::buckets, KvError, Transport};
use swarm_types::{TaskCheckpoint, TaskId};

use crate::error::Result;

pub struct CheckpointStore {
    transport: Arc<dyn Transport>,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn start(&self) -> Result<()> {
        self.transport
            .ensure_bucket(buckets::CHECKPOINTS, Duration::from_secs(0))
            .await?;
        Ok(())
    }

    pub async fn save_checkpoint(&self, checkpoint: &TaskCheckpoint) -> Result<()> {
        let key = buckets::checkpoint_key(&checkpoint.task_id);
        let payload = serde_json::to_vec(checkpoint)?;
        self.transport.kv_put(buckets::CHECKPOINTS, &key, Bytes::from(payload)).await?;
        Ok(())
    }

    pub async fn load_checkpoint(&self, task_id: &TaskId) -> Result<Option<TaskCheckpoint>> {
        let key = buckets::checkpoint_key(task_id);
        match self.transport.kv_get(buckets::CHECKPOINTS, &key).await {
            Ok((bytes, _)) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(KvError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

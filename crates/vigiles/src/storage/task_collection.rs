/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Pairing of a task's meta with its payload blob.

use std::sync::Arc;

use super::blobs::BlobStorage;
use super::meta_storage::TaskMetaStorage;
use crate::error::StorageError;
use crate::models::{Task, TaskMeta};
use crate::time::GlobalClock;

fn data_blob_key(task_id: &str) -> String {
    format!("data_{}", task_id)
}

/// Meta + payload access as one unit.
pub struct TaskCollection {
    meta_storage: Arc<TaskMetaStorage>,
    data_blobs: Arc<dyn BlobStorage>,
    global_clock: Arc<GlobalClock>,
}

impl TaskCollection {
    pub fn new(
        meta_storage: Arc<TaskMetaStorage>,
        data_blobs: Arc<dyn BlobStorage>,
        global_clock: Arc<GlobalClock>,
    ) -> Self {
        Self {
            meta_storage,
            data_blobs,
            global_clock,
        }
    }

    /// Writes the payload first, then the meta: a task becomes discoverable
    /// only once both halves exist. A crash in between leaves an unindexed
    /// payload blob that simply expires with its TTL.
    pub async fn add_task(&self, meta: TaskMeta, data: Vec<u8>) -> Result<TaskMeta, StorageError> {
        let now_ticks = self.global_clock.update_now_ticks();
        self.data_blobs
            .write(&data_blob_key(&meta.id), data, now_ticks, meta.ttl())
            .await?;
        self.meta_storage.add_meta(meta, None).await
    }

    /// Reads the authoritative meta and payload for a task.
    pub async fn get_task(&self, task_id: &str) -> Result<Task, StorageError> {
        let meta = self.meta_storage.get_meta(task_id).await?;
        let data = self
            .data_blobs
            .read(&data_blob_key(task_id))
            .await?
            .ok_or_else(|| StorageError::DataNotFound(task_id.to_string()))?;
        Ok(Task { meta, data })
    }

    /// Best-effort rewrite of meta and payload with the meta's refreshed
    /// TTL, extending the records' expiration.
    pub async fn prolong_task_ttl(
        &self,
        meta: &TaskMeta,
        data: &[u8],
    ) -> Result<(), StorageError> {
        self.meta_storage.prolong_meta_ttl(meta).await?;
        self.data_blobs
            .write(
                &data_blob_key(&meta.id),
                data.to_vec(),
                meta.last_modification_ticks.unwrap_or(0),
                meta.ttl(),
            )
            .await
    }

    /// The meta storage this collection writes through.
    pub fn meta_storage(&self) -> &Arc<TaskMetaStorage> {
        &self.meta_storage
    }
}

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

//! Storage of recorded handler failures.
//!
//! Failures are stored as individual blobs; the meta carries the ordered id
//! list. Recording is best-effort from the state machine's point of view: a
//! failure to record is logged and swallowed, it never changes how the task
//! transitions.

use std::sync::Arc;

use uuid::Uuid;

use super::blobs::BlobStorage;
use crate::error::StorageError;
use crate::models::{TaskExceptionInfo, TaskMeta};
use crate::time::Ticks;

/// Hard cap on exception references kept per task. When exceeded, the
/// first 101 and the latest 100 survive, so both the original failure and
/// the recent history stay visible.
const MAX_EXCEPTION_INFOS: usize = 201;
const HEAD_KEEP: usize = 101;
const TAIL_KEEP: usize = 100;

fn exception_blob_key(id: &Uuid) -> String {
    format!("exception_{}", id.simple())
}

/// Blob-backed storage of [`TaskExceptionInfo`] records.
pub struct TaskExceptionInfoStorage {
    blobs: Arc<dyn BlobStorage>,
}

impl TaskExceptionInfoStorage {
    pub fn new(blobs: Arc<dyn BlobStorage>) -> Self {
        Self { blobs }
    }

    /// Records a new failure for a task and returns the meta's next
    /// exception-info id list (existing ids plus the new one, capped).
    pub async fn try_add_new_exception_info(
        &self,
        meta: &TaskMeta,
        error_message: &str,
        now_ticks: Ticks,
    ) -> Result<Vec<Uuid>, StorageError> {
        let info = TaskExceptionInfo {
            id: Uuid::new_v4(),
            task_id: meta.id.clone(),
            exception_message_info: error_message.to_string(),
            recording_ticks: now_ticks,
        };
        self.blobs
            .write(
                &exception_blob_key(&info.id),
                serde_json::to_vec(&info)?,
                now_ticks,
                meta.ttl(),
            )
            .await?;

        let mut ids = meta.exception_info_ids.clone();
        ids.push(info.id);
        if ids.len() > MAX_EXCEPTION_INFOS {
            let tail_start = ids.len() - TAIL_KEEP;
            let mut kept = ids[..HEAD_KEEP].to_vec();
            kept.extend_from_slice(&ids[tail_start..]);
            ids = kept;
        }
        Ok(ids)
    }

    /// Reads the recorded failures for the given ids, skipping ids whose
    /// blob has expired.
    pub async fn read(&self, ids: &[Uuid]) -> Result<Vec<TaskExceptionInfo>, StorageError> {
        let keys: Vec<String> = ids.iter().map(exception_blob_key).collect();
        let blobs = self.blobs.read_many(&keys).await?;
        let mut infos = Vec::with_capacity(blobs.len());
        for blob in blobs.into_iter().flatten() {
            infos.push(serde_json::from_slice(&blob)?);
        }
        Ok(infos)
    }
}

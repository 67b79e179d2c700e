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

//! Authoritative meta storage and the write protocol that keeps the
//! secondary index eventually consistent with it.
//!
//! `add_meta` is the only way a meta reaches the store. Its write order —
//! event log, new index entry, meta blob, then unindex of the previous
//! entry — guarantees that a task that exists is always discoverable: the
//! index may transiently hold an extra stale entry, never zero live ones.
//! The dispatch state machine treats a mismatching entry inside
//! the inconsistency window as "index not caught up yet" and repairs or
//! reaps it after the window.

use std::sync::Arc;

use tracing::{debug, error};

use super::blobs::BlobStorage;
use super::event_log::EventLogStorage;
use super::ticks_index::MinimalStartTicksIndex;
use crate::error::StorageError;
use crate::models::{TaskIndexRecord, TaskIndexShardKey, TaskMeta, TaskState};
use crate::time::{GlobalClock, Ticks};

fn meta_blob_key(task_id: &str) -> String {
    format!("meta_{}", task_id)
}

/// Durable store of the authoritative [`TaskMeta`] record per task.
pub struct TaskMetaStorage {
    blobs: Arc<dyn BlobStorage>,
    index: Arc<MinimalStartTicksIndex>,
    event_log: EventLogStorage,
    global_clock: Arc<GlobalClock>,
}

impl TaskMetaStorage {
    pub fn new(
        blobs: Arc<dyn BlobStorage>,
        index: Arc<MinimalStartTicksIndex>,
        event_log: EventLogStorage,
        global_clock: Arc<GlobalClock>,
    ) -> Self {
        Self {
            blobs,
            index,
            event_log,
            global_clock,
        }
    }

    /// Projects a meta onto its index record. Pure.
    pub fn format_index_record(&self, meta: &TaskMeta) -> TaskIndexRecord {
        TaskIndexRecord::for_meta(meta)
    }

    /// Writes a meta and reconciles the index.
    ///
    /// When `old_index_record` is absent, the meta's own snapshot from the
    /// last read/write is used for the unindex step. Returns the meta as
    /// written, with the bumped modification ticks and a fresh snapshot.
    pub async fn add_meta(
        &self,
        mut meta: TaskMeta,
        old_index_record: Option<&TaskIndexRecord>,
    ) -> Result<TaskMeta, StorageError> {
        let now_ticks = Ord::max(
            meta.last_modification_ticks.unwrap_or(0) + 1,
            self.global_clock.update_now_ticks(),
        );
        meta.last_modification_ticks = Some(now_ticks);

        self.event_log
            .add_event(&meta.id, now_ticks, meta.ttl())
            .await?;
        let new_record = self.format_index_record(&meta);
        self.index
            .add_record(&new_record, now_ticks, meta.ttl())
            .await?;
        self.blobs
            .write(
                &meta_blob_key(&meta.id),
                serde_json::to_vec(&meta)?,
                now_ticks,
                meta.ttl(),
            )
            .await?;

        let old_record = old_index_record
            .cloned()
            .or_else(|| meta.index_record_snapshot().cloned());
        if let Some(old_record) = old_record {
            if old_record != new_record {
                self.index
                    .unindex_meta(&old_record.column_info(), now_ticks)
                    .await?;
            }
        }

        meta.make_snapshot();
        debug!(task_id = %meta.id, state = %meta.state, "wrote task meta");
        Ok(meta)
    }

    /// Rewrites the meta blob with its current TTL without touching the
    /// index or the event log. Used by TTL prolongation only.
    pub async fn prolong_meta_ttl(&self, meta: &TaskMeta) -> Result<(), StorageError> {
        self.blobs
            .write(
                &meta_blob_key(&meta.id),
                serde_json::to_vec(meta)?,
                meta.last_modification_ticks.unwrap_or(0),
                meta.ttl(),
            )
            .await
    }

    /// Reads the authoritative meta for a task. Missing rows are an error.
    pub async fn get_meta(&self, task_id: &str) -> Result<TaskMeta, StorageError> {
        let blob = self
            .blobs
            .read(&meta_blob_key(task_id))
            .await?
            .ok_or_else(|| StorageError::MetaNotFound(task_id.to_string()))?;
        let mut meta: TaskMeta = serde_json::from_slice(&blob)?;
        meta.make_snapshot();
        Ok(meta)
    }

    /// Reads many metas; any missing row fails the whole batch.
    pub async fn get_metas(&self, task_ids: &[String]) -> Result<Vec<TaskMeta>, StorageError> {
        let metas = self.get_metas_quiet(task_ids).await?;
        metas
            .into_iter()
            .zip(task_ids)
            .map(|(meta, task_id)| meta.ok_or_else(|| StorageError::MetaNotFound(task_id.clone())))
            .collect()
    }

    /// Reads many metas, mapping missing or undecodable rows to `None` so
    /// one bad row cannot abort a whole dispatch batch. Slot `i`
    /// corresponds to `task_ids[i]`.
    pub async fn get_metas_quiet(
        &self,
        task_ids: &[String],
    ) -> Result<Vec<Option<TaskMeta>>, StorageError> {
        let keys: Vec<String> = task_ids.iter().map(|id| meta_blob_key(id)).collect();
        let blobs = self.blobs.read_many(&keys).await?;
        Ok(blobs
            .into_iter()
            .zip(task_ids)
            .map(|(blob, task_id)| {
                let blob = blob?;
                match serde_json::from_slice::<TaskMeta>(&blob) {
                    Ok(mut meta) => {
                        meta.make_snapshot();
                        Some(meta)
                    }
                    Err(e) => {
                        error!(task_id = %task_id, error = %e, "dropping undecodable task meta");
                        None
                    }
                }
            })
            .collect())
    }

    /// Enumerates due index records across the given topics and states, up
    /// to `to_ticks`. Ordered by ticks within a shard, unordered across
    /// shards.
    pub async fn get_all_tasks_in_states(
        &self,
        to_ticks: Ticks,
        topics: &[String],
        states: &[TaskState],
    ) -> Result<Vec<TaskIndexRecord>, StorageError> {
        let mut records = Vec::new();
        for topic in topics {
            for &state in states {
                let shard_key = TaskIndexShardKey::new(topic.clone(), state);
                records.extend(self.index.get_task_ids(&shard_key, to_ticks).await?);
            }
        }
        Ok(records)
    }
}

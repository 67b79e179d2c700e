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

//! The derived index projection of a task meta.
//!
//! [`TaskIndexRecord::for_meta`] is a pure function of exactly four meta
//! fields (topic, state, minimal start ticks, id). Two metas that agree on
//! those fields project to equal records, and the dispatch protocol relies
//! on that: staleness of an index entry is detected by plain structural
//! inequality against the projection of the current meta.

use serde::{Deserialize, Serialize};

use super::task_meta::{TaskMeta, TaskState};
use crate::time::{partition_start, Ticks};

/// Shard key of the index: one scan bucket per (topic, state) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskIndexShardKey {
    pub task_topic: String,
    pub task_state: TaskState,
}

impl TaskIndexShardKey {
    pub fn new(task_topic: impl Into<String>, task_state: TaskState) -> Self {
        Self {
            task_topic: task_topic.into(),
            task_state,
        }
    }
}

impl std::fmt::Display for TaskIndexShardKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.task_topic, self.task_state)
    }
}

/// One entry of the minimal-start-ticks index.
///
/// Non-authoritative: recomputed from the meta on every write and compared
/// by value to detect stale entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIndexRecord {
    pub task_id: String,
    pub minimal_start_ticks: Ticks,
    pub shard_key: TaskIndexShardKey,
}

impl TaskIndexRecord {
    /// Projects a meta onto its index record.
    pub fn for_meta(meta: &TaskMeta) -> Self {
        Self {
            task_id: meta.id.clone(),
            minimal_start_ticks: meta.minimal_start_ticks,
            shard_key: TaskIndexShardKey::new(meta.topic.clone(), meta.state),
        }
    }

    /// The storage location this record occupies.
    pub fn column_info(&self) -> ColumnInfo {
        ColumnInfo {
            row_key: index_row_key(&self.shard_key, self.minimal_start_ticks),
            column_name: index_column_name(self.minimal_start_ticks, &self.task_id),
        }
    }
}

impl std::fmt::Display for TaskIndexRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} @ {} in {}]",
            self.task_id, self.minimal_start_ticks, self.shard_key
        )
    }
}

/// Written location of an index entry: the row of its time partition and
/// the column inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub row_key: String,
    pub column_name: String,
}

/// Row key of the partition that contains `ticks` for a shard.
pub fn index_row_key(shard_key: &TaskIndexShardKey, ticks: Ticks) -> String {
    format!("index_{}_{:020}", shard_key, partition_start(ticks))
}

/// Column name encoding (ticks, task id); zero-padding makes the backend's
/// lexicographic column order equal numeric tick order.
pub fn index_column_name(ticks: Ticks, task_id: &str) -> String {
    format!("{:020}_{}", ticks, task_id)
}

/// Decodes a column name back into (ticks, task id).
pub fn parse_index_column_name(column_name: &str) -> Option<(Ticks, &str)> {
    let (ticks, task_id) = column_name.split_once('_')?;
    Some((ticks.parse().ok()?, task_id))
}

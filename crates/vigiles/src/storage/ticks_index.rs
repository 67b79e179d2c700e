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

//! The minimal-start-ticks index.
//!
//! Secondary index over live tasks, sharded by (topic, state) and bucketed
//! into coarse time partitions, ordered by each task's
//! `minimal_start_ticks`. "Find everything due by now" walks partitions
//! from the shard's oldest-live-record watermark to the partition of "now".
//!
//! The index is derived data. It may be transiently stale relative to the
//! authoritative metas; the dispatch state machine detects and repairs
//! that, so every operation here is individually idempotent and
//! non-transactional.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::columns::{Column, ColumnStorage};
use super::oldest_live::OldestLiveRecordTicksHolder;
use crate::error::StorageError;
use crate::models::index_record::{index_row_key, parse_index_column_name};
use crate::models::{ColumnInfo, TaskIndexRecord, TaskIndexShardKey, TaskMeta};
use crate::time::{partition_start, Ticks, TICKS_PARTITION};

/// Columns fetched per page while scanning a partition row.
const SCAN_PAGE_SIZE: usize = 1_000;

/// The minimal-start-ticks index over a column storage backend.
pub struct MinimalStartTicksIndex {
    columns: Arc<dyn ColumnStorage>,
    oldest_live: OldestLiveRecordTicksHolder,
}

impl MinimalStartTicksIndex {
    pub fn new(columns: Arc<dyn ColumnStorage>) -> Self {
        let oldest_live = OldestLiveRecordTicksHolder::new(columns.clone());
        Self {
            columns,
            oldest_live,
        }
    }

    /// Idempotently ensures an entry matching the meta's projection exists
    /// and returns its written location.
    pub async fn index_meta(
        &self,
        meta: &TaskMeta,
        now_ticks: Ticks,
    ) -> Result<ColumnInfo, StorageError> {
        self.add_record(&TaskIndexRecord::for_meta(meta), now_ticks, meta.ttl())
            .await
    }

    /// Removes a specific prior entry. Safe no-op when absent.
    pub async fn unindex_meta(
        &self,
        column_info: &ColumnInfo,
        now_ticks: Ticks,
    ) -> Result<(), StorageError> {
        self.columns
            .delete(&column_info.row_key, &column_info.column_name, now_ticks)
            .await
    }

    /// Writes an index record, rolling the shard watermark back first when
    /// the record lands behind it.
    pub async fn add_record(
        &self,
        record: &TaskIndexRecord,
        now_ticks: Ticks,
        ttl: Option<Duration>,
    ) -> Result<ColumnInfo, StorageError> {
        self.oldest_live
            .move_backward_if_necessary(&record.shard_key, record.minimal_start_ticks)
            .await?;
        let column_info = record.column_info();
        self.columns
            .write(
                &column_info.row_key,
                Column {
                    name: column_info.column_name.clone(),
                    value: record.task_id.clone().into_bytes(),
                    timestamp: now_ticks,
                    ttl,
                },
            )
            .await?;
        Ok(column_info)
    }

    /// Removes an index record.
    pub async fn remove_record(
        &self,
        record: &TaskIndexRecord,
        now_ticks: Ticks,
    ) -> Result<(), StorageError> {
        self.unindex_meta(&record.column_info(), now_ticks).await
    }

    /// Enumerates records of a shard with `minimal_start_ticks <= to_ticks`,
    /// ascending by ticks, scanning from the shard watermark.
    ///
    /// A scan that reads the shard to the end advances the watermark to the
    /// oldest record it saw (or just past `to_ticks` when it saw none),
    /// unless a concurrent older write invalidated the scan session.
    pub async fn get_task_ids(
        &self,
        shard_key: &TaskIndexShardKey,
        to_ticks: Ticks,
    ) -> Result<Vec<TaskIndexRecord>, StorageError> {
        let Some(from_ticks) = self
            .oldest_live
            .try_start_read_to_end_session(shard_key)
            .await?
        else {
            return Ok(Vec::new());
        };
        if to_ticks < from_ticks {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut partition = partition_start(from_ticks);
        let last_partition = partition_start(to_ticks);
        while partition <= last_partition {
            let row_key = index_row_key(shard_key, partition);
            let mut start_column: Option<String> = None;
            loop {
                let page = self
                    .columns
                    .read_range(&row_key, start_column.as_deref(), SCAN_PAGE_SIZE)
                    .await?;
                let page_len = page.len();
                let mut beyond_horizon = false;
                for column in &page {
                    let Some((ticks, task_id)) = parse_index_column_name(&column.name) else {
                        debug!(%row_key, column = %column.name, "skipping unparsable index column");
                        continue;
                    };
                    if ticks > to_ticks {
                        // Columns are tick-ordered: the rest of this row is
                        // beyond the horizon too.
                        beyond_horizon = true;
                        break;
                    }
                    records.push(TaskIndexRecord {
                        task_id: task_id.to_string(),
                        minimal_start_ticks: ticks,
                        shard_key: shard_key.clone(),
                    });
                }
                if beyond_horizon {
                    break;
                }
                match page.last() {
                    Some(last) if page_len == SCAN_PAGE_SIZE => {
                        start_column = Some(last.name.clone());
                    }
                    _ => break,
                }
            }
            partition += TICKS_PARTITION;
        }

        let new_watermark = records
            .first()
            .map(|record| record.minimal_start_ticks)
            .unwrap_or(to_ticks + 1);
        self.oldest_live
            .try_move_forward(shard_key, new_watermark)
            .await?;
        Ok(records)
    }
}

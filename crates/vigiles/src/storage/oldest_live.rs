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

//! Oldest-live-record watermark per index shard.
//!
//! The watermark bounds where a due-task scan has to start, so scan cost
//! does not grow with the age of the queue. It moves forward only after a
//! scan has read its shard to the end, and any write of an older record
//! rolls it back and invalidates in-flight read-to-end sessions — late
//! writes (clock skew, index repair) therefore never get skipped forever.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::columns::{Column, ColumnStorage};
use crate::error::StorageError;
use crate::models::TaskIndexShardKey;
use crate::time::Ticks;
use std::sync::Arc;

const WATERMARK_ROW_KEY: &str = "oldest_live_record_ticks";

#[derive(Debug, Clone, Copy)]
struct TicksMarker {
    ticks: Ticks,
    /// Set by a read-to-end session start, cleared by any backward move;
    /// a forward move only applies while it is still set.
    move_forward_allowed: bool,
}

/// Tracks the oldest tick still referenced per shard, persisted in the
/// column store and cached in memory.
pub struct OldestLiveRecordTicksHolder {
    columns: Arc<dyn ColumnStorage>,
    markers: Mutex<HashMap<TaskIndexShardKey, TicksMarker>>,
}

impl OldestLiveRecordTicksHolder {
    pub fn new(columns: Arc<dyn ColumnStorage>) -> Self {
        Self {
            columns,
            markers: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a read-to-end scan session and returns the safe lower bound
    /// to scan from, or `None` when the shard has never held a record.
    pub async fn try_start_read_to_end_session(
        &self,
        shard_key: &TaskIndexShardKey,
    ) -> Result<Option<Ticks>, StorageError> {
        let mut markers = self.markers.lock().await;
        if !markers.contains_key(shard_key) {
            if let Some(persisted) = self.read_persisted(shard_key).await? {
                markers.insert(
                    shard_key.clone(),
                    TicksMarker {
                        ticks: persisted,
                        move_forward_allowed: false,
                    },
                );
            }
        }
        Ok(markers.get_mut(shard_key).map(|marker| {
            marker.move_forward_allowed = true;
            marker.ticks
        }))
    }

    /// Advances the watermark after a completed read-to-end scan. A no-op
    /// when a backward move invalidated the session in the meantime, or
    /// when `new_ticks` would not actually move the watermark forward.
    pub async fn try_move_forward(
        &self,
        shard_key: &TaskIndexShardKey,
        new_ticks: Ticks,
    ) -> Result<(), StorageError> {
        let mut markers = self.markers.lock().await;
        let Some(marker) = markers.get_mut(shard_key) else {
            return Ok(());
        };
        if !marker.move_forward_allowed || new_ticks <= marker.ticks {
            debug!(
                shard_key = %shard_key,
                new_ticks,
                current = marker.ticks,
                "skipping watermark forward move"
            );
            return Ok(());
        }
        marker.ticks = new_ticks;
        marker.move_forward_allowed = false;
        self.write_persisted(shard_key, new_ticks).await
    }

    /// Lowers the watermark when a record older than it is written, and
    /// invalidates any in-flight read-to-end session for the shard.
    pub async fn move_backward_if_necessary(
        &self,
        shard_key: &TaskIndexShardKey,
        new_ticks: Ticks,
    ) -> Result<(), StorageError> {
        let mut markers = self.markers.lock().await;
        let marker = match markers.entry(shard_key.clone()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let persisted = self.read_persisted(shard_key).await?;
                entry.insert(TicksMarker {
                    ticks: persisted.unwrap_or(Ticks::MAX),
                    move_forward_allowed: false,
                })
            }
        };
        if new_ticks >= marker.ticks {
            return Ok(());
        }
        warn!(
            shard_key = %shard_key,
            new_ticks,
            current = marker.ticks,
            "moving oldest-live-record watermark backward"
        );
        marker.ticks = new_ticks;
        marker.move_forward_allowed = false;
        self.write_persisted(shard_key, new_ticks).await
    }

    async fn read_persisted(
        &self,
        shard_key: &TaskIndexShardKey,
    ) -> Result<Option<Ticks>, StorageError> {
        let column = self
            .columns
            .read(WATERMARK_ROW_KEY, &shard_key.to_string())
            .await?;
        match column {
            None => Ok(None),
            Some(column) => {
                let text =
                    String::from_utf8(column.value).map_err(|e| StorageError::Corrupted {
                        key: shard_key.to_string(),
                        message: format!("watermark is not utf-8: {}", e),
                    })?;
                text.parse::<Ticks>()
                    .map(Some)
                    .map_err(|e| StorageError::Corrupted {
                        key: shard_key.to_string(),
                        message: format!("watermark is not a tick value: {}", e),
                    })
            }
        }
    }

    async fn write_persisted(
        &self,
        shard_key: &TaskIndexShardKey,
        ticks: Ticks,
    ) -> Result<(), StorageError> {
        // The persisted cell is a plain min register: stamping writes with
        // `MAX - ticks` makes the lowest tick value win the backend's
        // last-write-wins resolution, concurrent writers included.
        self.columns
            .write(
                WATERMARK_ROW_KEY,
                Column {
                    name: shard_key.to_string(),
                    value: ticks.to_string().into_bytes(),
                    timestamp: Ticks::MAX - ticks,
                    ttl: None,
                },
            )
            .await
    }
}

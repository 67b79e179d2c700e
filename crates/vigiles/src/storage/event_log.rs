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

//! Append-only queue event log.
//!
//! Every meta write appends a `(task_id, ticks)` entry, bucketed by ticks
//! partition. Monitoring and audit consumers read it by tick range; the
//! dispatch protocol itself never reads it back.

use std::sync::Arc;
use std::time::Duration;

use super::columns::{Column, ColumnStorage};
use crate::error::StorageError;
use crate::models::TaskQueueEvent;
use crate::time::{partition_start, Ticks, TICKS_PARTITION};

const EVENT_PAGE_SIZE: usize = 1_000;

fn event_row_key(ticks: Ticks) -> String {
    format!("queue_events_{:020}", partition_start(ticks))
}

fn event_column_name(ticks: Ticks, task_id: &str) -> String {
    format!("{:020}_{}", ticks, task_id)
}

/// The append-only event log over a column storage backend.
pub struct EventLogStorage {
    columns: Arc<dyn ColumnStorage>,
}

impl EventLogStorage {
    pub fn new(columns: Arc<dyn ColumnStorage>) -> Self {
        Self { columns }
    }

    /// Appends one event, expiring with the task's TTL.
    pub async fn add_event(
        &self,
        task_id: &str,
        ticks: Ticks,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let event = TaskQueueEvent {
            task_id: task_id.to_string(),
            ticks,
        };
        self.columns
            .write(
                &event_row_key(ticks),
                Column {
                    name: event_column_name(ticks, task_id),
                    value: serde_json::to_vec(&event)?,
                    timestamp: ticks,
                    ttl,
                },
            )
            .await
    }

    /// Reads events with `from_ticks <= ticks <= to_ticks`, ascending.
    pub async fn get_events(
        &self,
        from_ticks: Ticks,
        to_ticks: Ticks,
    ) -> Result<Vec<TaskQueueEvent>, StorageError> {
        let mut events = Vec::new();
        let mut partition = partition_start(from_ticks);
        let last_partition = partition_start(to_ticks);
        while partition <= last_partition {
            let row_key = event_row_key(partition);
            let mut start_column: Option<String> = None;
            loop {
                let page = self
                    .columns
                    .read_range(&row_key, start_column.as_deref(), EVENT_PAGE_SIZE)
                    .await?;
                let page_len = page.len();
                for column in &page {
                    let event: TaskQueueEvent = serde_json::from_slice(&column.value)?;
                    if event.ticks >= from_ticks && event.ticks <= to_ticks {
                        events.push(event);
                    }
                }
                match page.last() {
                    Some(last) if page_len == EVENT_PAGE_SIZE => {
                        start_column = Some(last.name.clone());
                    }
                    _ => break,
                }
            }
            partition += TICKS_PARTITION;
        }
        Ok(events)
    }
}

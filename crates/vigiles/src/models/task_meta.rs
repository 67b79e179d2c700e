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

//! Authoritative task metadata.
//!
//! A [`TaskMeta`] is the single source of truth for one task. It is created
//! by the producer, mutated only by the dispatch state machine while the
//! task's distributed lock is held, and becomes immutable once the state is
//! terminal. The secondary index never writes it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::index_record::TaskIndexRecord;
use crate::time::{duration_to_ticks, ticks_to_datetime, Ticks};

/// Lifecycle state of a task.
///
/// States only move forward: `New -> InProcess -> {Finished | Fatal |
/// Canceled}`, with `InProcess -> WaitingForRerun[AfterError] -> InProcess`
/// loops for deliberate or error-driven retries. `Canceled` may be set
/// externally from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Enqueued, never picked up.
    New,
    /// Scheduled for a deliberate rerun (no error recorded).
    WaitingForRerun,
    /// Scheduled for a retry after a handler-reported error.
    WaitingForRerunAfterError,
    /// A node is executing the task right now.
    InProcess,
    /// Completed successfully. Terminal.
    Finished,
    /// Failed permanently. Terminal.
    Fatal,
    /// Canceled externally. Terminal.
    Canceled,
}

impl TaskState {
    /// Whether no further transition out of this state may occur.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Fatal | TaskState::Canceled
        )
    }

    /// Stable lowercase name used in index row keys and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::New => "new",
            TaskState::WaitingForRerun => "waiting_for_rerun",
            TaskState::WaitingForRerunAfterError => "waiting_for_rerun_after_error",
            TaskState::InProcess => "in_process",
            TaskState::Finished => "finished",
            TaskState::Fatal => "fatal",
            TaskState::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative metadata record for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMeta {
    /// Opaque unique task id.
    pub id: String,
    /// Handler type selector.
    pub name: String,
    /// Topic the task is filed under; part of the index shard key.
    pub topic: String,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Number of in-process transitions so far. Non-decreasing while live.
    pub attempts: i32,
    /// Earliest tick at which the task becomes eligible for pickup.
    pub minimal_start_ticks: Ticks,
    /// Start of the last execution window, if any.
    pub start_executing_ticks: Option<Ticks>,
    /// End of the last execution window, if any.
    pub finish_executing_ticks: Option<Ticks>,
    /// Timestamp of the last meta write; strictly increases per write.
    pub last_modification_ticks: Option<Ticks>,
    /// Tick at which the stored record expires, if a TTL is set.
    pub expiration_timestamp_ticks: Option<Ticks>,
    /// TTL the record was last written with, in ticks.
    pub ttl_ticks: Option<Ticks>,
    /// Optional cooperative group-exclusion key.
    pub task_group_lock: Option<String>,
    /// Causal link for task chains created from inside a handler.
    pub parent_task_id: Option<String>,
    /// Ordered references to recorded failures.
    pub exception_info_ids: Vec<Uuid>,
    /// Tick at which the task was created.
    pub creation_ticks: Ticks,
    /// Optional tracing correlation id.
    pub trace_id: Option<String>,

    /// Index record as of the last read/write, used to unindex the prior
    /// entry on the next write. Never persisted.
    #[serde(skip)]
    index_snapshot: Option<TaskIndexRecord>,
}

impl TaskMeta {
    /// Creates a fresh `New` meta. Producer-side entry point.
    pub fn new(id: String, name: String, topic: String, creation_ticks: Ticks) -> Self {
        Self {
            id,
            name,
            topic,
            state: TaskState::New,
            attempts: 0,
            minimal_start_ticks: creation_ticks,
            start_executing_ticks: None,
            finish_executing_ticks: None,
            last_modification_ticks: None,
            expiration_timestamp_ticks: None,
            ttl_ticks: None,
            task_group_lock: None,
            parent_task_id: None,
            exception_info_ids: Vec::new(),
            creation_ticks,
            trace_id: None,
            index_snapshot: None,
        }
    }

    /// Creation time as a wall-clock timestamp.
    pub fn creation_time(&self) -> DateTime<Utc> {
        ticks_to_datetime(self.creation_ticks)
    }

    /// The TTL this record was last written with.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ticks
            .map(|ticks| Duration::from_nanos(ticks.max(0) as u64))
    }

    /// Sets the TTL and recomputes the expiration point from `now_ticks`.
    pub fn set_or_update_ttl(&mut self, ttl: Duration, now_ticks: Ticks) {
        let ttl_ticks = duration_to_ticks(ttl);
        self.ttl_ticks = Some(ttl_ticks);
        self.expiration_timestamp_ticks = Some(now_ticks.saturating_add(ttl_ticks));
    }

    /// Whether less than half of the configured TTL remains.
    ///
    /// Prolongation is best-effort: a missed extension risks premature
    /// reclamation of the record, not a correctness violation.
    pub fn needs_ttl_prolongation(&self, now_ticks: Ticks) -> bool {
        match (self.expiration_timestamp_ticks, self.ttl_ticks) {
            (Some(expiration), Some(ttl)) => expiration - now_ticks < ttl / 2,
            _ => false,
        }
    }

    /// Remembers the current index projection for change detection on the
    /// next write.
    pub(crate) fn make_snapshot(&mut self) {
        self.index_snapshot = Some(TaskIndexRecord::for_meta(self));
    }

    /// The index projection as of the last read/write, if any.
    pub(crate) fn index_record_snapshot(&self) -> Option<&TaskIndexRecord> {
        self.index_snapshot.as_ref()
    }
}

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

//! Persisted diagnostic records: the append-only queue event log entries and
//! recorded handler failures.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::Ticks;

/// One entry of the append-only queue event log, written on every meta
/// write for audit and monitoring consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQueueEvent {
    pub task_id: String,
    pub ticks: Ticks,
}

/// A recorded handler failure, referenced from the meta's ordered
/// `exception_info_ids` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExceptionInfo {
    pub id: Uuid,
    pub task_id: String,
    pub exception_message_info: String,
    pub recording_ticks: Ticks,
}

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

//! Data model for the task queue: authoritative task metadata, the derived
//! index projection, handler verdicts, and the persisted diagnostic records.

pub mod events;
pub mod handle_result;
pub mod index_record;
pub mod task;
pub mod task_meta;

pub use events::{TaskExceptionInfo, TaskQueueEvent};
pub use handle_result::HandleResult;
pub use index_record::{ColumnInfo, TaskIndexRecord, TaskIndexShardKey};
pub use task::Task;
pub use task_meta::{TaskMeta, TaskState};

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

//! Task execution: the per-attempt state machine, the local worker pool it
//! runs on, and the execution-scoped task context.

pub mod context;
pub mod handler_task;
pub mod local_queue;

pub use context::TaskExecutionContext;
pub use handler_task::{
    HandlerTask, LocalTaskProcessingResult, TaskQueueReason,
    MAX_ALLOWED_INDEX_INCONSISTENCY_DURATION,
};
pub use local_queue::LocalTaskQueue;

use std::sync::Arc;
use std::time::Duration;

use crate::lock::RemoteLockService;
use crate::producer::TaskQueueProducer;
use crate::registry::HandlerRegistry;
use crate::storage::{
    MinimalStartTicksIndex, TaskCollection, TaskExceptionInfoStorage, TaskMetaStorage,
};
use crate::time::{Clock, GlobalClock};

/// Shared collaborators handed to every [`HandlerTask`].
pub struct QueueInternals {
    pub meta_storage: Arc<TaskMetaStorage>,
    pub task_collection: Arc<TaskCollection>,
    pub index: Arc<MinimalStartTicksIndex>,
    pub exception_infos: Arc<TaskExceptionInfoStorage>,
    pub lock_service: Arc<dyn RemoteLockService>,
    pub registry: Arc<HandlerRegistry>,
    pub producer: Arc<TaskQueueProducer>,
    /// Local high-resolution clock; orders this node's own writes.
    pub clock: Arc<dyn Clock>,
    /// Cluster-facing timestamp issuer for index writes.
    pub global_clock: Arc<GlobalClock>,
    /// TTL re-stamped on records by prolongation.
    pub task_ttl: Duration,
}

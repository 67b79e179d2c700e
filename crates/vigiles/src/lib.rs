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

//! # Vigiles
//!
//! A distributed task queue engine over a shared column store: clients
//! enqueue named, serialized tasks; a fleet of worker processes picks them
//! up with at-least-once execution and idempotent state transitions,
//! automatic retry, delayed rerun, TTL management, and tolerance to crashes
//! and partitions — without a central coordinator.
//!
//! ## Architecture
//!
//! - [`producer::TaskQueueProducer`] writes `New` task metas and payloads.
//! - [`storage::MinimalStartTicksIndex`] is a time-bucketed secondary index
//!   that makes "find due tasks" cheap, with an oldest-live-record
//!   watermark bounding scan cost.
//! - [`dispatcher::HandlerManager`] polls the index, applies admission
//!   control and sharding, and feeds a bounded local worker pool.
//! - [`executor::HandlerTask`] is the per-attempt state machine: it
//!   reconciles index/meta consistency, takes the distributed locks, runs
//!   the registered handler, and persists the transition its verdict maps
//!   to.
//!
//! Cross-node exclusion comes solely from the lock service contract
//! ([`lock::RemoteLockService`]): at most one concurrent execution per task
//! id — and per task group — across the entire fleet. The store itself
//! only offers single-row last-write-wins writes; the index is allowed to
//! be transiently stale and the state machine detects, waits out, and
//! finally repairs inconsistencies.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut registry = HandlerRegistry::new();
//! registry.register("send-mail", || SendMailHandler)?;
//!
//! let manager = Arc::new(HandlerManager::new(
//!     QueueConfig::default(),
//!     internals,
//!     Arc::new(NoShardingStrategy),
//! ));
//! manager.start().await;
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod lock;
pub mod models;
pub mod producer;
pub mod registry;
pub mod storage;
pub mod time;

pub use config::QueueConfig;
pub use dispatcher::{HandlerManager, NoShardingStrategy, ShardingStrategy};
pub use error::{HandlerError, LockError, QueueError, RegistryError, StorageError};
pub use executor::{
    HandlerTask, LocalTaskProcessingResult, QueueInternals, TaskExecutionContext, TaskQueueReason,
};
pub use lock::{InMemoryLockService, LockGuard, RemoteLockService};
pub use models::{
    ColumnInfo, HandleResult, Task, TaskIndexRecord, TaskIndexShardKey, TaskMeta, TaskState,
};
pub use producer::{CreateTaskOptions, TaskQueueProducer};
pub use registry::{HandlerRegistry, TaskHandler};
pub use storage::{
    BlobStorage, ColumnStorage, MinimalStartTicksIndex, TaskCollection, TaskMetaStorage,
};
pub use time::{Clock, GlobalClock, ManualClock, SystemClock, Ticks};

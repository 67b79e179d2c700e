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

//! Task producer: the enqueue side of the queue.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::StorageError;
use crate::executor::context::TaskExecutionContext;
use crate::models::{Task, TaskMeta};
use crate::storage::TaskCollection;
use crate::time::{duration_to_ticks, Clock};

/// Options for creating a task. All fields default.
#[derive(Debug, Default, Clone)]
pub struct CreateTaskOptions {
    /// Delay before the task becomes eligible for pickup.
    pub delay: Option<Duration>,
    /// Topic override; the producer's default topic otherwise.
    pub topic: Option<String>,
    /// Cooperative group-exclusion key.
    pub task_group_lock: Option<String>,
    /// Explicit causal parent. Defaults to the currently executing task
    /// when the producer is called from inside a handler.
    pub parent_task_id: Option<String>,
    /// Tracing correlation id.
    pub trace_id: Option<String>,
    /// Explicit task id; a fresh uuid otherwise.
    pub task_id: Option<String>,
}

/// Creates tasks in the shared store.
pub struct TaskQueueProducer {
    tasks: Arc<TaskCollection>,
    clock: Arc<dyn Clock>,
    default_topic: String,
    task_ttl: Duration,
}

impl TaskQueueProducer {
    pub fn new(
        tasks: Arc<TaskCollection>,
        clock: Arc<dyn Clock>,
        default_topic: String,
        task_ttl: Duration,
    ) -> Self {
        Self {
            tasks,
            clock,
            default_topic,
            task_ttl,
        }
    }

    /// Enqueues a `New` task with an opaque payload and returns its id.
    pub async fn create_task(
        &self,
        task_name: &str,
        payload: Vec<u8>,
        options: CreateTaskOptions,
    ) -> Result<String, StorageError> {
        let now_ticks = self.clock.now_ticks();
        let task_id = options
            .task_id
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let topic = options
            .topic
            .unwrap_or_else(|| self.default_topic.clone());

        let mut meta = TaskMeta::new(task_id.clone(), task_name.to_string(), topic, now_ticks);
        meta.minimal_start_ticks =
            now_ticks + options.delay.map(duration_to_ticks).unwrap_or(0);
        meta.task_group_lock = options.task_group_lock;
        meta.parent_task_id = options
            .parent_task_id
            .or_else(TaskExecutionContext::current_task_id);
        meta.trace_id = options.trace_id;
        meta.set_or_update_ttl(self.task_ttl, now_ticks);

        self.tasks.add_task(meta, payload).await?;
        debug!(task_id = %task_id, task_name, "created task");
        Ok(task_id)
    }

    /// Enqueues a task with a JSON-serialized payload.
    pub async fn create_typed_task<T: Serialize>(
        &self,
        task_name: &str,
        payload: &T,
        options: CreateTaskOptions,
    ) -> Result<String, StorageError> {
        self.create_task(task_name, serde_json::to_vec(payload)?, options)
            .await
    }

    /// Reads metas and payloads for the given ids, skipping tasks that are
    /// missing or expired.
    pub async fn get_task_infos(&self, task_ids: &[String]) -> Result<Vec<Task>, StorageError> {
        let mut tasks = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            match self.tasks.get_task(task_id).await {
                Ok(task) => tasks.push(task),
                Err(StorageError::MetaNotFound(_)) | Err(StorageError::DataNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(tasks)
    }
}

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

//! Execution-scoped "current task" context.
//!
//! Valid only within the span of one handler invocation: the state machine
//! opens the scope around `handle_task` and it closes with the call. The
//! producer reads it to default `parent_task_id` on tasks enqueued from
//! inside a handler. Not global mutable state — a task-local slot.

use tokio::task_local;

use crate::models::Task;

task_local! {
    static CURRENT_TASK: TaskExecutionContext;
}

/// Identity of the task currently being executed on this task-local scope.
#[derive(Debug, Clone)]
pub struct TaskExecutionContext {
    pub task_id: String,
    pub task_name: String,
    pub trace_id: Option<String>,
}

impl TaskExecutionContext {
    /// Captures the context of a task about to be handled.
    pub(crate) fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.meta.id.clone(),
            task_name: task.meta.name.clone(),
            trace_id: task.meta.trace_id.clone(),
        }
    }

    /// Runs `future` with this context installed as the current task.
    pub(crate) async fn scope<F>(self, future: F) -> F::Output
    where
        F: std::future::Future,
    {
        CURRENT_TASK.scope(self, future).await
    }

    /// The context of the currently executing task, if any.
    pub fn current() -> Option<TaskExecutionContext> {
        CURRENT_TASK.try_with(|context| context.clone()).ok()
    }

    /// Id of the currently executing task, if any.
    pub fn current_task_id() -> Option<String> {
        CURRENT_TASK.try_with(|context| context.task_id.clone()).ok()
    }
}

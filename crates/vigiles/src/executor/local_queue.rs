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

//! Bounded local execution queue.
//!
//! Dispatch attempts run as spawned tasks, bounded by separate in-flight
//! limits for pulled work and for immediate continuations, with per-task-id
//! deduplication (one node never runs two attempts for the same id at
//! once; the distributed lock covers the cross-node case). `can_queue_task`
//! is the dispatcher's admission check: once the budget for a reason is
//! exhausted, the poll cycle stops submitting and ends early.
//!
//! Nothing cancels a handler mid-flight: stopping closes admission and
//! waits for in-flight attempts to complete, up to a timeout.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::handler_task::{HandlerTask, TaskQueueReason};

#[derive(Debug, Default)]
struct QueueState {
    inflight_ids: HashSet<String>,
    running_tasks: usize,
    running_continuations: usize,
}

struct LocalQueueInner {
    max_running_tasks: usize,
    max_running_continuations: usize,
    state: Mutex<QueueState>,
    stopped: AtomicBool,
    task_finished: Notify,
}

impl LocalQueueInner {
    fn reason_budget(&self, reason: TaskQueueReason) -> usize {
        match reason {
            TaskQueueReason::PullFromQueue => self.max_running_tasks,
            TaskQueueReason::TaskContinuation => self.max_running_continuations,
        }
    }

    fn try_admit(&self, task_id: &str, reason: TaskQueueReason) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        let mut state = self.state.lock().unwrap();
        let running = match reason {
            TaskQueueReason::PullFromQueue => state.running_tasks,
            TaskQueueReason::TaskContinuation => state.running_continuations,
        };
        if running >= self.reason_budget(reason) {
            return false;
        }
        if !state.inflight_ids.insert(task_id.to_string()) {
            debug!(task_id, "task is already in flight locally, not queueing");
            return false;
        }
        match reason {
            TaskQueueReason::PullFromQueue => state.running_tasks += 1,
            TaskQueueReason::TaskContinuation => state.running_continuations += 1,
        }
        true
    }

    fn finish(&self, task_id: &str, reason: TaskQueueReason) {
        let mut state = self.state.lock().unwrap();
        state.inflight_ids.remove(task_id);
        match reason {
            TaskQueueReason::PullFromQueue => state.running_tasks -= 1,
            TaskQueueReason::TaskContinuation => state.running_continuations -= 1,
        }
        drop(state);
        self.task_finished.notify_one();
    }

    fn queue_length(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.running_tasks + state.running_continuations
    }
}

/// The local worker pool running [`HandlerTask`]s.
#[derive(Clone)]
pub struct LocalTaskQueue {
    inner: Arc<LocalQueueInner>,
}

impl LocalTaskQueue {
    pub fn new(max_running_tasks: usize, max_running_continuations: usize) -> Self {
        Self {
            inner: Arc::new(LocalQueueInner {
                max_running_tasks,
                max_running_continuations,
                state: Mutex::new(QueueState::default()),
                stopped: AtomicBool::new(true),
                task_finished: Notify::new(),
            }),
        }
    }

    /// Opens admission.
    pub fn start(&self) {
        self.inner.stopped.store(false, Ordering::SeqCst);
    }

    /// Whether another task of the given reason would currently be
    /// admitted.
    pub fn can_queue_task(&self, reason: TaskQueueReason) -> bool {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return false;
        }
        let state = self.inner.state.lock().unwrap();
        let running = match reason {
            TaskQueueReason::PullFromQueue => state.running_tasks,
            TaskQueueReason::TaskContinuation => state.running_continuations,
        };
        running < self.inner.reason_budget(reason)
    }

    /// Number of attempts currently in flight.
    pub fn queue_length(&self) -> usize {
        self.inner.queue_length()
    }

    /// Submits an attempt. Returns false when admission denies it or the
    /// same task id is already in flight locally.
    pub fn queue_task(&self, handler_task: HandlerTask, reason: TaskQueueReason) -> bool {
        if !self.inner.try_admit(handler_task.task_id(), reason) {
            return false;
        }
        spawn_attempt(self.inner.clone(), handler_task, reason);
        true
    }

    /// Closes admission and waits for in-flight attempts to finish, up to
    /// `timeout`.
    pub async fn stop_and_wait(&self, timeout: Duration) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + timeout;
        loop {
            if self.inner.queue_length() == 0 {
                return;
            }
            let notified = self.inner.task_finished.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(
                    in_flight = self.inner.queue_length(),
                    "shutdown timeout elapsed with task attempts still in flight"
                );
                return;
            }
        }
    }
}

/// Runs one attempt on the pool, re-submitting an immediately-due rerun as
/// a continuation when its budget allows.
fn spawn_attempt(inner: Arc<LocalQueueInner>, handler_task: HandlerTask, reason: TaskQueueReason) {
    tokio::spawn(async move {
        let outcome = handler_task.run_task_with_outcome().await;
        let internals = handler_task.internals();
        let task_id = handler_task.task_id().to_string();
        inner.finish(&task_id, reason);

        if let Some((index_record, new_meta)) = outcome.continuation {
            if inner.try_admit(&index_record.task_id, TaskQueueReason::TaskContinuation) {
                debug!(task_id = %index_record.task_id, "re-submitting task as a local continuation");
                let continuation = HandlerTask::new(
                    index_record,
                    TaskQueueReason::TaskContinuation,
                    Some(new_meta),
                    internals,
                );
                spawn_attempt(inner, continuation, TaskQueueReason::TaskContinuation);
            }
        }
    });
}

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

//! The polling dispatcher.
//!
//! A single-flight poll cycle scans the index for due tasks across every
//! interesting state, batch-fetches their metas (tolerating missing ones),
//! and submits a [`HandlerTask`] per candidate to the local execution
//! queue. Admission control ends a cycle early — remaining due tasks are
//! picked up by other nodes or by the next cycle — and candidates failing
//! the sharding or handler-registration predicates are skipped without a
//! lock attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::sharding::ShardingStrategy;
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::executor::handler_task::{HandlerTask, TaskQueueReason};
use crate::executor::local_queue::LocalTaskQueue;
use crate::executor::QueueInternals;
use crate::models::{TaskIndexRecord, TaskMeta, TaskState};

/// States a poll cycle scans for due tasks.
const INTERESTING_STATES: [TaskState; 4] = [
    TaskState::New,
    TaskState::WaitingForRerun,
    TaskState::InProcess,
    TaskState::WaitingForRerunAfterError,
];

/// Metas fetched per batch within a cycle.
const META_BATCH_SIZE: usize = 100;

/// The polling dispatcher of one queue node.
pub struct HandlerManager {
    internals: Arc<QueueInternals>,
    sharding: Arc<dyn ShardingStrategy>,
    config: QueueConfig,
    local_queue: LocalTaskQueue,
    run_lock: tokio::sync::Mutex<()>,
    shutdown: Arc<AtomicBool>,
    poll_loop: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HandlerManager {
    pub fn new(
        config: QueueConfig,
        internals: Arc<QueueInternals>,
        sharding: Arc<dyn ShardingStrategy>,
    ) -> Self {
        let local_queue = LocalTaskQueue::new(
            config.max_running_tasks(),
            config.max_running_continuations(),
        );
        Self {
            internals,
            sharding,
            config,
            local_queue,
            run_lock: tokio::sync::Mutex::new(()),
            shutdown: Arc::new(AtomicBool::new(false)),
            poll_loop: std::sync::Mutex::new(None),
        }
    }

    /// Runs one poll cycle. Cycles are serialized: a cycle that starts
    /// while another is still running waits for it.
    pub async fn run_once(&self) -> Result<(), QueueError> {
        let _cycle = self.run_lock.lock().await;
        let now_ticks = self.internals.clock.now_ticks();
        let candidates = self
            .internals
            .meta_storage
            .get_all_tasks_in_states(now_ticks, self.config.topics(), &INTERESTING_STATES)
            .await?;
        debug!(due = candidates.len(), "poll cycle scanned the index");

        for batch in candidates.chunks(META_BATCH_SIZE) {
            let task_ids: Vec<String> =
                batch.iter().map(|record| record.task_id.clone()).collect();
            let metas = self
                .internals
                .meta_storage
                .get_metas_quiet(&task_ids)
                .await?;
            for (index_record, task_meta) in batch.iter().zip(metas) {
                if !self.local_queue.can_queue_task(TaskQueueReason::PullFromQueue) {
                    debug!("local queue is full, ending poll cycle early");
                    return Ok(());
                }
                self.queue_task(index_record, task_meta, TaskQueueReason::PullFromQueue);
            }
        }
        Ok(())
    }

    /// Submits one candidate, applying the registry and sharding
    /// predicates. A candidate with a missing meta is still submitted so
    /// the state machine can reap its orphaned index record.
    fn queue_task(
        &self,
        index_record: &TaskIndexRecord,
        task_meta: Option<TaskMeta>,
        reason: TaskQueueReason,
    ) {
        if let Some(task_meta) = &task_meta {
            if !self.internals.registry.contains_handler_for(&task_meta.name) {
                // Left in the index for a node that has the handler.
                return;
            }
        }
        if !self.sharding.is_suitable_task(index_record) {
            return;
        }
        let handler_task = HandlerTask::new(
            index_record.clone(),
            reason,
            task_meta,
            self.internals.clone(),
        );
        self.local_queue.queue_task(handler_task, reason);
    }

    /// Opens the local queue for admission.
    pub fn start(&self) {
        self.shutdown.store(false, Ordering::SeqCst);
        self.local_queue.start();
        info!("handler manager started");
    }

    /// Spawns the background poll loop at the configured interval. The
    /// loop runs until [`stop`](Self::stop).
    pub fn spawn_polling(self: &Arc<Self>) {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.poll_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if manager.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = manager.run_once().await {
                    error!(error = %e, "poll cycle failed");
                }
            }
        });
        if let Some(previous) = self.poll_loop.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    /// Stops the poll loop and drains in-flight attempts.
    pub async fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let handle = self.poll_loop.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        self.local_queue
            .stop_and_wait(self.config.shutdown_timeout())
            .await;
        info!("handler manager stopped");
    }

    /// Number of attempts currently in flight locally.
    pub fn queue_length(&self) -> usize {
        self.local_queue.queue_length()
    }

    /// Counts due index records: `(total, owned by this node)`.
    pub async fn due_task_counts(&self) -> Result<(u64, u64), QueueError> {
        let now_ticks = self.internals.clock.now_ticks();
        let candidates = self
            .internals
            .meta_storage
            .get_all_tasks_in_states(now_ticks, self.config.topics(), &INTERESTING_STATES)
            .await?;
        let total = candidates.len() as u64;
        let owned = candidates
            .iter()
            .filter(|record| self.sharding.is_suitable_task(record))
            .count() as u64;
        Ok((total, owned))
    }
}

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

//! The per-task processing state machine.
//!
//! One `HandlerTask` is one dispatch attempt for one index record. Every
//! stage can exit with `Undefined` — do nothing, the next poll cycle
//! re-derives truth from storage:
//!
//! 1. No meta behind the record: reap the orphaned index entry.
//! 2. Pre-lock staleness check against the meta's projection; inside the
//!    inconsistency window a mismatch means "index not caught up yet".
//! 3. Group lock, if the task carries one.
//! 4. Per-task lock. Contention on either lock is a silent skip.
//! 5. Re-read the meta under the lock and re-check; past the window a
//!    mismatch is repaired (stale entry reaped for terminal tasks, index
//!    rewritten otherwise).
//! 6. Transition to `InProcess`: attempts + 1, execution window opened,
//!    `minimal_start_ticks` pushed past the partition horizon.
//! 7. Build the handler and run it in a task-local context scope.
//! 8. Map the verdict onto the next state and persist it.
//! 9. Best-effort TTL prolongation.
//! 10. Locks release in reverse acquisition order as scopes close.
//!
//! Everything a task's meta goes through here happens under that task's
//! distributed lock; the only unlocked read is the cheap pre-filter in
//! stage 2.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::context::TaskExecutionContext;
use super::QueueInternals;
use crate::models::{HandleResult, Task, TaskIndexRecord, TaskMeta, TaskState};
use crate::time::{duration_to_ticks, Ticks, TICKS_PARTITION, TICKS_PER_MICROSECOND};

/// Stale index entries younger than this are "not caught up yet" and get
/// skipped; older ones get repaired or reaped.
pub const MAX_ALLOWED_INDEX_INCONSISTENCY_DURATION: Duration = Duration::from_secs(60);

/// Attempts running longer than this are logged at warn. Observational
/// only.
const LONG_RUNNING_TASK_DURATION_THRESHOLD: Duration = Duration::from_secs(60);

/// Why a task was handed to the local queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskQueueReason {
    /// Picked up by the polling dispatcher.
    PullFromQueue,
    /// Re-submitted locally right after an attempt scheduled an immediate
    /// rerun.
    TaskContinuation,
}

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTaskProcessingResult {
    /// Handler ran and the task finished.
    Success,
    /// Handler failed (or could not be built); the task is `Fatal`.
    Error,
    /// Handler asked for a rerun; the task is waiting.
    Rerun,
    /// Nothing happened: skipped, contended, stale, or abandoned.
    Undefined,
}

pub(crate) struct HandlerTaskOutcome {
    pub result: LocalTaskProcessingResult,
    /// When the attempt scheduled a rerun that is already due, the
    /// candidate for an immediate local re-submission.
    pub continuation: Option<(TaskIndexRecord, TaskMeta)>,
}

/// One dispatch attempt for one index record.
pub struct HandlerTask {
    index_record: TaskIndexRecord,
    reason: TaskQueueReason,
    task_meta: Option<TaskMeta>,
    internals: Arc<QueueInternals>,
}

impl HandlerTask {
    pub fn new(
        index_record: TaskIndexRecord,
        reason: TaskQueueReason,
        task_meta: Option<TaskMeta>,
        internals: Arc<QueueInternals>,
    ) -> Self {
        Self {
            index_record,
            reason,
            task_meta,
            internals,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.index_record.task_id
    }

    pub(crate) fn internals(&self) -> Arc<QueueInternals> {
        self.internals.clone()
    }

    /// Runs the attempt to completion.
    pub async fn run_task(&self) -> LocalTaskProcessingResult {
        self.run_task_with_outcome().await.result
    }

    pub(crate) async fn run_task_with_outcome(&self) -> HandlerTaskOutcome {
        let Some(task_meta) = &self.task_meta else {
            // Index record whose meta never landed (producer crashed
            // mid-write): reap it.
            error!(
                index_record = %self.index_record,
                "removing index record whose task meta was never written"
            );
            let now_ticks = self.internals.global_clock.update_now_ticks();
            if let Err(e) = self
                .internals
                .index
                .remove_record(&self.index_record, now_ticks)
                .await
            {
                error!(index_record = %self.index_record, error = %e, "failed to remove orphaned index record");
            }
            return HandlerTaskOutcome {
                result: LocalTaskProcessingResult::Undefined,
                continuation: None,
            };
        };

        let local_now = self.internals.clock.now_ticks();
        if self.index_record != self.internals.meta_storage.format_index_record(task_meta)
            && self.index_record.minimal_start_ticks > local_now - inconsistency_window_ticks()
        {
            // The writer of this meta is presumed still propagating the
            // index; wait for it.
            debug!(
                task_id = %task_meta.id,
                index_record = %self.index_record,
                "index record does not match task meta yet, waiting"
            );
            return HandlerTaskOutcome {
                result: LocalTaskProcessingResult::Undefined,
                continuation: None,
            };
        }

        self.try_process_task_exclusively(task_meta).await
    }

    /// Stages 3-10: lock acquisition, processing, release.
    async fn try_process_task_exclusively(&self, task_meta: &TaskMeta) -> HandlerTaskOutcome {
        let _task_group_guard = match &task_meta.task_group_lock {
            Some(group_key) if !group_key.is_empty() => {
                match self.internals.lock_service.try_acquire(group_key).await {
                    Ok(Some(guard)) => {
                        debug!(task_id = %task_meta.id, %group_key, "acquired task group lock");
                        Some(guard)
                    }
                    Ok(None) => {
                        debug!(task_id = %task_meta.id, %group_key, "task group lock is taken, skipping");
                        return self.undefined();
                    }
                    Err(e) => {
                        error!(task_id = %task_meta.id, %group_key, error = %e, "task group lock service failed");
                        return self.undefined();
                    }
                }
            }
            _ => None,
        };

        let task_guard = match self
            .internals
            .lock_service
            .try_acquire(&self.index_record.task_id)
            .await
        {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                debug!(index_record = %self.index_record, "task lock is taken, skipping");
                return self.undefined();
            }
            Err(e) => {
                error!(index_record = %self.index_record, error = %e, "task lock service failed");
                return self.undefined();
            }
        };

        let started_at = Instant::now();
        let outcome = self.process_task().await;
        drop(task_guard);
        let elapsed = started_at.elapsed();
        if elapsed > LONG_RUNNING_TASK_DURATION_THRESHOLD {
            warn!(
                task_id = %self.index_record.task_id,
                result = ?outcome.result,
                ?elapsed,
                "finished task attempt and released lock [LONG RUNNING]"
            );
        } else {
            debug!(
                task_id = %self.index_record.task_id,
                result = ?outcome.result,
                ?elapsed,
                "finished task attempt and released lock"
            );
        }
        outcome
        // _task_group_guard releases here, after the task lock.
    }

    /// Stages 5-9, under the task lock.
    async fn process_task(&self) -> HandlerTaskOutcome {
        // Never trust the meta read before locking.
        let task = match self
            .internals
            .task_collection
            .get_task(&self.index_record.task_id)
            .await
        {
            Ok(task) => task,
            Err(e) => {
                error!(index_record = %self.index_record, error = %e, "failed to read task under lock");
                return self.undefined();
            }
        };
        let old_meta = task.meta;
        let task_data = task.data;

        let local_now = self.internals.clock.now_ticks();
        if old_meta.needs_ttl_prolongation(local_now) {
            error!(task_id = %old_meta.id, "task record is close to expiry before processing");
        }

        let record_for_actual_meta = self.internals.meta_storage.format_index_record(&old_meta);
        if self.index_record != record_for_actual_meta {
            if self.index_record.minimal_start_ticks > local_now - inconsistency_window_ticks() {
                debug!(
                    task_id = %old_meta.id,
                    index_record = %self.index_record,
                    "index record still does not match the meta under lock, waiting"
                );
            } else if old_meta.state.is_terminal() {
                // Orphaned entry for an already-finished task.
                info!(
                    task_id = %old_meta.id,
                    state = %old_meta.state,
                    index_record = %self.index_record,
                    "removing stale index record of a task in a terminal state"
                );
                let now_ticks = self.internals.global_clock.update_now_ticks();
                if let Err(e) = self
                    .internals
                    .index
                    .remove_record(&self.index_record, now_ticks)
                    .await
                {
                    error!(task_id = %old_meta.id, error = %e, "failed to remove stale index record");
                }
            } else {
                // The index is simply wrong: self-heal.
                warn!(
                    task_id = %old_meta.id,
                    stale = %self.index_record,
                    actual = %record_for_actual_meta,
                    "repairing index record that stayed inconsistent past the allowed window"
                );
                let now_ticks = self.internals.global_clock.update_now_ticks();
                if let Err(e) = self
                    .internals
                    .index
                    .add_record(&record_for_actual_meta, now_ticks, old_meta.ttl())
                    .await
                {
                    error!(task_id = %old_meta.id, error = %e, "failed to write repaired index record");
                }
                if let Err(e) = self
                    .internals
                    .index
                    .remove_record(&self.index_record, now_ticks)
                    .await
                {
                    error!(task_id = %old_meta.id, error = %e, "failed to remove stale index record");
                }
            }
            return self.undefined();
        }

        if old_meta.attempts > 0 {
            debug!(task_id = %old_meta.id, attempts = old_meta.attempts, "task is being rerun");
        }
        debug!(
            task_id = %old_meta.id,
            reason = ?self.reason,
            index_record = %self.index_record,
            "starting task processing"
        );

        let Some(in_process_meta) = self.try_switch_to_in_process_state(&old_meta).await else {
            // Persisting the transition failed; behave as if another node
            // owns the task and do not run the handler.
            error!(task_id = %old_meta.id, "could not switch task to in-process state");
            return self.undefined();
        };

        let (result, new_meta) = self.do_process_task(&in_process_meta, &task_data).await;

        if let Some(new_meta) = &new_meta {
            let now_ticks = self.internals.clock.now_ticks();
            if new_meta.needs_ttl_prolongation(now_ticks) {
                debug!(task_id = %new_meta.id, "prolonging task ttl after processing");
                let mut prolonged = new_meta.clone();
                prolonged.set_or_update_ttl(self.internals.task_ttl, now_ticks);
                if let Err(e) = self
                    .internals
                    .task_collection
                    .prolong_task_ttl(&prolonged, &task_data)
                    .await
                {
                    // Losing an extension risks premature reclamation, not
                    // state corruption.
                    error!(task_id = %new_meta.id, error = %e, "failed to prolong task ttl");
                }
            }
        }

        let continuation = match (&result, &new_meta) {
            (LocalTaskProcessingResult::Rerun, Some(new_meta))
                if new_meta.minimal_start_ticks <= self.internals.clock.now_ticks() =>
            {
                Some((
                    self.internals.meta_storage.format_index_record(new_meta),
                    new_meta.clone(),
                ))
            }
            _ => None,
        };

        HandlerTaskOutcome {
            result,
            continuation,
        }
    }

    /// Stage 7-8: build the handler, run it, map the verdict.
    async fn do_process_task(
        &self,
        in_process_meta: &TaskMeta,
        task_data: &[u8],
    ) -> (LocalTaskProcessingResult, Option<TaskMeta>) {
        let handler = match self
            .internals
            .registry
            .create_handler_for(&in_process_meta.name)
        {
            Ok(handler) => handler,
            Err(e) => {
                let exception_info_ids = self.try_log_error(&e.to_string(), in_process_meta).await;
                return (
                    LocalTaskProcessingResult::Error,
                    self.try_switch_to_terminal_state(
                        in_process_meta,
                        TaskState::Fatal,
                        exception_info_ids,
                    )
                    .await,
                );
            }
        };

        let task = Task {
            meta: in_process_meta.clone(),
            data: task_data.to_vec(),
        };
        let context = TaskExecutionContext::for_task(&task);
        let producer = self.internals.producer.clone();
        let handle_result = context
            .scope(async { handler.handle_task(&producer, &task).await })
            .await;

        match handle_result {
            Ok(handle_result) => {
                self.update_task_meta_by_handle_result(in_process_meta, handle_result)
                    .await
            }
            Err(e) => {
                let exception_info_ids = self.try_log_error(&e.to_string(), in_process_meta).await;
                (
                    LocalTaskProcessingResult::Error,
                    self.try_switch_to_terminal_state(
                        in_process_meta,
                        TaskState::Fatal,
                        exception_info_ids,
                    )
                    .await,
                )
            }
        }
    }

    async fn update_task_meta_by_handle_result(
        &self,
        in_process_meta: &TaskMeta,
        handle_result: HandleResult,
    ) -> (LocalTaskProcessingResult, Option<TaskMeta>) {
        match handle_result {
            HandleResult::Finish => (
                LocalTaskProcessingResult::Success,
                self.try_switch_to_terminal_state(in_process_meta, TaskState::Finished, None)
                    .await,
            ),
            HandleResult::Fatal { error } => {
                let exception_info_ids =
                    self.try_log_error(&error.to_string(), in_process_meta).await;
                (
                    LocalTaskProcessingResult::Error,
                    self.try_switch_to_terminal_state(
                        in_process_meta,
                        TaskState::Fatal,
                        exception_info_ids,
                    )
                    .await,
                )
            }
            HandleResult::RerunAfterError { delay, error } => {
                let exception_info_ids =
                    self.try_log_error(&error.to_string(), in_process_meta).await;
                (
                    LocalTaskProcessingResult::Rerun,
                    self.try_switch_to_waiting_for_rerun_state(
                        in_process_meta,
                        TaskState::WaitingForRerunAfterError,
                        delay,
                        exception_info_ids,
                    )
                    .await,
                )
            }
            HandleResult::Rerun { delay } => (
                LocalTaskProcessingResult::Rerun,
                self.try_switch_to_waiting_for_rerun_state(
                    in_process_meta,
                    TaskState::WaitingForRerun,
                    delay,
                    None,
                )
                .await,
            ),
        }
    }

    /// Records a failure, best-effort: the task transitions the same way
    /// whether or not the record landed.
    async fn try_log_error(
        &self,
        error_message: &str,
        in_process_meta: &TaskMeta,
    ) -> Option<Vec<Uuid>> {
        error!(task_id = %in_process_meta.id, error = %error_message, "task processing failed");
        match self
            .internals
            .exception_infos
            .try_add_new_exception_info(
                in_process_meta,
                error_message,
                self.internals.clock.now_ticks(),
            )
            .await
        {
            Ok(exception_info_ids) => Some(exception_info_ids),
            Err(e) => {
                error!(task_id = %in_process_meta.id, error = %e, "failed to record task failure");
                None
            }
        }
    }

    /// Stage 6.
    async fn try_switch_to_in_process_state(&self, old_meta: &TaskMeta) -> Option<TaskMeta> {
        let now_ticks = self.internals.clock.now_ticks();
        // Push the task past the partition horizon so it is not re-picked
        // while running.
        let new_minimal_start_ticks = now_ticks + TICKS_PARTITION;
        self.try_update_task_state(
            old_meta,
            self.index_record.clone(),
            new_minimal_start_ticks,
            Some(now_ticks),
            None,
            old_meta.attempts + 1,
            TaskState::InProcess,
            None,
        )
        .await
    }

    async fn try_switch_to_terminal_state(
        &self,
        in_process_meta: &TaskMeta,
        terminal_state: TaskState,
        exception_info_ids: Option<Vec<Uuid>>,
    ) -> Option<TaskMeta> {
        let now_ticks = self.internals.clock.now_ticks();
        let in_process_record = self
            .internals
            .meta_storage
            .format_index_record(in_process_meta);
        self.try_update_task_state(
            in_process_meta,
            in_process_record,
            now_ticks,
            in_process_meta.start_executing_ticks,
            Some(now_ticks),
            in_process_meta.attempts,
            terminal_state,
            exception_info_ids,
        )
        .await
    }

    async fn try_switch_to_waiting_for_rerun_state(
        &self,
        in_process_meta: &TaskMeta,
        waiting_state: TaskState,
        rerun_delay: Duration,
        exception_info_ids: Option<Vec<Uuid>>,
    ) -> Option<TaskMeta> {
        let now_ticks = self.internals.clock.now_ticks();
        let in_process_record = self
            .internals
            .meta_storage
            .format_index_record(in_process_meta);
        self.try_update_task_state(
            in_process_meta,
            in_process_record,
            now_ticks + duration_to_ticks(rerun_delay),
            in_process_meta.start_executing_ticks,
            Some(now_ticks),
            in_process_meta.attempts,
            waiting_state,
            exception_info_ids,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_update_task_state(
        &self,
        old_meta: &TaskMeta,
        old_index_record: TaskIndexRecord,
        mut new_minimal_start_ticks: Ticks,
        start_executing_ticks: Option<Ticks>,
        finish_executing_ticks: Option<Ticks>,
        attempts: i32,
        new_state: TaskState,
        exception_info_ids: Option<Vec<Uuid>>,
    ) -> Option<TaskMeta> {
        let mut new_meta = old_meta.clone();
        if new_state == old_meta.state {
            // A same-state requeue must still produce a distinct index key.
            new_minimal_start_ticks = new_minimal_start_ticks
                .max(old_meta.minimal_start_ticks + TICKS_PER_MICROSECOND);
        }
        new_meta.minimal_start_ticks = new_minimal_start_ticks;
        new_meta.start_executing_ticks = start_executing_ticks;
        new_meta.finish_executing_ticks = finish_executing_ticks;
        new_meta.attempts = attempts;
        new_meta.state = new_state;
        if let Some(exception_info_ids) = exception_info_ids {
            if !exception_info_ids.is_empty() {
                new_meta.exception_info_ids = exception_info_ids;
            }
        }

        match self
            .internals
            .meta_storage
            .add_meta(new_meta, Some(&old_index_record))
            .await
        {
            Ok(new_meta) => {
                debug!(task_id = %new_meta.id, state = %new_meta.state, attempts = new_meta.attempts, "changed task state");
                Some(new_meta)
            }
            Err(e) => {
                error!(task_id = %old_meta.id, error = %e, "failed to update task state");
                None
            }
        }
    }

    fn undefined(&self) -> HandlerTaskOutcome {
        HandlerTaskOutcome {
            result: LocalTaskProcessingResult::Undefined,
            continuation: None,
        }
    }
}

fn inconsistency_window_ticks() -> Ticks {
    duration_to_ticks(MAX_ALLOWED_INDEX_INCONSISTENCY_DURATION)
}

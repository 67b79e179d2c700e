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

//! Scenario tests for the per-task state machine: consistency protocol
//! branches, verdict-to-state mapping, and cluster exclusion.

use std::sync::atomic::Ordering;
use std::time::Duration;

use vigiles::executor::TaskQueueReason;
use vigiles::models::{TaskIndexRecord, TaskIndexShardKey};
use vigiles::producer::CreateTaskOptions;
use vigiles::registry::HandlerRegistry;
use vigiles::time::{Clock, TICKS_PER_SECOND};
use vigiles::{HandlerTask, LocalTaskProcessingResult, TaskState};

use crate::fixtures::{
    register_gated, register_scripted, test_queue, wait_until, ScriptedOutcome,
};

#[tokio::test]
async fn test_candidate_without_meta_reaps_orphaned_index_record() {
    let queue = test_queue(HandlerRegistry::new());
    let now = queue.clock.now_ticks();
    let orphan = TaskIndexRecord {
        task_id: "ghost".to_string(),
        minimal_start_ticks: now,
        shard_key: TaskIndexShardKey::new("default", TaskState::New),
    };
    queue.index.add_record(&orphan, now, None).await.unwrap();

    let result = queue.handler_task_for(orphan).await.run_task().await;

    assert_eq!(result, LocalTaskProcessingResult::Undefined);
    assert!(queue
        .scan_shard(TaskState::New, now + TICKS_PER_SECOND)
        .await
        .is_empty());
}

#[tokio::test]
async fn test_mismatching_record_within_window_waits_without_locking() {
    let mut registry = HandlerRegistry::new();
    let invocations = register_scripted(&mut registry, "job", ScriptedOutcome::Finish);
    let queue = test_queue(registry);

    let task_id = queue.create_task("job", CreateTaskOptions::default()).await;
    let mut candidate = queue.current_record(&task_id).await;
    candidate.minimal_start_ticks += TICKS_PER_SECOND;

    let result = queue.handler_task_for(candidate).await.run_task().await;

    assert_eq!(result, LocalTaskProcessingResult::Undefined);
    assert_eq!(queue.lock_service.acquire_attempt_count(), 0);
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    let meta = queue.get_meta(&task_id).await;
    assert_eq!(meta.state, TaskState::New);
    assert_eq!(meta.attempts, 0);
}

#[tokio::test]
async fn test_stale_record_of_terminal_task_is_removed_without_processing() {
    let mut registry = HandlerRegistry::new();
    let invocations = register_scripted(&mut registry, "job", ScriptedOutcome::Finish);
    let queue = test_queue(registry);

    let task_id = queue.create_task("job", CreateTaskOptions::default()).await;
    let stale = queue.current_record(&task_id).await;
    assert_eq!(
        queue.run_candidate(&task_id).await,
        LocalTaskProcessingResult::Success
    );
    let finished = queue.get_meta(&task_id).await;
    assert_eq!(finished.state, TaskState::Finished);

    // Resurrect the pre-run index entry and age it past the window.
    queue
        .index
        .add_record(&stale, queue.clock.now_ticks(), None)
        .await
        .unwrap();
    queue.clock.advance(Duration::from_secs(180));

    let result = queue.handler_task_for(stale).await.run_task().await;

    assert_eq!(result, LocalTaskProcessingResult::Undefined);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert!(queue
        .scan_shard(TaskState::New, queue.clock.now_ticks())
        .await
        .is_empty());
    // Re-delivery of a stale entry never mutates a terminal meta.
    let after = queue.get_meta(&task_id).await;
    assert_eq!(after.state, TaskState::Finished);
    assert_eq!(after.attempts, finished.attempts);
    assert_eq!(after.last_modification_ticks, finished.last_modification_ticks);
}

#[tokio::test]
async fn test_stale_record_of_live_task_repairs_index_without_processing() {
    let mut registry = HandlerRegistry::new();
    let invocations = register_scripted(&mut registry, "job", ScriptedOutcome::Finish);
    let queue = test_queue(registry);

    let created_at = queue.clock.now_ticks();
    let task_id = queue
        .create_task(
            "job",
            CreateTaskOptions {
                delay: Some(Duration::from_secs(300)),
                ..Default::default()
            },
        )
        .await;

    // A stale entry pointing at the creation instant instead of the real
    // eligibility time.
    let stale = TaskIndexRecord {
        task_id: task_id.clone(),
        minimal_start_ticks: created_at,
        shard_key: TaskIndexShardKey::new("default", TaskState::New),
    };
    queue.index.add_record(&stale, created_at, None).await.unwrap();
    queue.clock.advance(Duration::from_secs(180));

    let result = queue.handler_task_for(stale).await.run_task().await;

    assert_eq!(result, LocalTaskProcessingResult::Undefined);
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    // The stale entry is gone; the correct one remains, due at +300s.
    assert!(queue
        .scan_shard(TaskState::New, queue.clock.now_ticks())
        .await
        .is_empty());
    let due_later = queue
        .scan_shard(TaskState::New, created_at + 301 * TICKS_PER_SECOND)
        .await;
    assert_eq!(due_later.len(), 1);
    assert_eq!(due_later[0].minimal_start_ticks, created_at + 300 * TICKS_PER_SECOND);
    let meta = queue.get_meta(&task_id).await;
    assert_eq!(meta.state, TaskState::New);
    assert_eq!(meta.attempts, 0);
}

#[tokio::test]
async fn test_successful_run_finishes_task() {
    let mut registry = HandlerRegistry::new();
    let invocations = register_scripted(&mut registry, "job", ScriptedOutcome::Finish);
    let queue = test_queue(registry);

    let started_at = queue.clock.now_ticks();
    let task_id = queue.create_task("job", CreateTaskOptions::default()).await;
    let result = queue.run_candidate(&task_id).await;

    assert_eq!(result, LocalTaskProcessingResult::Success);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    let meta = queue.get_meta(&task_id).await;
    assert_eq!(meta.state, TaskState::Finished);
    assert_eq!(meta.attempts, 1);
    assert_eq!(meta.start_executing_ticks, Some(started_at));
    assert_eq!(meta.finish_executing_ticks, Some(started_at));
    assert!(meta.exception_info_ids.is_empty());
    assert!(queue
        .scan_shard(TaskState::New, queue.clock.now_ticks() + TICKS_PER_SECOND)
        .await
        .is_empty());
}

#[tokio::test]
async fn test_rerun_verdict_schedules_waiting_for_rerun() {
    let mut registry = HandlerRegistry::new();
    register_scripted(
        &mut registry,
        "job",
        ScriptedOutcome::Rerun(Duration::from_secs(5)),
    );
    let queue = test_queue(registry);

    let task_id = queue.create_task("job", CreateTaskOptions::default()).await;
    let run_at = queue.clock.now_ticks();
    let result = queue.run_candidate(&task_id).await;

    assert_eq!(result, LocalTaskProcessingResult::Rerun);
    let meta = queue.get_meta(&task_id).await;
    assert_eq!(meta.state, TaskState::WaitingForRerun);
    assert_eq!(meta.minimal_start_ticks, run_at + 5 * TICKS_PER_SECOND);
    assert_eq!(meta.attempts, 1);
    // A deliberate rerun records no error.
    assert!(meta.exception_info_ids.is_empty());

    // The task becomes due again and attempts keep increasing one by one.
    queue.clock.advance(Duration::from_secs(6));
    assert_eq!(
        queue.run_candidate(&task_id).await,
        LocalTaskProcessingResult::Rerun
    );
    assert_eq!(queue.get_meta(&task_id).await.attempts, 2);
}

#[tokio::test]
async fn test_rerun_after_error_verdict_records_the_error() {
    let mut registry = HandlerRegistry::new();
    register_scripted(
        &mut registry,
        "job",
        ScriptedOutcome::RerunAfterError(Duration::from_secs(5)),
    );
    let queue = test_queue(registry);

    let task_id = queue.create_task("job", CreateTaskOptions::default()).await;
    let run_at = queue.clock.now_ticks();
    let result = queue.run_candidate(&task_id).await;

    assert_eq!(result, LocalTaskProcessingResult::Rerun);
    let meta = queue.get_meta(&task_id).await;
    assert_eq!(meta.state, TaskState::WaitingForRerunAfterError);
    assert_eq!(meta.minimal_start_ticks, run_at + 5 * TICKS_PER_SECOND);
    assert_eq!(meta.exception_info_ids.len(), 1);

    let infos = queue.exception_infos.read(&meta.exception_info_ids).await.unwrap();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].exception_message_info, "scripted retryable failure");
}

#[tokio::test]
async fn test_handler_failure_routes_task_to_fatal() {
    let mut registry = HandlerRegistry::new();
    register_scripted(&mut registry, "job", ScriptedOutcome::Fail);
    let queue = test_queue(registry);

    let task_id = queue.create_task("job", CreateTaskOptions::default()).await;
    let result = queue.run_candidate(&task_id).await;

    assert_eq!(result, LocalTaskProcessingResult::Error);
    let meta = queue.get_meta(&task_id).await;
    assert_eq!(meta.state, TaskState::Fatal);
    assert_eq!(meta.attempts, 1);
    assert_eq!(meta.exception_info_ids.len(), 1);
}

#[tokio::test]
async fn test_fatal_verdict_routes_task_to_fatal() {
    let mut registry = HandlerRegistry::new();
    register_scripted(&mut registry, "job", ScriptedOutcome::Fatal);
    let queue = test_queue(registry);

    let task_id = queue.create_task("job", CreateTaskOptions::default()).await;
    assert_eq!(
        queue.run_candidate(&task_id).await,
        LocalTaskProcessingResult::Error
    );
    let meta = queue.get_meta(&task_id).await;
    assert_eq!(meta.state, TaskState::Fatal);
    assert_eq!(meta.exception_info_ids.len(), 1);
}

#[tokio::test]
async fn test_handler_construction_failure_routes_task_to_fatal() {
    let mut registry = HandlerRegistry::new();
    registry
        .register_factory("job", || Err("missing credentials".into()))
        .unwrap();
    let queue = test_queue(registry);

    let task_id = queue.create_task("job", CreateTaskOptions::default()).await;
    let result = queue.run_candidate(&task_id).await;

    assert_eq!(result, LocalTaskProcessingResult::Error);
    let meta = queue.get_meta(&task_id).await;
    assert_eq!(meta.state, TaskState::Fatal);
    assert_eq!(meta.exception_info_ids.len(), 1);
    let infos = queue.exception_infos.read(&meta.exception_info_ids).await.unwrap();
    assert!(infos[0].exception_message_info.contains("missing credentials"));
}

#[tokio::test]
async fn test_concurrent_dispatch_attempts_have_a_single_winner() {
    let mut registry = HandlerRegistry::new();
    let (gate, invocations) = register_gated(&mut registry, "job");
    let queue = test_queue(registry);

    let task_id = queue.create_task("job", CreateTaskOptions::default()).await;
    let record = queue.current_record(&task_id).await;

    // Both attempts observe the same candidate and the same pre-lock meta,
    // as two nodes enumerating the same index entry would.
    let winner = queue.handler_task_for(record.clone()).await;
    let loser = queue.handler_task_for(record).await;
    let winner_handle = tokio::spawn(async move { winner.run_task().await });

    // Wait for the winner to hold the task lock inside the handler.
    let counter = invocations.clone();
    wait_until(|| {
        let counter = counter.clone();
        async move { counter.load(Ordering::SeqCst) == 1 }
    })
    .await;

    // The concurrent attempt loses the non-blocking lock acquire.
    let loser_result = loser.run_task().await;
    assert_eq!(loser_result, LocalTaskProcessingResult::Undefined);

    gate.add_permits(1);
    let winner_result = winner_handle.await.unwrap();
    assert_eq!(winner_result, LocalTaskProcessingResult::Success);

    // Exactly one in-process transition happened.
    let meta = queue.get_meta(&task_id).await;
    assert_eq!(meta.attempts, 1);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_task_group_lock_excludes_group_peers() {
    let mut registry = HandlerRegistry::new();
    let (gate, invocations) = register_gated(&mut registry, "job");
    let queue = test_queue(registry);

    let group = CreateTaskOptions {
        task_group_lock: Some("tenant-42".to_string()),
        ..Default::default()
    };
    let first_id = queue.create_task("job", group.clone()).await;
    let second_id = queue.create_task("job", group).await;

    let first = queue
        .handler_task_for(queue.current_record(&first_id).await)
        .await;
    let first_handle = tokio::spawn(async move { first.run_task().await });
    let counter = invocations.clone();
    wait_until(|| {
        let counter = counter.clone();
        async move { counter.load(Ordering::SeqCst) == 1 }
    })
    .await;

    // The group peer cannot take the group lock while the first runs.
    let second_result = queue
        .handler_task_for(queue.current_record(&second_id).await)
        .await
        .run_task()
        .await;
    assert_eq!(second_result, LocalTaskProcessingResult::Undefined);
    let second_meta = queue.get_meta(&second_id).await;
    assert_eq!(second_meta.state, TaskState::New);
    assert_eq!(second_meta.attempts, 0);

    gate.add_permits(1);
    assert_eq!(
        first_handle.await.unwrap(),
        LocalTaskProcessingResult::Success
    );

    // With the group released, the peer processes normally.
    gate.add_permits(1);
    assert_eq!(
        queue.run_candidate(&second_id).await,
        LocalTaskProcessingResult::Success
    );
}

#[tokio::test]
async fn test_stuck_in_process_task_is_picked_up_again() {
    // A node died mid-processing: the task sits in `InProcess` and its
    // partition-horizon eligibility time has passed. Another node must be
    // able to pick it up and finish it.
    let mut registry = HandlerRegistry::new();
    let invocations = register_scripted(&mut registry, "job", ScriptedOutcome::Finish);
    let queue = test_queue(registry);

    let task_id = queue.create_task("job", CreateTaskOptions::default()).await;
    let mut stuck = queue.get_meta(&task_id).await;
    stuck.state = TaskState::InProcess;
    stuck.attempts = 1;
    stuck.start_executing_ticks = Some(queue.clock.now_ticks());
    let stuck = queue
        .internals
        .meta_storage
        .add_meta(stuck, None)
        .await
        .unwrap();

    let result = queue.run_candidate(&task_id).await;

    assert_eq!(result, LocalTaskProcessingResult::Success);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    let meta = queue.get_meta(&task_id).await;
    assert_eq!(meta.state, TaskState::Finished);
    // The recovery attempt counted.
    assert_eq!(meta.attempts, stuck.attempts + 1);
    assert!(meta.finish_executing_ticks.is_some());
    // No in-process index entry survives, not even past the partition
    // horizon the recovery requeue pointed at.
    assert!(queue
        .scan_shard(
            TaskState::InProcess,
            queue.clock.now_ticks() + 2 * vigiles::time::TICKS_PARTITION
        )
        .await
        .is_empty());
}

#[tokio::test]
async fn test_resubmitted_candidate_with_stale_state_is_skipped() {
    // A continuation-style resubmission whose meta moved on underneath is
    // treated exactly like any other stale candidate.
    let mut registry = HandlerRegistry::new();
    register_scripted(&mut registry, "job", ScriptedOutcome::Finish);
    let queue = test_queue(registry);

    let task_id = queue.create_task("job", CreateTaskOptions::default()).await;
    let old_record = queue.current_record(&task_id).await;
    assert_eq!(
        queue.run_candidate(&task_id).await,
        LocalTaskProcessingResult::Success
    );

    let meta = queue.get_meta(&task_id).await;
    let resubmission = HandlerTask::new(
        old_record,
        TaskQueueReason::TaskContinuation,
        Some(meta),
        queue.internals.clone(),
    );
    assert_eq!(
        resubmission.run_task().await,
        LocalTaskProcessingResult::Undefined
    );
    assert_eq!(queue.get_meta(&task_id).await.attempts, 1);
}

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

//! Scenario tests for the polling dispatcher: predicate skips, admission
//! backpressure, orphan cleanup, and the full poll-to-finish flow.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use vigiles::dispatcher::{NoShardingStrategy, ShardingStrategy};
use vigiles::models::{TaskIndexRecord, TaskIndexShardKey};
use vigiles::producer::CreateTaskOptions;
use vigiles::registry::HandlerRegistry;
use vigiles::time::{Clock, TICKS_PER_SECOND};
use vigiles::{HandlerManager, QueueConfig, TaskState};

use crate::fixtures::{
    register_gated, register_scripted, test_queue, wait_until, ScriptedOutcome, TestQueue,
};

fn manager_for(queue: &TestQueue, config: QueueConfig) -> Arc<HandlerManager> {
    Arc::new(HandlerManager::new(
        config,
        queue.internals.clone(),
        Arc::new(NoShardingStrategy),
    ))
}

/// Owns nothing: a node that defers every candidate to its peers.
struct RejectAllStrategy;

impl ShardingStrategy for RejectAllStrategy {
    fn is_suitable_task(&self, _index_record: &TaskIndexRecord) -> bool {
        false
    }
}

#[tokio::test]
async fn test_run_once_dispatches_due_tasks_to_completion() {
    let mut registry = HandlerRegistry::new();
    let invocations = register_scripted(&mut registry, "job", ScriptedOutcome::Finish);
    let queue = test_queue(registry);
    let manager = manager_for(&queue, QueueConfig::default());
    manager.start();

    let mut task_ids = Vec::new();
    for _ in 0..3 {
        task_ids.push(queue.create_task("job", CreateTaskOptions::default()).await);
    }

    manager.run_once().await.unwrap();
    let m = manager.clone();
    wait_until(|| {
        let m = m.clone();
        async move { m.queue_length() == 0 }
    })
    .await;

    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    for task_id in &task_ids {
        assert_eq!(queue.get_meta(task_id).await.state, TaskState::Finished);
    }
}

#[tokio::test]
async fn test_task_without_local_handler_is_left_in_the_index() {
    // No handler registered at all on this node.
    let queue = test_queue(HandlerRegistry::new());
    let manager = manager_for(&queue, QueueConfig::default());
    manager.start();

    let task_id = queue.create_task("ghost", CreateTaskOptions::default()).await;
    manager.run_once().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Never dispatched locally: no lock was ever attempted.
    assert_eq!(queue.lock_service.acquire_attempt_count(), 0);
    let meta = queue.get_meta(&task_id).await;
    assert_eq!(meta.state, TaskState::New);
    assert_eq!(meta.attempts, 0);
    // Still discoverable for a node that has the handler.
    let (total, owned) = manager.due_task_counts().await.unwrap();
    assert_eq!((total, owned), (1, 1));
}

#[tokio::test]
async fn test_unowned_task_is_skipped_by_sharding() {
    let mut registry = HandlerRegistry::new();
    let invocations = register_scripted(&mut registry, "job", ScriptedOutcome::Finish);
    let queue = test_queue(registry);
    let manager = Arc::new(HandlerManager::new(
        QueueConfig::default(),
        queue.internals.clone(),
        Arc::new(RejectAllStrategy),
    ));
    manager.start();

    let task_id = queue.create_task("job", CreateTaskOptions::default()).await;
    manager.run_once().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert_eq!(queue.lock_service.acquire_attempt_count(), 0);
    assert_eq!(queue.get_meta(&task_id).await.state, TaskState::New);
}

#[tokio::test]
async fn test_candidate_with_missing_meta_is_dispatched_for_cleanup() {
    let queue = test_queue(HandlerRegistry::new());
    let manager = manager_for(&queue, QueueConfig::default());
    manager.start();

    let now = queue.clock.now_ticks();
    let orphan = TaskIndexRecord {
        task_id: "ghost".to_string(),
        minimal_start_ticks: now - TICKS_PER_SECOND,
        shard_key: TaskIndexShardKey::new("default", TaskState::New),
    };
    queue.index.add_record(&orphan, now, None).await.unwrap();

    manager.run_once().await.unwrap();
    let q_index = queue.index.clone();
    wait_until(move || {
        let index = q_index.clone();
        async move {
            index
                .get_task_ids(&TaskIndexShardKey::new("default", TaskState::New), now)
                .await
                .unwrap()
                .is_empty()
        }
    })
    .await;
}

#[tokio::test]
async fn test_admission_control_ends_the_cycle_early() {
    let mut registry = HandlerRegistry::new();
    let (gate, invocations) = register_gated(&mut registry, "job");
    let queue = test_queue(registry);
    let config = QueueConfig::builder().max_running_tasks(1).build();
    let manager = manager_for(&queue, config);
    manager.start();

    for _ in 0..3 {
        queue.create_task("job", CreateTaskOptions::default()).await;
    }

    manager.run_once().await.unwrap();
    let counter = invocations.clone();
    wait_until(|| {
        let counter = counter.clone();
        async move { counter.load(Ordering::SeqCst) == 1 }
    })
    .await;
    // Only one attempt was admitted; the cycle ended early.
    assert_eq!(manager.queue_length(), 1);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    // Release everything; subsequent cycles drain the rest one at a time.
    gate.add_permits(3);
    for _ in 0..2 {
        let m = manager.clone();
        wait_until(|| {
            let m = m.clone();
            async move { m.queue_length() == 0 }
        })
        .await;
        manager.run_once().await.unwrap();
    }
    let m = manager.clone();
    wait_until(|| {
        let m = m.clone();
        async move { m.queue_length() == 0 }
    })
    .await;
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_polling_loop_processes_tasks_end_to_end() {
    let mut registry = HandlerRegistry::new();
    register_scripted(&mut registry, "job", ScriptedOutcome::Finish);
    let queue = test_queue(registry);
    let config = QueueConfig::builder()
        .poll_interval(Duration::from_millis(20))
        .shutdown_timeout(Duration::from_secs(5))
        .build();
    let manager = manager_for(&queue, config);
    manager.start();
    manager.spawn_polling();

    let task_id = queue.create_task("job", CreateTaskOptions::default()).await;
    let storage = queue.meta_storage.clone();
    let id = task_id.clone();
    wait_until(move || {
        let storage = storage.clone();
        let id = id.clone();
        async move {
            storage.get_meta(&id).await.unwrap().state == TaskState::Finished
        }
    })
    .await;

    manager.stop().await;

    // The loop is gone: a task created after stop stays untouched.
    let late_id = queue.create_task("job", CreateTaskOptions::default()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(queue.get_meta(&late_id).await.state, TaskState::New);
}

#[tokio::test]
async fn test_due_task_counts_distinguishes_owned_tasks() {
    struct OwnOnly(String);
    impl ShardingStrategy for OwnOnly {
        fn is_suitable_task(&self, index_record: &TaskIndexRecord) -> bool {
            index_record.task_id == self.0
        }
    }

    let mut registry = HandlerRegistry::new();
    register_scripted(&mut registry, "job", ScriptedOutcome::Finish);
    let queue = test_queue(registry);

    let mine = queue.create_task("job", CreateTaskOptions::default()).await;
    let _theirs = queue.create_task("job", CreateTaskOptions::default()).await;

    let manager = Arc::new(HandlerManager::new(
        QueueConfig::default(),
        queue.internals.clone(),
        Arc::new(OwnOnly(mine)),
    ));
    assert_eq!(manager.due_task_counts().await.unwrap(), (2, 1));
}

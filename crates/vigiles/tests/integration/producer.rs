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

//! Scenario tests for the enqueue side: payloads, scheduling options, and
//! parent-id inheritance for tasks created from inside a handler.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vigiles::error::HandlerError;
use vigiles::models::{HandleResult, Task, TaskIndexShardKey};
use vigiles::producer::{CreateTaskOptions, TaskQueueProducer};
use vigiles::registry::{HandlerRegistry, TaskHandler};
use vigiles::time::{Clock, TICKS_PER_SECOND};
use vigiles::{LocalTaskProcessingResult, TaskState};

use crate::fixtures::test_queue;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct MailPayload {
    recipient: String,
    attempts_allowed: u32,
}

#[tokio::test]
async fn test_typed_payload_round_trip() {
    let queue = test_queue(HandlerRegistry::new());
    let payload = MailPayload {
        recipient: "ops@example.com".to_string(),
        attempts_allowed: 3,
    };
    let task_id = queue
        .producer
        .create_typed_task("send-mail", &payload, CreateTaskOptions::default())
        .await
        .unwrap();

    let tasks = queue.producer.get_task_infos(&[task_id.clone()]).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].meta.id, task_id);
    assert_eq!(tasks[0].meta.name, "send-mail");
    assert_eq!(tasks[0].meta.state, TaskState::New);
    assert_eq!(tasks[0].meta.topic, "default");
    assert_eq!(tasks[0].parse_payload::<MailPayload>().unwrap(), payload);
}

#[tokio::test]
async fn test_get_task_infos_skips_missing_tasks() {
    let queue = test_queue(HandlerRegistry::new());
    let task_id = queue.create_task("job", CreateTaskOptions::default()).await;

    let tasks = queue
        .producer
        .get_task_infos(&[task_id.clone(), "missing".to_string()])
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].meta.id, task_id);
}

#[tokio::test]
async fn test_delay_defers_eligibility() {
    let queue = test_queue(HandlerRegistry::new());
    let created_at = queue.clock.now_ticks();
    queue
        .create_task(
            "job",
            CreateTaskOptions {
                delay: Some(Duration::from_secs(5)),
                ..Default::default()
            },
        )
        .await;

    // Not due yet.
    assert!(queue
        .scan_shard(TaskState::New, queue.clock.now_ticks())
        .await
        .is_empty());

    queue.clock.advance(Duration::from_secs(6));
    let due = queue
        .scan_shard(TaskState::New, queue.clock.now_ticks())
        .await;
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].minimal_start_ticks, created_at + 5 * TICKS_PER_SECOND);
}

#[tokio::test]
async fn test_create_task_options_are_applied() {
    let queue = test_queue(HandlerRegistry::new());
    let task_id = queue
        .create_task(
            "job",
            CreateTaskOptions {
                topic: Some("billing".to_string()),
                task_group_lock: Some("tenant-7".to_string()),
                trace_id: Some("trace-123".to_string()),
                ..Default::default()
            },
        )
        .await;

    let meta = queue.get_meta(&task_id).await;
    assert_eq!(meta.topic, "billing");
    assert_eq!(meta.task_group_lock.as_deref(), Some("tenant-7"));
    assert_eq!(meta.trace_id.as_deref(), Some("trace-123"));

    // Filed under its own topic shard.
    let shard = TaskIndexShardKey::new("billing", TaskState::New);
    let records = queue
        .index
        .get_task_ids(&shard, queue.clock.now_ticks())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].task_id, task_id);
}

/// Spawns a follow-up task from inside the handler and records its id.
struct ChainingHandler {
    child_id: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl TaskHandler for ChainingHandler {
    async fn handle_task(
        &self,
        producer: &TaskQueueProducer,
        _task: &Task,
    ) -> Result<HandleResult, HandlerError> {
        let child_id = producer
            .create_task("child-job", b"{}".to_vec(), CreateTaskOptions::default())
            .await?;
        *self.child_id.lock().unwrap() = Some(child_id);
        Ok(HandleResult::Finish)
    }
}

#[tokio::test]
async fn test_task_created_inside_handler_inherits_parent_task_id() {
    let child_id_slot: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let slot = child_id_slot.clone();
    let mut registry = HandlerRegistry::new();
    registry
        .register("parent-job", move || ChainingHandler {
            child_id: slot.clone(),
        })
        .unwrap();
    let queue = test_queue(registry);

    let parent_id = queue
        .create_task("parent-job", CreateTaskOptions::default())
        .await;
    // Created outside any handler: no parent.
    assert!(queue.get_meta(&parent_id).await.parent_task_id.is_none());

    assert_eq!(
        queue.run_candidate(&parent_id).await,
        LocalTaskProcessingResult::Success
    );

    let child_id = child_id_slot.lock().unwrap().clone().unwrap();
    let child = queue.get_meta(&child_id).await;
    assert_eq!(child.parent_task_id.as_deref(), Some(parent_id.as_str()));
    assert_eq!(child.state, TaskState::New);

    // An explicit parent wins over the context.
    let explicit = queue
        .create_task(
            "parent-job",
            CreateTaskOptions {
                parent_task_id: Some("chosen-parent".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(
        queue.get_meta(&explicit).await.parent_task_id.as_deref(),
        Some("chosen-parent")
    );
}

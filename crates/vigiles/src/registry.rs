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

//! Handler registry: task name to handler factory.
//!
//! Dispatch by task name is a registry lookup producing a fresh handler per
//! attempt, not inheritance. A node only processes task names it has a
//! local registration for; everything else is left in the index for other
//! nodes to pick up.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{HandlerError, RegistryError};
use crate::models::{HandleResult, Task};
use crate::producer::TaskQueueProducer;

/// A task handler.
///
/// Returning `Err` is equivalent to returning [`HandleResult::Fatal`]: the
/// error is recorded against the task and the task moves to `Fatal`.
/// Retryable failures should be reported as
/// [`HandleResult::RerunAfterError`] instead.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Processes one task. The producer is provided so handlers can
    /// enqueue follow-up tasks; tasks created here inherit this task's id
    /// as their parent.
    async fn handle_task(
        &self,
        producer: &TaskQueueProducer,
        task: &Task,
    ) -> Result<HandleResult, HandlerError>;
}

type HandlerFactory = Box<dyn Fn() -> Result<Box<dyn TaskHandler>, HandlerError> + Send + Sync>;

/// Registry mapping task names to handler factories.
#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an infallible handler factory for a task name.
    pub fn register<F, H>(&mut self, task_name: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: TaskHandler + 'static,
    {
        self.register_factory(task_name, move || {
            Ok(Box::new(factory()) as Box<dyn TaskHandler>)
        })
    }

    /// Registers a fallible handler factory for a task name. Construction
    /// failure at dispatch time routes the task to `Fatal`.
    pub fn register_factory<F>(&mut self, task_name: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Result<Box<dyn TaskHandler>, HandlerError> + Send + Sync + 'static,
    {
        if self.factories.contains_key(task_name) {
            return Err(RegistryError::DuplicateHandler(task_name.to_string()));
        }
        self.factories
            .insert(task_name.to_string(), Box::new(factory));
        Ok(())
    }

    /// Whether this node can process the given task name.
    pub fn contains_handler_for(&self, task_name: &str) -> bool {
        self.factories.contains_key(task_name)
    }

    /// Constructs a handler for the given task name.
    pub fn create_handler_for(
        &self,
        task_name: &str,
    ) -> Result<Box<dyn TaskHandler>, RegistryError> {
        let factory = self
            .factories
            .get(task_name)
            .ok_or_else(|| RegistryError::HandlerNotFound(task_name.to_string()))?;
        factory().map_err(|e| RegistryError::HandlerConstruction {
            name: task_name.to_string(),
            message: e.to_string(),
        })
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

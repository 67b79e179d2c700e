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

//! Error types for the task queue engine.
//!
//! Errors are layered: storage and lock errors are environmental and
//! recoverable (the dispatcher abandons the attempt and the next poll cycle
//! re-derives truth from the store); registry errors route the affected task
//! to `Fatal`; none of them ever bring the dispatcher down.

use thiserror::Error;

/// Failures the handler code itself reports.
///
/// Handlers are operator-supplied, so their error type is open-ended.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from the column/blob storage boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or refused the operation.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// A row existed but its payload could not be decoded.
    #[error("corrupted record for key {key}: {message}")]
    Corrupted { key: String, message: String },

    /// The authoritative meta row for a task is missing.
    #[error("task meta not found: {0}")]
    MetaNotFound(String),

    /// The payload blob for a task is missing.
    #[error("task data not found: {0}")]
    DataNotFound(String),

    /// Serialization of a persisted record failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the distributed lock service.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock service could not be reached.
    ///
    /// Contention is NOT an error: a failed non-blocking acquire is the
    /// expected steady-state outcome and is reported as `Ok(None)`.
    #[error("lock service unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the handler registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No handler is registered under the given task name.
    #[error("no handler registered for task name '{0}'")]
    HandlerNotFound(String),

    /// A handler was already registered under the given task name.
    #[error("duplicate handler registration for task name '{0}'")]
    DuplicateHandler(String),

    /// The handler factory failed to construct a handler.
    #[error("handler construction failed for task name '{name}': {message}")]
    HandlerConstruction { name: String, message: String },
}

/// Errors surfaced by the dispatcher and producer API.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

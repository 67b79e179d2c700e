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

//! A task as handed to a handler: the meta plus the opaque payload.

use serde::de::DeserializeOwned;

use super::task_meta::TaskMeta;
use crate::error::StorageError;

/// A unit of work: authoritative metadata and the serialized payload.
#[derive(Debug, Clone)]
pub struct Task {
    pub meta: TaskMeta,
    pub data: Vec<u8>,
}

impl Task {
    /// Deserializes the payload as JSON into a typed value.
    ///
    /// Payloads are opaque bytes at the storage boundary; this is the
    /// convenience path for handlers whose producers used
    /// [`create_typed_task`](crate::producer::TaskQueueProducer::create_typed_task).
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, StorageError> {
        serde_json::from_slice(&self.data).map_err(|e| StorageError::Corrupted {
            key: self.meta.id.clone(),
            message: format!("payload decode failed: {}", e),
        })
    }
}

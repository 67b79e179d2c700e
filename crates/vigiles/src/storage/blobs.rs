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

//! Client contract of the keyed blob store used for task metas, payloads
//! and exception infos. Same backend assumptions as the column contract:
//! single-key last-write-wins, per-key TTL, nothing transactional.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::time::Ticks;

/// Keyed blob storage with last-write-wins semantics.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Writes a blob. A write with a timestamp older than the stored one
    /// loses silently.
    async fn write(
        &self,
        key: &str,
        value: Vec<u8>,
        timestamp: Ticks,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError>;

    /// Reads a blob, if present and unexpired.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Reads many blobs; slot `i` of the result corresponds to `keys[i]`,
    /// with `None` for keys that are missing or expired.
    async fn read_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError>;

    /// Deletes a blob, last-write-wins against the stored timestamp.
    async fn delete(&self, key: &str, timestamp: Ticks) -> Result<(), StorageError>;
}

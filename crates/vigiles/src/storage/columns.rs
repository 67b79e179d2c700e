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

//! Client contract of the column store.
//!
//! The persistence engine itself lives outside this crate; the queue only
//! assumes wide rows of named columns with last-write-wins timestamps,
//! per-column TTLs, and ordered range reads within a row. There are no
//! cross-row transactions — every cross-row consistency guarantee is built
//! by the dispatch protocol, not the store.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::time::Ticks;

/// A single column: a named cell with a write timestamp and optional TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub value: Vec<u8>,
    /// Last-write-wins resolution timestamp, in ticks.
    pub timestamp: Ticks,
    pub ttl: Option<Duration>,
}

/// Wide-row column storage with last-write-wins semantics.
#[async_trait]
pub trait ColumnStorage: Send + Sync {
    /// Writes a column into a row. A write with a timestamp older than the
    /// stored one loses silently.
    async fn write(&self, row_key: &str, column: Column) -> Result<(), StorageError>;

    /// Deletes a column. A delete with a timestamp older than the stored
    /// write loses silently; deleting an absent column is a no-op.
    async fn delete(
        &self,
        row_key: &str,
        column_name: &str,
        timestamp: Ticks,
    ) -> Result<(), StorageError>;

    /// Reads a single column, if present and unexpired.
    async fn read(&self, row_key: &str, column_name: &str)
        -> Result<Option<Column>, StorageError>;

    /// Reads up to `count` columns of a row in ascending name order,
    /// starting after `exclusive_start_column` (or from the beginning).
    async fn read_range(
        &self,
        row_key: &str,
        exclusive_start_column: Option<&str>,
        count: usize,
    ) -> Result<Vec<Column>, StorageError>;
}

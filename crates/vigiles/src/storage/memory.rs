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

//! In-memory backend.
//!
//! Reference implementation of the column and blob contracts for local
//! development and the test suite. It honors last-write-wins timestamps on
//! both writes and deletes and expires entries by wall-clock TTL on read.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::blobs::BlobStorage;
use super::columns::{Column, ColumnStorage};
use crate::error::StorageError;
use crate::time::Ticks;

#[derive(Debug, Clone)]
struct StoredCell {
    value: Vec<u8>,
    timestamp: Ticks,
    expires_at: Option<Instant>,
}

impl StoredCell {
    fn new(value: Vec<u8>, timestamp: Ticks, ttl: Option<Duration>) -> Self {
        Self {
            value,
            timestamp,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// In-memory [`ColumnStorage`]: a map of rows, each an ordered map of
/// columns.
#[derive(Debug, Default)]
pub struct InMemoryColumnStorage {
    rows: Mutex<HashMap<String, BTreeMap<String, StoredCell>>>,
}

impl InMemoryColumnStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ColumnStorage for InMemoryColumnStorage {
    async fn write(&self, row_key: &str, column: Column) -> Result<(), StorageError> {
        let mut rows = self.rows.lock().await;
        let row = rows.entry(row_key.to_string()).or_default();
        let loses = row
            .get(&column.name)
            .is_some_and(|existing| existing.timestamp > column.timestamp && !existing.is_expired());
        if !loses {
            row.insert(
                column.name,
                StoredCell::new(column.value, column.timestamp, column.ttl),
            );
        }
        Ok(())
    }

    async fn delete(
        &self,
        row_key: &str,
        column_name: &str,
        timestamp: Ticks,
    ) -> Result<(), StorageError> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.get_mut(row_key) {
            if row
                .get(column_name)
                .is_some_and(|cell| cell.timestamp <= timestamp)
            {
                row.remove(column_name);
            }
        }
        Ok(())
    }

    async fn read(
        &self,
        row_key: &str,
        column_name: &str,
    ) -> Result<Option<Column>, StorageError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .get(row_key)
            .and_then(|row| row.get(column_name))
            .filter(|cell| !cell.is_expired())
            .map(|cell| Column {
                name: column_name.to_string(),
                value: cell.value.clone(),
                timestamp: cell.timestamp,
                ttl: None,
            }))
    }

    async fn read_range(
        &self,
        row_key: &str,
        exclusive_start_column: Option<&str>,
        count: usize,
    ) -> Result<Vec<Column>, StorageError> {
        let rows = self.rows.lock().await;
        let Some(row) = rows.get(row_key) else {
            return Ok(Vec::new());
        };
        let columns = row
            .iter()
            .filter(|(name, _)| exclusive_start_column.map_or(true, |start| name.as_str() > start))
            .filter(|(_, cell)| !cell.is_expired())
            .take(count)
            .map(|(name, cell)| Column {
                name: name.clone(),
                value: cell.value.clone(),
                timestamp: cell.timestamp,
                ttl: None,
            })
            .collect();
        Ok(columns)
    }
}

/// In-memory [`BlobStorage`].
#[derive(Debug, Default)]
pub struct InMemoryBlobStorage {
    blobs: Mutex<HashMap<String, StoredCell>>,
}

impl InMemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStorage for InMemoryBlobStorage {
    async fn write(
        &self,
        key: &str,
        value: Vec<u8>,
        timestamp: Ticks,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let mut blobs = self.blobs.lock().await;
        let loses = blobs
            .get(key)
            .is_some_and(|existing| existing.timestamp > timestamp && !existing.is_expired());
        if !loses {
            blobs.insert(key.to_string(), StoredCell::new(value, timestamp, ttl));
        }
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let blobs = self.blobs.lock().await;
        Ok(blobs
            .get(key)
            .filter(|cell| !cell.is_expired())
            .map(|cell| cell.value.clone()))
    }

    async fn read_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        let blobs = self.blobs.lock().await;
        Ok(keys
            .iter()
            .map(|key| {
                blobs
                    .get(key)
                    .filter(|cell| !cell.is_expired())
                    .map(|cell| cell.value.clone())
            })
            .collect())
    }

    async fn delete(&self, key: &str, timestamp: Ticks) -> Result<(), StorageError> {
        let mut blobs = self.blobs.lock().await;
        if blobs.get(key).is_some_and(|cell| cell.timestamp <= timestamp) {
            blobs.remove(key);
        }
        Ok(())
    }
}

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

//! Cluster-wide mutual exclusion, consumed as a contract.
//!
//! The queue only needs two things from a lock service: a non-blocking
//! acquire keyed by an arbitrary string, and scoped release. Failing to
//! acquire is not an error — it is the expected steady-state outcome when
//! another node owns the task — so contention is `Ok(None)` and
//! [`LockError`] is reserved for the service being unreachable.
//!
//! [`InMemoryLockService`] implements the contract within one process for
//! tests and local development.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::warn;

use crate::error::LockError;

/// A held lock. Released when dropped.
pub struct LockGuard {
    key: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    /// Wraps a release action. Backends call this from `try_acquire`.
    pub fn new(key: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            key: key.into(),
            release: Some(Box::new(release)),
        }
    }

    /// The key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// Non-blocking, string-keyed distributed lock service.
#[async_trait]
pub trait RemoteLockService: Send + Sync {
    /// Attempts to take the lock. `Ok(None)` means another owner holds it.
    async fn try_acquire(&self, key: &str) -> Result<Option<LockGuard>, LockError>;
}

/// Process-local implementation of the lock contract.
#[derive(Default)]
pub struct InMemoryLockService {
    held: Arc<Mutex<HashSet<String>>>,
    acquire_attempts: AtomicUsize,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of acquire attempts made so far, contended or not.
    pub fn acquire_attempt_count(&self) -> usize {
        self.acquire_attempts.load(Ordering::SeqCst)
    }

    /// Keys currently held.
    pub fn held_keys(&self) -> Vec<String> {
        match self.held.lock() {
            Ok(held) => held.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl RemoteLockService for InMemoryLockService {
    async fn try_acquire(&self, key: &str) -> Result<Option<LockGuard>, LockError> {
        self.acquire_attempts.fetch_add(1, Ordering::SeqCst);
        let mut held = self
            .held
            .lock()
            .map_err(|_| LockError::Unavailable("lock table poisoned".into()))?;
        if !held.insert(key.to_string()) {
            return Ok(None);
        }
        let table = self.held.clone();
        let owned_key = key.to_string();
        Ok(Some(LockGuard::new(key, move || {
            match table.lock() {
                Ok(mut held) => {
                    held.remove(&owned_key);
                }
                Err(_) => warn!(key = %owned_key, "lock table poisoned during release"),
            }
        })))
    }
}

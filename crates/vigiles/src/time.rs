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

//! Tick arithmetic and clock sources.
//!
//! All protocol timing is expressed in "ticks": `i64` nanoseconds since the
//! Unix epoch. Two kinds of clock exist side by side:
//!
//! - [`Clock`] supplies the local high-resolution "now" used for state
//!   transitions and staleness-window checks. It only needs to order a
//!   single node's own observations.
//! - [`GlobalClock`] issues cluster-facing write timestamps. It is
//!   monotonic across calls on one node and can fold in a remote
//!   authoritative tick source to absorb clock skew between nodes.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Nanoseconds since the Unix epoch.
pub type Ticks = i64;

/// Ticks in one microsecond.
pub const TICKS_PER_MICROSECOND: Ticks = 1_000;

/// Ticks in one millisecond.
pub const TICKS_PER_MILLISECOND: Ticks = 1_000 * TICKS_PER_MICROSECOND;

/// Ticks in one second.
pub const TICKS_PER_SECOND: Ticks = 1_000 * TICKS_PER_MILLISECOND;

/// Length of one time partition of the minimal-start-ticks index.
///
/// Index rows are bucketed by this interval; the in-process transition also
/// pushes a task's `minimal_start_ticks` past this horizon so a running task
/// is not re-picked by the very next poll cycle.
pub const TICKS_PARTITION: Ticks = 6 * 60 * TICKS_PER_SECOND;

/// Converts a [`Duration`] to ticks, saturating at `i64::MAX`.
pub fn duration_to_ticks(duration: Duration) -> Ticks {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// Returns the start tick of the partition containing `ticks`.
pub fn partition_start(ticks: Ticks) -> Ticks {
    ticks - ticks.rem_euclid(TICKS_PARTITION)
}

/// Converts ticks to a UTC timestamp.
pub fn ticks_to_datetime(ticks: Ticks) -> DateTime<Utc> {
    Utc.timestamp_nanos(ticks)
}

/// Current wall-clock time in ticks.
pub fn wall_now_ticks() -> Ticks {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// A source of the local "now".
///
/// State transitions and inconsistency-window comparisons read this clock;
/// both sides of those comparisons must use the same source, which is why it
/// is injected rather than read ambiently.
pub trait Clock: Send + Sync {
    /// Current time in ticks.
    fn now_ticks(&self) -> Ticks;
}

/// The process wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ticks(&self) -> Ticks {
        wall_now_ticks()
    }
}

/// A remote authoritative tick source the [`GlobalClock`] can merge in.
///
/// In a real deployment this is backed by a timestamp cell in the shared
/// store; the in-memory backend and the tests use [`ManualClock`].
pub trait TicksSource: Send + Sync {
    /// Latest authoritative ticks known to the cluster.
    fn authoritative_now_ticks(&self) -> Ticks;
}

/// Monotonic timestamp issuer for cluster-facing writes.
///
/// Each call returns the max of the wall clock, the remote authoritative
/// source (when configured), and one past the previously issued value, so
/// timestamps never repeat or run backwards on a node even under clock skew.
pub struct GlobalClock {
    last_issued: AtomicI64,
    remote: Option<Arc<dyn TicksSource>>,
}

impl GlobalClock {
    /// Creates a clock driven by the local wall clock only.
    pub fn new() -> Self {
        Self {
            last_issued: AtomicI64::new(0),
            remote: None,
        }
    }

    /// Creates a clock that also folds in a remote authoritative source.
    pub fn with_remote_source(remote: Arc<dyn TicksSource>) -> Self {
        Self {
            last_issued: AtomicI64::new(0),
            remote: Some(remote),
        }
    }

    /// Issues the next timestamp.
    pub fn update_now_ticks(&self) -> Ticks {
        let mut candidate = wall_now_ticks();
        if let Some(remote) = &self.remote {
            candidate = candidate.max(remote.authoritative_now_ticks());
        }
        let previous = self
            .last_issued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(candidate.max(last + 1))
            })
            .unwrap_or(0);
        candidate.max(previous + 1)
    }
}

impl Default for GlobalClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GlobalClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalClock")
            .field("last_issued", &self.last_issued.load(Ordering::SeqCst))
            .field("has_remote", &self.remote.is_some())
            .finish()
    }
}

/// A hand-driven clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    ticks: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at `ticks`.
    pub fn new(ticks: Ticks) -> Self {
        Self {
            ticks: AtomicI64::new(ticks),
        }
    }

    /// Moves the clock to an absolute value.
    pub fn set(&self, ticks: Ticks) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }

    /// Advances the clock by a duration.
    pub fn advance(&self, by: Duration) {
        self.ticks.fetch_add(duration_to_ticks(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ticks(&self) -> Ticks {
        self.ticks.load(Ordering::SeqCst)
    }
}

impl TicksSource for ManualClock {
    fn authoritative_now_ticks(&self) -> Ticks {
        self.ticks.load(Ordering::SeqCst)
    }
}

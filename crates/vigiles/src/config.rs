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

//! Configuration for the dispatcher.
//!
//! Use [`QueueConfig::builder()`] to customize:
//!
//! ```rust
//! use std::time::Duration;
//! use vigiles::config::QueueConfig;
//!
//! let config = QueueConfig::builder()
//!     .poll_interval(Duration::from_millis(200))
//!     .max_running_tasks(32)
//!     .build();
//! assert_eq!(config.max_running_tasks(), 32);
//! ```

use std::time::Duration;

/// Configuration parameters of a queue node.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct QueueConfig {
    poll_interval: Duration,
    max_running_tasks: usize,
    max_running_continuations: usize,
    task_ttl: Duration,
    topics: Vec<String>,
    shutdown_timeout: Duration,
}

impl QueueConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::default()
    }

    /// How often the dispatcher polls the index for due tasks.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Local in-flight limit for tasks pulled from the queue.
    pub fn max_running_tasks(&self) -> usize {
        self.max_running_tasks
    }

    /// Local in-flight limit for immediate continuations.
    pub fn max_running_continuations(&self) -> usize {
        self.max_running_continuations
    }

    /// TTL stamped on task records at creation and on prolongation.
    pub fn task_ttl(&self) -> Duration {
        self.task_ttl
    }

    /// Topics this node scans. Tasks are filed under exactly one topic.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Default topic for tasks created without an explicit one.
    pub fn default_topic(&self) -> &str {
        self.topics.first().map(String::as_str).unwrap_or("default")
    }

    /// How long `stop` waits for in-flight handlers to finish.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfigBuilder::default().build()
    }
}

/// Builder for [`QueueConfig`].
#[derive(Debug, Clone)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl Default for QueueConfigBuilder {
    fn default() -> Self {
        Self {
            config: QueueConfig {
                poll_interval: Duration::from_secs(1),
                max_running_tasks: 16,
                max_running_continuations: 16,
                task_ttl: Duration::from_secs(14 * 24 * 60 * 60),
                topics: vec!["default".to_string()],
                shutdown_timeout: Duration::from_secs(100),
            },
        }
    }
}

impl QueueConfigBuilder {
    /// Sets the dispatcher poll interval.
    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.config.poll_interval = value;
        self
    }

    /// Sets the local in-flight limit for pulled tasks.
    pub fn max_running_tasks(mut self, value: usize) -> Self {
        self.config.max_running_tasks = value;
        self
    }

    /// Sets the local in-flight limit for continuations.
    pub fn max_running_continuations(mut self, value: usize) -> Self {
        self.config.max_running_continuations = value;
        self
    }

    /// Sets the task record TTL.
    pub fn task_ttl(mut self, value: Duration) -> Self {
        self.config.task_ttl = value;
        self
    }

    /// Sets the topics this node scans. The first is the default topic
    /// for task creation.
    pub fn topics(mut self, value: Vec<String>) -> Self {
        self.config.topics = value;
        self
    }

    /// Sets the shutdown drain timeout.
    pub fn shutdown_timeout(mut self, value: Duration) -> Self {
        self.config.shutdown_timeout = value;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> QueueConfig {
        self.config
    }
}

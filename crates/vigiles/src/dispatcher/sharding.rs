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

//! Node-ownership predicate.
//!
//! Sharding policy is consumed, not decided, here: the dispatcher asks a
//! single boolean question per candidate and skips tasks the node does not
//! own. The distributed lock makes sharding an optimization, never a
//! correctness requirement.

use crate::models::TaskIndexRecord;

/// Decides which candidates this node dispatches.
pub trait ShardingStrategy: Send + Sync {
    /// Whether this node should process the given candidate.
    fn is_suitable_task(&self, index_record: &TaskIndexRecord) -> bool;
}

/// Accepts everything: every node dispatches every task it can handle.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoShardingStrategy;

impl ShardingStrategy for NoShardingStrategy {
    fn is_suitable_task(&self, _index_record: &TaskIndexRecord) -> bool {
        true
    }
}

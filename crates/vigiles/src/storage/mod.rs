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

//! Storage layer.
//!
//! The bottom is the client contract of the shared store ([`ColumnStorage`]
//! and [`BlobStorage`]) plus the in-memory reference backend. On top of it
//! sit the queue's repositories: the minimal-start-ticks index with its
//! oldest-live-record watermark, the authoritative meta storage, the
//! payload pairing, the exception-info store, and the append-only event
//! log. The store offers single-row last-write-wins only; all cross-row
//! consistency lives in the dispatch protocol.

pub mod blobs;
pub mod columns;
pub mod event_log;
pub mod exceptions;
pub mod memory;
pub mod meta_storage;
pub mod oldest_live;
pub mod task_collection;
pub mod ticks_index;

pub use blobs::BlobStorage;
pub use columns::{Column, ColumnStorage};
pub use event_log::EventLogStorage;
pub use exceptions::TaskExceptionInfoStorage;
pub use memory::{InMemoryBlobStorage, InMemoryColumnStorage};
pub use meta_storage::TaskMetaStorage;
pub use oldest_live::OldestLiveRecordTicksHolder;
pub use task_collection::TaskCollection;
pub use ticks_index::MinimalStartTicksIndex;

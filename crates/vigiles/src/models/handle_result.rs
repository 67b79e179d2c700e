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

//! Handler verdicts.

use std::time::Duration;

use crate::error::HandlerError;

/// What a handler decided should happen to the task it just processed.
///
/// The enum is closed, so the state machine's mapping of verdict to next
/// state is exhaustive by construction; there is no "unknown verdict"
/// runtime branch.
#[derive(Debug)]
pub enum HandleResult {
    /// The task is done; move it to `Finished`.
    Finish,

    /// The task failed permanently; record the error and move it to
    /// `Fatal`.
    Fatal { error: HandlerError },

    /// Run the task again after `delay` without recording an error. The
    /// poll-for-condition pattern: the handler saw nothing to do yet.
    Rerun { delay: Duration },

    /// The attempt failed but is worth retrying: record the error and run
    /// again after `delay`.
    RerunAfterError { delay: Duration, error: HandlerError },
}

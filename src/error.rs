// Copyright 2017 Google Inc. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for the genuinely recoverable conditions in this crate.
//!
//! Misuse that a caller could have prevented by construction (double free,
//! use of a stale handle) is a `debug_assert!` and undefined behavior in
//! release builds, not an [`RtError`]. Expected-but-uncommon control flow
//! that isn't a misuse -- a free list being momentarily empty -- is a plain
//! `bool`/`Option` return, not an error either. `RtError` is reserved for
//! conditions a caller genuinely cannot rule out ahead of time.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RtError {
    /// Returned by [`crate::worker::AsyncWorker::attach`] when the object is
    /// already attached to a (possibly different) worker.
    #[error("object is already attached to a worker")]
    AlreadyAttached,
}

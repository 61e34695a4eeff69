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

//! The change functor a [`crate::async_object::Producer`] hands to its
//! worker.
//!
//! A fixed-capacity inline closure would make `submit_nb` fully
//! allocation-free, but nothing in this crate's lineage implements one, and
//! bolting on a small-buffer-optimized `FnMut` store here would be a fresh
//! invention rather than an adopted idiom. `ChangeFn` is a boxed trait
//! object instead: `submit_nb` still avoids growing the message-queue node
//! storage (it only ever reuses a node already sitting on the free list),
//! but boxing the closure itself does allocate. See `DESIGN.md`.

/// A one-shot mutation applied to `Settings` by the worker thread.
pub type ChangeFn<Settings> = Box<dyn FnMut(&mut Settings) + Send>;

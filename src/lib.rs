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

//! Lock-free messaging primitives for sharing state between non-realtime
//! and realtime threads.
//!
//! The four building blocks compose, each on top of the one before it:
//!
//! * [`stack::LifoStack`] -- an untyped, pop-all, intrusive Treiber stack.
//!   There is no single-element `pop`: the whole chain comes off in one
//!   atomic exchange, which is what keeps it ABA-free without hazard
//!   pointers or epochs.
//! * [`messenger::Messenger`] -- a pair of `LifoStack`s (`live`/`free`) that
//!   gives realtime-safe sending: once primed, steady-state traffic reuses
//!   nodes instead of allocating.
//! * [`realtime_object::RealtimeObject`] -- a single value shared between
//!   one realtime reader and any number of non-realtime writers.
//! * [`worker::AsyncWorker`] and [`async_object::AsyncObject`] -- a
//!   background thread that periodically applies queued changes to a
//!   canonical `Settings` and rebroadcasts derived `Obj` snapshots to any
//!   number of independent consumers.
//!
//! None of the realtime-facing entry points (`RealtimeObject::get_rt`,
//! `Instance::update`, `Messenger::send_if_node_available`) allocate, lock
//! a mutex, or perform a syscall; see each module's docs for the exact
//! boundary.

pub mod async_object;
pub mod change;
pub mod error;
pub mod messenger;
pub mod realtime_object;
mod stack;
pub mod worker;

pub use async_object::{AsyncObject, Instance, Producer};
pub use change::ChangeFn;
pub use error::RtError;
pub use messenger::{Chain, DetachedNode, Messenger, MessengerConfig};
pub use realtime_object::RealtimeObject;
pub use worker::{AsyncWorker, WorkerConfig};

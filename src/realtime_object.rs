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

//! A single `T` value shared between one realtime reader and any number of
//! non-realtime writers, republished wholesale on every update.
//!
//! `current` is just a node that happens never to live on a [`Messenger`]
//! stack: it is always exactly one [`DetachedNode`], swapped out and
//! replaced as new versions arrive. That keeps `get_rt` allocation-free --
//! the old value is handed to `from_rt` as the very node it already lives
//! in, with no copy.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicPtr};
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::Mutex;

use crate::messenger::{DetachedNode, Messenger};
use crate::stack::Node;

/// Shares one value of `T` between a single realtime reader and multiple
/// non-realtime writers. See the module docs.
pub struct RealtimeObject<T> {
    current: AtomicPtr<Node<T>>,
    to_rt: Messenger<T>,
    from_rt: Messenger<T>,
    write_lock: Mutex<()>,
    #[cfg(debug_assertions)]
    rt_in_use: AtomicBool,
}

unsafe impl<T: Send> Send for RealtimeObject<T> {}
unsafe impl<T: Send> Sync for RealtimeObject<T> {}

impl<T> RealtimeObject<T> {
    pub fn new(initial: T) -> Self {
        RealtimeObject {
            current: AtomicPtr::new(DetachedNode::new(initial).into_raw().as_ptr()),
            to_rt: Messenger::new(),
            from_rt: Messenger::new(),
            write_lock: Mutex::new(()),
            #[cfg(debug_assertions)]
            rt_in_use: AtomicBool::new(false),
        }
    }

    /// Debug-only reentrancy check: trips if a second thread calls
    /// `get_rt` while one is already inside it. Compiled out entirely in
    /// release builds, so it costs nothing on the real hot path.
    #[cfg(debug_assertions)]
    fn enter_rt_guard(&self) {
        debug_assert!(
            !self.rt_in_use.swap(true, Acquire),
            "RealtimeObject::get_rt called concurrently from more than one thread"
        );
    }
    #[cfg(not(debug_assertions))]
    fn enter_rt_guard(&self) {}

    #[cfg(debug_assertions)]
    fn exit_rt_guard(&self) {
        self.rt_in_use.store(false, Release);
    }
    #[cfg(not(debug_assertions))]
    fn exit_rt_guard(&self) {}

    /// Read the current value from any non-realtime thread. Lock-free.
    pub fn get_non_rt(&self) -> &T {
        let ptr = self.current.load(Acquire);
        unsafe { &(*ptr).payload }
    }

    /// Read the current value from the single designated realtime thread,
    /// first draining `to_rt` and adopting the newest pending value, if
    /// any. Any older pending values and the value being replaced are
    /// handed to `from_rt` for destruction elsewhere. Lock-free and
    /// allocation-free.
    ///
    /// Only one thread may call this at a time; in debug builds a
    /// concurrent second caller trips a `debug_assert!` instead of
    /// silently racing.
    pub fn get_rt(&self) -> &T {
        self.enter_rt_guard();

        let mut chain = self.to_rt.receive_all();
        if let Some(newest) = chain.next() {
            let newest_raw = newest.into_raw();
            let old_raw = self.current.swap(newest_raw.as_ptr(), Release);
            let old = DetachedNode::from_raw(unsafe { NonNull::new_unchecked(old_raw) });
            self.from_rt.send_node(old);
            for stale in chain {
                self.from_rt.send_node(stale);
            }
        }
        let ptr = self.current.load(Relaxed);
        self.exit_rt_guard();

        unsafe { &(*ptr).payload }
    }

    /// Replace the current value outright. May be called from any number of
    /// non-realtime threads; calls serialize against each other.
    pub fn set(&self, new_value: T) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.set_locked(new_value);
    }

    fn set_locked(&self, new_value: T) {
        drop(self.from_rt.receive_all());
        self.to_rt.send(new_value);
    }
}

impl<T: Clone> RealtimeObject<T> {
    /// Clone the current value, apply `f` to the clone, and publish the
    /// result, unconditionally.
    pub fn change(&self, f: impl FnOnce(&mut T)) {
        self.change_if(f, |_| true)
    }

    /// Like [`RealtimeObject::change`], but only if `pred` accepts the
    /// value as currently published. `pred` and `f` run under the same
    /// critical section, so the decision is made against a consistent
    /// snapshot even with concurrent writers.
    pub fn change_if(&self, f: impl FnOnce(&mut T), pred: impl FnOnce(&T) -> bool) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current_ptr = self.current.load(Acquire);
        let current_ref = unsafe { &(*current_ptr).payload };
        if !pred(current_ref) {
            return;
        }
        let mut new_value = current_ref.clone();
        f(&mut new_value);
        self.set_locked(new_value);
    }
}

impl<T> Drop for RealtimeObject<T> {
    fn drop(&mut self) {
        let ptr = *self.current.get_mut();
        if let Some(nn) = NonNull::new(ptr) {
            drop(DetachedNode::from_raw(nn));
        }
    }
}

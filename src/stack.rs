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

//! The untyped pop-all LIFO stack of intrusive nodes that everything else in
//! this crate is built on.
//!
//! This is a Treiber stack with one deliberate restriction: there is no
//! single-element `pop`, only [`LifoStack::pop_all`]. Because the entire
//! chain is removed in one atomic exchange, the classic ABA hazard on a
//! CAS-based `pop` never arises here -- the only CAS in this module is in
//! `push`, and it only ever needs the previously observed head to still be a
//! valid, linkable address, which holds because nodes are never deallocated
//! while linked into a stack (see the crate-level docs).

use std::ptr;
use std::ptr::NonNull;
use std::sync::atomic::AtomicPtr;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

/// An intrusive node. `next` is the only link the stack algorithm itself
/// reads or writes. `prev` is populated only transiently, by the FIFO replay
/// helper in `messenger`, and has no meaning outside that pass.
pub(crate) struct Node<T> {
    pub(crate) next: *mut Node<T>,
    pub(crate) prev: *mut Node<T>,
    pub(crate) payload: T,
}

impl<T> Node<T> {
    pub(crate) fn new_boxed(payload: T) -> NonNull<Node<T>> {
        let raw = Box::into_raw(Box::new(Node {
            next: ptr::null_mut(),
            prev: ptr::null_mut(),
            payload,
        }));
        unsafe { NonNull::new_unchecked(raw) }
    }
}

/// Walk `next` links from `head` to find the tail (the node whose `next` is
/// null). O(n); must not run concurrently with other operations on the
/// chain, per the `length`/counting contract in the spec this implements.
pub(crate) fn find_tail<T>(head: NonNull<Node<T>>) -> NonNull<Node<T>> {
    let mut cur = head;
    loop {
        match NonNull::new(unsafe { cur.as_ref().next }) {
            Some(next) => cur = next,
            None => return cur,
        }
    }
}

/// The untyped pop-all MPMC stack itself. Generic in `T` only because Rust
/// has no untyped heap pointer that is also a safe abstraction; the
/// algorithm below never inspects `T`.
pub(crate) struct LifoStack<T> {
    head: AtomicPtr<Node<T>>,
}

impl<T> LifoStack<T> {
    pub(crate) const fn new() -> Self {
        LifoStack {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Atomically link `node` as the new head. Precondition: `node` is not
    /// currently linked into any stack. Lock-free; wait-free for a single
    /// producer barring pathological contention.
    pub(crate) fn push(&self, node: NonNull<Node<T>>) {
        let mut old = self.head.load(Relaxed);
        loop {
            unsafe {
                (*node.as_ptr()).next = old;
            }
            match self
                .head
                .compare_exchange_weak(old, node.as_ptr(), Release, Acquire)
            {
                Ok(_) => return,
                Err(actual) => old = actual,
            }
        }
    }

    /// Splice a pre-linked chain `head -> ... -> tail` (with `tail.next`
    /// already null) onto the stack atomically, preserving its internal
    /// order. O(1).
    pub(crate) fn push_chain(&self, head: NonNull<Node<T>>, tail: NonNull<Node<T>>) {
        debug_assert!(
            unsafe { tail.as_ref().next.is_null() },
            "push_chain: tail.next must be null on entry"
        );
        let mut old = self.head.load(Relaxed);
        loop {
            unsafe {
                (*tail.as_ptr()).next = old;
            }
            match self
                .head
                .compare_exchange_weak(old, head.as_ptr(), Release, Acquire)
            {
                Ok(_) => return,
                Err(actual) => old = actual,
            }
        }
    }

    /// Atomically exchange the head with null, returning the former head (or
    /// `None`). The returned chain is owned by the caller, who may traverse
    /// it without further synchronization.
    pub(crate) fn pop_all(&self) -> Option<NonNull<Node<T>>> {
        NonNull::new(self.head.swap(ptr::null_mut(), Acquire))
    }
}

impl<T> Drop for LifoStack<T> {
    fn drop(&mut self) {
        let mut cur = *self.head.get_mut();
        while !cur.is_null() {
            let boxed = unsafe { Box::from_raw(cur) };
            cur = boxed.next;
        }
    }
}

/// Exhaustive interleaving check for the one CAS in this module. Not run
/// under plain `cargo test`; invoke with `RUSTFLAGS="--cfg loom" cargo test
/// --release --test loom` against a harness that exercises this module
/// under the `loom` scheduler.
#[cfg(loom)]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;
    use loom::thread;

    #[test]
    fn two_threads_pushing_conserve_both_nodes() {
        loom::model(|| {
            let stack = Arc::new(LifoStack::new());
            let s1 = Arc::clone(&stack);
            let s2 = Arc::clone(&stack);
            let t1 = thread::spawn(move || s1.push(Node::new_boxed(1)));
            let t2 = thread::spawn(move || s2.push(Node::new_boxed(2)));
            t1.join().unwrap();
            t2.join().unwrap();

            let mut count = 0;
            let mut cur = stack.pop_all();
            while let Some(n) = cur {
                count += 1;
                unsafe {
                    cur = NonNull::new(n.as_ref().next);
                    drop(Box::from_raw(n.as_ptr()));
                }
            }
            assert_eq!(count, 2);
        });
    }
}

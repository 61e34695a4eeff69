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

//! Broadcasting a canonical `Settings`, owned by one worker, out to any
//! number of read-only `Obj` snapshots held by independent consumers.
//!
//! This generalizes the engine/core split that used to own a dedicated
//! audio or MIDI connection: `Settings` is the thing only the worker ever
//! mutates directly (there it was engine state reached through a MIDI
//! dispatch); `Obj` is the derived, consumer-facing snapshot (there, the
//! graph state an audio callback actually read). `Producer`s submit change
//! functors; `Instance`s receive freshly rebuilt `Obj` snapshots; the
//! worker's periodic tick is the only place `Settings` itself is touched.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::change::ChangeFn;
use crate::error::RtError;
use crate::messenger::{Messenger, MessengerConfig};
use crate::worker::{AsyncWorker, Tickable};

trait ObjectHandle<Settings>: Send + Sync {
    fn detach_instance(&self, id: usize);
    fn detach_producer(&self, id: usize);
}

struct InstanceSlot<Obj> {
    id: usize,
    to_instance: Arc<Messenger<Obj>>,
    from_instance: Arc<Messenger<Obj>>,
}

struct ProducerSlot<Settings> {
    id: usize,
    changes: Arc<Messenger<ChangeFn<Settings>>>,
}

struct State<Obj, Settings> {
    settings: Settings,
    instances: Vec<InstanceSlot<Obj>>,
    producers: Vec<ProducerSlot<Settings>>,
}

struct AsyncObjectInner<Obj, Settings> {
    state: Mutex<State<Obj, Settings>>,
    attached: AtomicBool,
    next_id: AtomicUsize,
    messenger_config: MessengerConfig,
}

impl<Obj, Settings> ObjectHandle<Settings> for AsyncObjectInner<Obj, Settings>
where
    Obj: Send,
    Settings: Send,
{
    fn detach_instance(&self, id: usize) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.instances.retain(|i| i.id != id);
    }

    fn detach_producer(&self, id: usize) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.producers.retain(|p| p.id != id);
    }
}

impl<Obj, Settings> Tickable for AsyncObjectInner<Obj, Settings>
where
    Obj: for<'s> From<&'s Settings> + Send + 'static,
    Settings: Send + 'static,
{
    fn tick(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        // Step 1: destroy anything consumers have returned.
        for inst in state.instances.iter() {
            drop(inst.from_instance.receive_all());
        }

        // Step 2: apply every pending change, oldest first, then recycle
        // the node chain so the producer's next submit can reuse it.
        let mut changed = false;
        let producers_len = state.producers.len();
        for i in 0..producers_len {
            let chain = state.producers[i].changes.receive_all();
            if chain.is_empty() {
                continue;
            }
            changed = true;
            let settings = &mut state.settings;
            chain.for_each_fifo_mut(|f| f(settings));
            state.producers[i].changes.recycle(chain);
        }

        // Step 3: if anything changed, discard any snapshot an instance
        // hasn't picked up yet, rebuild Obj, and broadcast the fresh
        // snapshot, reusing a free node where possible.
        if changed {
            for inst in state.instances.iter() {
                inst.to_instance.discard_all();
                let snapshot = Obj::from(&state.settings);
                inst.to_instance.send(snapshot);
            }
        }
    }
}

/// The canonical, worker-owned settings, broadcast to consumers as
/// immutable `Obj` snapshots.
///
/// `Obj` must be constructible from a `&Settings` reference (`Obj: for<'s>
/// From<&'s Settings>`): that conversion is what runs, under the worker's
/// lock, every time a pending change actually mutates `Settings`.
pub struct AsyncObject<Obj, Settings> {
    inner: Arc<AsyncObjectInner<Obj, Settings>>,
}

impl<Obj, Settings> AsyncObject<Obj, Settings>
where
    Obj: Send + 'static,
    Settings: Send + 'static,
{
    pub fn new(initial_settings: Settings) -> Self {
        AsyncObject::with_messenger_config(initial_settings, MessengerConfig::default())
    }

    /// Like [`AsyncObject::new`], but every `Instance`'s `to_instance`/
    /// `from_instance` and every `Producer`'s change-functor `Messenger` are
    /// preallocated per `config` as they're created, so steady-state
    /// `submit_nb`/`Instance::update` traffic doesn't allocate a node even
    /// before the worker has had a chance to prime the free lists itself.
    pub fn with_messenger_config(initial_settings: Settings, config: MessengerConfig) -> Self {
        AsyncObject {
            inner: Arc::new(AsyncObjectInner {
                state: Mutex::new(State {
                    settings: initial_settings,
                    instances: Vec::new(),
                    producers: Vec::new(),
                }),
                attached: AtomicBool::new(false),
                next_id: AtomicUsize::new(0),
                messenger_config: config,
            }),
        }
    }

    fn next_id(&self) -> usize {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl<Obj, Settings> AsyncObject<Obj, Settings>
where
    Obj: for<'s> From<&'s Settings> + Send + 'static,
    Settings: Send + 'static,
{
    /// Create a new read-only instance, initialized from the settings as
    /// they stand right now.
    pub fn create_instance(&self) -> Instance<Obj, Settings> {
        let id = self.next_id();
        let to_instance = Arc::new(Messenger::new());
        let from_instance = Arc::new(Messenger::new());
        let local = {
            let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            let preallocate = self.inner.messenger_config.preallocate;
            to_instance.preallocate(preallocate, || Obj::from(&state.settings));
            from_instance.preallocate(preallocate, || Obj::from(&state.settings));
            Obj::from(&state.settings)
        };
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.instances.push(InstanceSlot {
            id,
            to_instance: Arc::clone(&to_instance),
            from_instance: Arc::clone(&from_instance),
        });
        drop(state);
        Instance {
            id,
            parent: Arc::clone(&self.inner) as Arc<dyn ObjectHandle<Settings>>,
            to_instance,
            from_instance,
            local,
        }
    }
}

impl<Obj, Settings> AsyncObject<Obj, Settings>
where
    Obj: Send + 'static,
    Settings: Send + 'static,
{
    /// Create a new producer, able to submit change functors applied to
    /// `Settings` on the next tick.
    pub fn create_producer(&self) -> Producer<Settings> {
        let id = self.next_id();
        let changes = Arc::new(Messenger::new());
        changes.preallocate(self.inner.messenger_config.preallocate, || {
            Box::new(|_: &mut Settings| {}) as ChangeFn<Settings>
        });
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.producers.push(ProducerSlot {
            id,
            changes: Arc::clone(&changes),
        });
        drop(state);
        Producer {
            id,
            parent: Arc::clone(&self.inner) as Arc<dyn ObjectHandle<Settings>>,
            changes,
        }
    }
}

impl<Obj, Settings> AsyncObject<Obj, Settings>
where
    Obj: for<'s> From<&'s Settings> + Send + 'static,
    Settings: Send + 'static,
{
    /// Attach this object to `worker`, so it gets ticked on the worker's
    /// period. Fails if it is already attached to a worker.
    pub fn attach(&self, worker: &AsyncWorker) -> Result<(), RtError> {
        if self
            .inner
            .attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RtError::AlreadyAttached);
        }
        worker.attach_tickable(Arc::clone(&self.inner) as Arc<dyn Tickable>);
        Ok(())
    }

    /// Detach this object from `worker`.
    pub fn detach(&self, worker: &AsyncWorker) {
        let tickable = Arc::clone(&self.inner) as Arc<dyn Tickable>;
        worker.detach_tickable(&tickable);
        self.inner.attached.store(false, Ordering::Release);
    }
}

impl<Obj, Settings> Clone for AsyncObject<Obj, Settings> {
    fn clone(&self) -> Self {
        AsyncObject {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A read-only, periodically refreshed snapshot of `Obj`.
///
/// `update` is lock-free and allocation-free: it consumes at most the
/// newest pending snapshot and hands the value it replaces back to the
/// worker via the very node it already occupies.
pub struct Instance<Obj, Settings> {
    id: usize,
    parent: Arc<dyn ObjectHandle<Settings>>,
    to_instance: Arc<Messenger<Obj>>,
    from_instance: Arc<Messenger<Obj>>,
    local: Obj,
}

impl<Obj, Settings> Instance<Obj, Settings> {
    /// Adopt the newest pending snapshot, if any. Returns `true` if a new
    /// snapshot was adopted.
    pub fn update(&mut self) -> bool {
        match self.to_instance.receive_last() {
            Some(mut new_node) => {
                mem::swap(&mut self.local, &mut *new_node);
                self.from_instance.send_node(new_node);
                true
            }
            None => false,
        }
    }

    pub fn get(&self) -> &Obj {
        &self.local
    }
}

impl<Obj, Settings> Drop for Instance<Obj, Settings> {
    fn drop(&mut self) {
        self.parent.detach_instance(self.id);
    }
}

/// A handle that submits change functors to be applied to `Settings` on the
/// worker's next tick.
pub struct Producer<Settings> {
    id: usize,
    parent: Arc<dyn ObjectHandle<Settings>>,
    changes: Arc<Messenger<ChangeFn<Settings>>>,
}

impl<Settings> Producer<Settings> {
    /// Submit a change, allocating a fresh node if the free list is empty.
    pub fn submit(&self, change: impl FnMut(&mut Settings) + Send + 'static) {
        self.changes.send(Box::new(change));
    }

    /// Submit a change without growing the message-queue's node storage:
    /// returns `false` if the free list is empty, rather than allocating a
    /// node. The boxed closure itself still allocates; see
    /// [`crate::change`].
    pub fn submit_nb(&self, change: impl FnMut(&mut Settings) + Send + 'static) -> bool {
        self.changes.send_if_node_available(Box::new(change))
    }
}

impl<Settings> Drop for Producer<Settings> {
    fn drop(&mut self) {
        self.parent.detach_producer(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Settings {
        gain: i32,
    }

    #[derive(Debug, PartialEq)]
    struct Obj {
        gain: i32,
    }

    impl From<&Settings> for Obj {
        fn from(s: &Settings) -> Self {
            Obj { gain: s.gain }
        }
    }

    #[test]
    fn instance_sees_initial_snapshot() {
        let obj = AsyncObject::<Obj, Settings>::new(Settings { gain: 1 });
        let instance = obj.create_instance();
        assert_eq!(instance.get().gain, 1);
    }

    #[test]
    fn tick_applies_changes_and_broadcasts() {
        let obj = AsyncObject::<Obj, Settings>::new(Settings { gain: 1 });
        let mut instance = obj.create_instance();
        let producer = obj.create_producer();
        producer.submit(|s| s.gain += 10);
        obj.inner.tick();
        assert!(instance.update());
        assert_eq!(instance.get().gain, 11);
    }

    #[test]
    fn tick_with_no_changes_does_not_broadcast() {
        let obj = AsyncObject::<Obj, Settings>::new(Settings { gain: 1 });
        let mut instance = obj.create_instance();
        obj.inner.tick();
        assert!(!instance.update());
        assert_eq!(instance.get().gain, 1);
    }

    #[test]
    fn changes_apply_in_fifo_order() {
        #[derive(Clone)]
        struct Log(Vec<i32>);
        struct ObjLog(Vec<i32>);
        impl From<&Log> for ObjLog {
            fn from(l: &Log) -> Self {
                ObjLog(l.0.clone())
            }
        }
        let obj = AsyncObject::<ObjLog, Log>::new(Log(Vec::new()));
        let mut instance = obj.create_instance();
        let producer = obj.create_producer();
        producer.submit(|s| s.0.push(1));
        producer.submit(|s| s.0.push(2));
        producer.submit(|s| s.0.push(3));
        obj.inner.tick();
        instance.update();
        assert_eq!(instance.get().0, vec![1, 2, 3]);
    }

    #[test]
    fn dropping_instance_detaches_it() {
        let obj = AsyncObject::<Obj, Settings>::new(Settings { gain: 1 });
        {
            let _instance = obj.create_instance();
            assert_eq!(obj.inner.state.lock().unwrap().instances.len(), 1);
        }
        assert_eq!(obj.inner.state.lock().unwrap().instances.len(), 0);
    }

    #[test]
    fn dropping_producer_detaches_it() {
        let obj = AsyncObject::<Obj, Settings>::new(Settings { gain: 1 });
        {
            let _producer = obj.create_producer();
            assert_eq!(obj.inner.state.lock().unwrap().producers.len(), 1);
        }
        assert_eq!(obj.inner.state.lock().unwrap().producers.len(), 0);
    }

    #[test]
    fn attach_twice_fails() {
        let obj = AsyncObject::<Obj, Settings>::new(Settings { gain: 1 });
        let worker = AsyncWorker::new();
        assert!(obj.attach(&worker).is_ok());
        assert!(matches!(obj.attach(&worker), Err(RtError::AlreadyAttached)));
        obj.detach(&worker);
    }

    #[test]
    fn attach_start_tick_and_detach_end_to_end() {
        let obj = AsyncObject::<Obj, Settings>::new(Settings { gain: 0 });
        let mut instance = obj.create_instance();
        let producer = obj.create_producer();
        let worker = AsyncWorker::new();
        worker.set_period_ms(5);
        obj.attach(&worker).unwrap();
        worker.start();
        producer.submit(|s| s.gain = 99);
        std::thread::sleep(std::time::Duration::from_millis(60));
        worker.stop();
        while instance.update() {}
        assert_eq!(instance.get().gain, 99);
        obj.detach(&worker);
    }

    #[test]
    fn an_undelivered_snapshot_is_discarded_not_appended() {
        let obj = AsyncObject::<Obj, Settings>::new(Settings { gain: 0 });
        let mut instance = obj.create_instance();
        let producer = obj.create_producer();

        producer.submit(|s| s.gain = 1);
        obj.inner.tick();
        producer.submit(|s| s.gain = 2);
        obj.inner.tick();

        // Two ticks ran without the instance ever calling `update`, so
        // `to_instance` held an undelivered gain=1 snapshot when the second
        // tick produced gain=2. Discard-and-replace means exactly one
        // snapshot is pending, and it's the newest.
        assert!(instance.update());
        assert_eq!(instance.get().gain, 2);
        assert!(!instance.update());
    }

    #[test]
    fn with_messenger_config_preallocates_producer_and_instance_free_lists() {
        let obj = AsyncObject::<Obj, Settings>::with_messenger_config(
            Settings { gain: 0 },
            MessengerConfig { preallocate: 2 },
        );
        let mut instance = obj.create_instance();
        let producer = obj.create_producer();

        // Two submit_nb calls succeed without allocating a node, because
        // create_producer primed the changes free list.
        assert!(producer.submit_nb(|s| s.gain += 1));
        assert!(producer.submit_nb(|s| s.gain += 1));

        obj.inner.tick();
        assert!(instance.update());
        assert_eq!(instance.get().gain, 2);
    }
}

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

//! A background thread that ticks a set of attached objects on a fixed
//! period.
//!
//! This generalizes the driving loop that used to live behind a
//! platform-specific audio callback: instead of a hardware clock invoking
//! exactly one graph, `AsyncWorker` sleeps for its configured period and
//! then ticks every object attached to it, in attachment order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const DEFAULT_PERIOD_MS: u64 = 250;

/// Construction-time parameters for an [`AsyncWorker`].
///
/// `preallocate` reserves capacity in the worker's attachment list up
/// front, so the first few `attach` calls after construction don't grow
/// that `Vec`; it has no bearing on any individual object's own
/// `Messenger` free lists, which each [`crate::async_object::AsyncObject`]
/// preallocates separately via [`crate::messenger::Messenger::preallocate`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub period: Duration,
    pub preallocate: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            period: Duration::from_millis(DEFAULT_PERIOD_MS),
            preallocate: 0,
        }
    }
}

/// Implemented by the object-erased handle an [`AsyncObject`] hands to a
/// worker on attach. Not exposed outside the crate: callers only ever see
/// concrete `AsyncObject<Obj, Settings>` values.
///
/// [`AsyncObject`]: crate::async_object::AsyncObject
pub(crate) trait Tickable: Send + Sync {
    fn tick(&self);
}

struct WorkerState {
    period_ms: AtomicU64,
    stop_requested: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
    attached: Mutex<Vec<Arc<dyn Tickable>>>,
}

/// A background thread that periodically ticks every object attached to
/// it. Not realtime-safe itself -- it owns a genuine OS thread and sleeps on
/// a `Duration` -- but the tick it drives is exactly the allocation-free,
/// lock-bounded step described on [`crate::async_object::AsyncObject`].
pub struct AsyncWorker {
    state: Arc<WorkerState>,
}

impl AsyncWorker {
    pub fn new() -> Self {
        AsyncWorker::with_config(WorkerConfig::default())
    }

    /// Build a worker whose period and attachment-list capacity come from
    /// `config`, rather than the documented defaults.
    pub fn with_config(config: WorkerConfig) -> Self {
        AsyncWorker {
            state: Arc::new(WorkerState {
                period_ms: AtomicU64::new(config.period.as_millis() as u64),
                stop_requested: AtomicBool::new(false),
                handle: Mutex::new(None),
                attached: Mutex::new(Vec::with_capacity(config.preallocate)),
            }),
        }
    }

    pub fn get_period_ms(&self) -> u64 {
        self.state.period_ms.load(Ordering::Relaxed)
    }

    pub fn set_period_ms(&self, period_ms: u64) {
        self.state.period_ms.store(period_ms, Ordering::Relaxed);
    }

    pub(crate) fn attach_tickable(&self, obj: Arc<dyn Tickable>) {
        self.state.attached.lock().unwrap_or_else(|e| e.into_inner()).push(obj);
    }

    pub(crate) fn detach_tickable(&self, obj: &Arc<dyn Tickable>) {
        let mut attached = self.state.attached.lock().unwrap_or_else(|e| e.into_inner());
        attached.retain(|a| !Arc::ptr_eq(a, obj));
    }

    /// Start the worker thread if it is not already running. Idempotent.
    pub fn start(&self) {
        let mut handle = self.state.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.is_some() {
            return;
        }
        self.state.stop_requested.store(false, Ordering::Relaxed);
        let state = Arc::clone(&self.state);
        tracing::debug!(period_ms = state.period_ms.load(Ordering::Relaxed), "starting async worker");
        *handle = Some(thread::spawn(move || run(state)));
    }

    /// Stop the worker thread and join it. Idempotent.
    pub fn stop(&self) {
        self.state.stop_requested.store(true, Ordering::Release);
        let join_handle = self
            .state
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(join_handle) = join_handle {
            tracing::debug!("stopping async worker");
            let _ = join_handle.join();
        }
    }
}

impl Default for AsyncWorker {
    fn default() -> Self {
        AsyncWorker::new()
    }
}

impl Drop for AsyncWorker {
    fn drop(&mut self) {
        self.stop();
        self.state.attached.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

fn run(state: Arc<WorkerState>) {
    loop {
        {
            let attached = state.attached.lock().unwrap_or_else(|e| e.into_inner());
            for obj in attached.iter() {
                obj.tick();
            }
        }
        if state.stop_requested.load(Ordering::Acquire) {
            return;
        }
        let period_ms = state.period_ms.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(period_ms));
        if state.stop_requested.load(Ordering::Acquire) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingTickable(Arc<AtomicUsize>);
    impl Tickable for CountingTickable {
        fn tick(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn start_stop_is_idempotent() {
        let worker = AsyncWorker::new();
        worker.start();
        worker.start();
        worker.stop();
        worker.stop();
    }

    #[test]
    fn attached_objects_get_ticked() {
        let worker = AsyncWorker::new();
        worker.set_period_ms(5);
        let count = Arc::new(AtomicUsize::new(0));
        let tickable: Arc<dyn Tickable> = Arc::new(CountingTickable(Arc::clone(&count)));
        worker.attach_tickable(Arc::clone(&tickable));
        worker.start();
        thread::sleep(Duration::from_millis(60));
        worker.stop();
        assert!(count.load(Ordering::Relaxed) >= 2);
    }

    #[test]
    fn detach_stops_further_ticks() {
        let worker = AsyncWorker::new();
        worker.set_period_ms(5);
        let count = Arc::new(AtomicUsize::new(0));
        let tickable: Arc<dyn Tickable> = Arc::new(CountingTickable(Arc::clone(&count)));
        worker.attach_tickable(Arc::clone(&tickable));
        worker.start();
        thread::sleep(Duration::from_millis(30));
        worker.detach_tickable(&tickable);
        let after_detach = count.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(30));
        worker.stop();
        assert_eq!(count.load(Ordering::Relaxed), after_detach);
    }

    #[test]
    fn default_period_matches_documented_value() {
        let worker = AsyncWorker::new();
        assert_eq!(worker.get_period_ms(), DEFAULT_PERIOD_MS);
    }

    #[test]
    fn with_config_honors_a_non_default_period() {
        let worker = AsyncWorker::with_config(WorkerConfig {
            period: Duration::from_millis(10),
            preallocate: 4,
        });
        assert_eq!(worker.get_period_ms(), 10);
    }
}

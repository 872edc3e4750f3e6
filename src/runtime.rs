//! Process-wide runtime state and the per-thread event-capture hot path.
//!
//! # Design
//!
//! ```text
//! instrumented code                 this module                 background
//! ─────────────────                 ───────────                 ──────────
//! log_function_entry(id) ──► thread-local ring buffer
//!                            (slice borrowed from the pool)
//!                                   │ full, or explicit flush
//!                                   ▼
//!                            FlushQueue::enqueue ─────────► worker thread
//!                                                           writes .trace
//! ```
//!
//! The runtime initializes lazily on the first instrumentation call and
//! tears down on [`stop_runtime`]. Hot-path calls are infallible: when
//! both pools are exhausted the event is dropped and counted, never
//! surfaced as an error into instrumented code.
//!
//! Thread-local buffers deregister themselves on thread exit: the
//! `ThreadEventBuffer` drop handler enqueues any pending events and the
//! slice handle returns to its pool.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::debug;

use crate::clock::{ProcessSteadyClock, SteadyClock, UnixSystemClock};
use crate::config::RuntimeConfig;
use crate::event::{Event, EventKind, FunctionId, ProcessId};
use crate::flush_queue::{FlushQueue, FlushQueueOptions};
use crate::slice_pool::{
    DynamicSlicePoolOptions, OwnedSlice, ReservedSlicePoolOptions, SlicePool,
    SlicePoolOptions,
};
use crate::trace_writer::FileTraceWriter;

static RUNTIME: RwLock<Option<Arc<Runtime>>> = RwLock::new(None);

thread_local! {
    static THREAD_EVENT_BUFFER: RefCell<Option<ThreadEventBuffer>> = RefCell::new(None);
}

/// Owns the slice pool and the flush queue for one runtime activation.
pub struct Runtime {
    config: RuntimeConfig,
    pool: SlicePool<Event>,
    flush_queue: FlushQueue,
    steady_clock: Arc<dyn SteadyClock>,
    dropped_events: AtomicU64,
}

impl Runtime {
    /// Builds the pools and flush queue from `config` and starts the
    /// flush worker.
    pub fn new(config: RuntimeConfig) -> Self {
        let steady_clock: Arc<dyn SteadyClock> = Arc::new(ProcessSteadyClock::new());
        let pool = SlicePool::new(SlicePoolOptions {
            reserved_pool_options: ReservedSlicePoolOptions {
                capacity: config.reserved_event_pool_capacity,
                slice_capacity: config.max_reserved_event_buffer_slice_capacity,
            },
            dynamic_pool_options: DynamicSlicePoolOptions {
                capacity: config.dynamic_event_pool_capacity,
                slice_capacity: config.max_dynamic_event_buffer_slice_capacity,
                borrow_cas_attempts: config.dynamic_event_slice_borrow_cas_attempts,
            },
        });
        let retention_nanos =
            u64::try_from(config.event_buffer_retention_duration_nanoseconds)
                .unwrap_or(0);
        let flush_queue = FlushQueue::new(
            FlushQueueOptions {
                trace_file_path: config.trace_file_path.clone(),
                session_id: config.session_id,
                process_id: std::process::id() as ProcessId,
                buffer_retention_duration: Duration::from_nanos(retention_nanos),
                max_buffer_flush_attempts: config.max_flush_buffer_to_file_attempts,
            },
            Arc::clone(&steady_clock),
            Arc::new(UnixSystemClock::new()),
            Arc::new(FileTraceWriter::new()),
        );
        flush_queue.run();
        debug!(session_id = config.session_id, "runtime started");
        Self {
            config,
            pool,
            flush_queue,
            steady_clock,
            dropped_events: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn pool(&self) -> &SlicePool<Event> {
        &self.pool
    }

    pub fn flush_queue(&self) -> &FlushQueue {
        &self.flush_queue
    }

    /// Events discarded because no slice could be borrowed.
    pub fn dropped_event_count(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        // Advance the horizon first so draining does not wait out the
        // retention window on still-retained buffers.
        self.flush_queue.flush();
        self.flush_queue.drain_and_stop();
        debug!(
            session_id = self.config.session_id,
            dropped = self.dropped_event_count(),
            "runtime stopped"
        );
    }
}

struct ThreadEventBuffer {
    runtime: Arc<Runtime>,
    slice: Option<OwnedSlice<Event>>,
}

impl ThreadEventBuffer {
    fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            slice: None,
        }
    }

    fn log(&mut self, kind: EventKind, function_id: FunctionId) {
        let timestamp = self.runtime.steady_clock.now();
        if self.slice.is_none() {
            let preferred = self.runtime.config.thread_event_buffer_capacity;
            match self.runtime.pool.borrow(preferred) {
                Ok(slice) => self.slice = Some(slice),
                Err(_) => {
                    self.runtime.dropped_events.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
        if let Some(slice) = self.slice.as_mut() {
            slice.push(Event::new(kind, function_id, timestamp));
            if slice.is_full() && self.runtime.config.flush_event_buffer_when_full {
                self.enqueue_in_flight();
            }
        }
    }

    fn enqueue_in_flight(&mut self) {
        if let Some(slice) = self.slice.take() {
            if slice.is_empty() {
                // Nothing buffered; hold on to the slice.
                self.slice = Some(slice);
                return;
            }
            self.runtime.flush_queue.enqueue(slice);
        }
    }

    fn clear(&mut self) {
        if let Some(slice) = self.slice.as_mut() {
            slice.clear();
        }
    }
}

impl Drop for ThreadEventBuffer {
    fn drop(&mut self) {
        self.enqueue_in_flight();
    }
}

/// Starts the runtime with configuration read from the environment.
/// Idempotent: a running runtime is left untouched.
pub fn initialize_runtime() {
    initialize_runtime_with_config(RuntimeConfig::from_env());
}

/// Starts the runtime with an explicit configuration. Idempotent: a
/// running runtime is left untouched.
pub fn initialize_runtime_with_config(config: RuntimeConfig) {
    let mut runtime = RUNTIME.write().unwrap();
    if runtime.is_none() {
        *runtime = Some(Arc::new(Runtime::new(config)));
    }
}

pub fn runtime_initialized() -> bool {
    RUNTIME.read().unwrap().is_some()
}

/// Flushes the calling thread's pending events, drains the flush queue,
/// and tears the runtime down. Other threads' in-flight buffers return to
/// the pool when their threads exit.
pub fn stop_runtime() {
    let runtime = RUNTIME.write().unwrap().take();
    if let Some(runtime) = runtime {
        THREAD_EVENT_BUFFER.with(|cell| {
            if let Some(buffer) = cell.borrow_mut().as_mut() {
                buffer.enqueue_in_flight();
            }
        });
        runtime.stop();
    }
}

pub fn log_function_entry(function_id: FunctionId) {
    log_event(EventKind::FunctionEntry, function_id);
}

pub fn log_function_exit(function_id: FunctionId) {
    log_event(EventKind::FunctionExit, function_id);
}

/// Records one event into the calling thread's buffer, lazily starting
/// the runtime and borrowing a slice as needed. Infallible by contract.
pub fn log_event(kind: EventKind, function_id: FunctionId) {
    let runtime = current_or_initialized_runtime();
    THREAD_EVENT_BUFFER.with(|cell| {
        let mut cell = cell.borrow_mut();
        let stale = match cell.as_ref() {
            Some(buffer) => !Arc::ptr_eq(&buffer.runtime, &runtime),
            None => true,
        };
        if stale {
            // Drops any buffer from a previous activation, returning its
            // slice to the old pool.
            *cell = Some(ThreadEventBuffer::new(Arc::clone(&runtime)));
        }
        if let Some(buffer) = cell.as_mut() {
            buffer.log(kind, function_id);
        }
    });
}

/// Makes everything enqueued so far eligible for writing; also enqueues
/// the calling thread's in-flight buffer when
/// `flush_event_buffer_immediately_after_flush` is set.
pub fn flush_trace_events() {
    let runtime = match current_runtime() {
        Some(runtime) => runtime,
        None => return,
    };
    if runtime.config.flush_event_buffer_immediately_after_flush {
        THREAD_EVENT_BUFFER.with(|cell| {
            if let Some(buffer) = cell.borrow_mut().as_mut() {
                buffer.enqueue_in_flight();
            }
        });
    }
    runtime.flush_queue.flush();
}

/// Discards all queued buffers and the calling thread's buffered events.
pub fn clear_trace_events() {
    let runtime = match current_runtime() {
        Some(runtime) => runtime,
        None => return,
    };
    THREAD_EVENT_BUFFER.with(|cell| {
        if let Some(buffer) = cell.borrow_mut().as_mut() {
            buffer.clear();
        }
    });
    runtime.flush_queue.clear();
}

fn current_runtime() -> Option<Arc<Runtime>> {
    RUNTIME.read().unwrap().clone()
}

fn current_or_initialized_runtime() -> Arc<Runtime> {
    if let Some(runtime) = current_runtime() {
        return runtime;
    }
    let mut guard = RUNTIME.write().unwrap();
    if let Some(runtime) = guard.as_ref() {
        // A racing thread installed the runtime first.
        return Arc::clone(runtime);
    }
    let runtime = Arc::new(Runtime::new(RuntimeConfig::from_env()));
    *guard = Some(Arc::clone(&runtime));
    runtime
}

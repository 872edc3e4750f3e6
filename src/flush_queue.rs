//! Background queue that persists filled event buffers to disk.
//!
//! # Design
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │ APPLICATION THREADS (hot path)                                 │
//! │   enqueue(buffer)  → stamp timestamp, thread id, retry budget  │
//! └───────────────────────────┬────────────────────────────────────┘
//!                             │ rw-lock guarded VecDeque
//!                             ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │ WORKER THREAD (cold path, sole writer of on-disk state)        │
//! │   loop {                                                       │
//! │     pop entry (yield if empty)                                 │
//! │     retained and not past the flush horizon? → re-enqueue      │
//! │     else TraceWriter::write(path, header, buffer, footer)      │
//! │     error? retry up to the attempt budget, then drop           │
//! │   }                                                            │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An enqueued buffer stays in the queue while its retention window is
//! open, unless a `flush` call advances the horizon past its enqueue
//! timestamp. Either aging out of retention or falling behind the horizon
//! makes it eligible for writing, so a buffer may be re-enqueued several
//! times before it reaches disk. Exhausting the retry budget drops the
//! buffer; delivery outside the retention window is not guaranteed.
//!
//! # Concurrency discipline
//!
//! Queue contents and the flush horizon live behind one `RwLock` (writers
//! exclusive, `size`/`is_empty` shared). The `running`/`draining` flags
//! are atomics coordinating state transitions without the lock. Dropping
//! a popped entry without writing it returns its slice to the pool via
//! the `OwnedSlice` handle.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::{SteadyClock, SystemClock};
use crate::event::{Event, ProcessId, SessionId, TimestampNanos, TraceThreadId};
use crate::slice_pool::OwnedSlice;
use crate::trace_writer::{Footer, Header, TraceWriter, TRACE_FILE_VERSION};

/// Observable lifecycle states.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Initial state, and the state after a drain completes.
    Stopped,
    /// Worker active; `enqueue` accepted.
    Running,
    /// Worker processing remaining entries before stopping.
    Draining,
}

#[derive(Clone, Debug)]
pub struct FlushQueueOptions {
    /// Directory trace files are written into.
    pub trace_file_path: PathBuf,
    pub session_id: SessionId,
    pub process_id: ProcessId,
    /// How long an enqueued buffer stays in the queue awaiting an explicit
    /// flush before it is written anyway.
    pub buffer_retention_duration: Duration,
    /// Retry budget per buffer when the writer reports an error.
    pub max_buffer_flush_attempts: i32,
}

struct FlushInfo {
    buffer: OwnedSlice<Event>,
    flush_timestamp: TimestampNanos,
    thread_id: TraceThreadId,
    remaining_flush_attempts: i32,
}

struct Inner {
    queue: VecDeque<FlushInfo>,
    flush_horizon: TimestampNanos,
}

struct Shared {
    options: FlushQueueOptions,
    retention_nanos: TimestampNanos,
    steady_clock: Arc<dyn SteadyClock>,
    system_clock: Arc<dyn SystemClock>,
    trace_writer: Arc<dyn TraceWriter>,
    inner: RwLock<Inner>,
    running: AtomicBool,
    draining: AtomicBool,
}

/// Multi-producer, single-consumer queue of filled buffers with a
/// dedicated worker thread. See the module docs for scheduling semantics.
pub struct FlushQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FlushQueue {
    pub fn new(
        options: FlushQueueOptions,
        steady_clock: Arc<dyn SteadyClock>,
        system_clock: Arc<dyn SystemClock>,
        trace_writer: Arc<dyn TraceWriter>,
    ) -> Self {
        let flush_horizon = steady_clock.now();
        let retention_nanos =
            TimestampNanos::try_from(options.buffer_retention_duration.as_nanos())
                .unwrap_or(TimestampNanos::MAX);
        Self {
            shared: Arc::new(Shared {
                options,
                retention_nanos,
                steady_clock,
                system_clock,
                trace_writer,
                inner: RwLock::new(Inner {
                    queue: VecDeque::new(),
                    flush_horizon,
                }),
                running: AtomicBool::new(false),
                draining: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the worker and starts accepting buffers. Idempotent while
    /// running.
    pub fn run(&self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.draining.store(false, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::spawn(move || worker_loop(&shared));
        *self.worker.lock().unwrap() = Some(handle);
    }

    /// Accepts a filled buffer, stamping its enqueue timestamp, the
    /// calling thread's trace id, and the retry budget. Silently rejected
    /// unless the queue is running; a rejected buffer's slice returns to
    /// its pool immediately.
    pub fn enqueue(&self, buffer: OwnedSlice<Event>) {
        let flush_timestamp = self.shared.steady_clock.now();
        if !self.shared.running.load(Ordering::Acquire)
            || self.shared.draining.load(Ordering::Acquire)
        {
            return;
        }
        let flush_info = FlushInfo {
            buffer,
            flush_timestamp,
            thread_id: current_thread_trace_id(),
            remaining_flush_attempts: self.shared.options.max_buffer_flush_attempts,
        };
        self.shared.inner.write().unwrap().queue.push_back(flush_info);
    }

    /// Advances the flush horizon to now: everything currently queued
    /// becomes eligible to be written.
    pub fn flush(&self) {
        let now = self.shared.steady_clock.now();
        self.shared.inner.write().unwrap().flush_horizon = now;
    }

    /// Discards all queued entries without writing them. Their slices
    /// return to the pool.
    pub fn clear(&self) {
        let mut inner = self.shared.inner.write().unwrap();
        inner.queue.clear();
    }

    /// Stops accepting buffers, waits for the worker to write or drop
    /// every queued entry, then joins it. Idempotent.
    pub fn drain_and_stop(&self) {
        if !self.shared.running.load(Ordering::Acquire)
            || self.shared.draining.swap(true, Ordering::AcqRel)
        {
            return;
        }
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.shared.running.store(false, Ordering::Release);
    }

    pub fn state(&self) -> State {
        if !self.shared.running.load(Ordering::Acquire) {
            return State::Stopped;
        }
        if self.shared.draining.load(Ordering::Acquire) {
            return State::Draining;
        }
        State::Running
    }

    pub fn size(&self) -> usize {
        self.shared.inner.read().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.inner.read().unwrap().queue.is_empty()
    }
}

impl Drop for FlushQueue {
    fn drop(&mut self) {
        self.drain_and_stop();
    }
}

fn worker_loop(shared: &Shared) {
    while !shared.draining.load(Ordering::Acquire)
        || !shared.inner.read().unwrap().queue.is_empty()
    {
        let popped = shared.inner.write().unwrap().queue.pop_front();
        let mut flush_info = match popped {
            Some(flush_info) => flush_info,
            None => {
                thread::yield_now();
                continue;
            }
        };
        let now = shared.steady_clock.now();
        let retain =
            now < flush_info.flush_timestamp.saturating_add(shared.retention_nanos);
        let flush =
            flush_info.flush_timestamp <= shared.inner.read().unwrap().flush_horizon;
        if retain && !flush {
            shared.inner.write().unwrap().queue.push_back(flush_info);
            thread::yield_now();
            continue;
        }
        let path = trace_file_path(shared, &flush_info);
        let header = trace_file_header(shared, &flush_info);
        match shared
            .trace_writer
            .write(&path, &header, &flush_info.buffer, &Footer::default())
        {
            Ok(()) => {
                debug!(path = %path.display(), events = header.event_count, "wrote trace file");
            }
            Err(error) => {
                if flush_info.remaining_flush_attempts > 0 {
                    flush_info.remaining_flush_attempts -= 1;
                    shared.inner.write().unwrap().queue.push_back(flush_info);
                } else {
                    warn!(
                        path = %path.display(),
                        %error,
                        "dropping event buffer after exhausting flush attempts"
                    );
                }
            }
        }
    }
    shared.draining.store(false, Ordering::Release);
}

fn trace_file_path(shared: &Shared, flush_info: &FlushInfo) -> PathBuf {
    let file_name = format!(
        "spoor-{:016x}-{:016x}-{:016x}.trace",
        shared.options.session_id, flush_info.thread_id, flush_info.flush_timestamp
    );
    shared.options.trace_file_path.join(file_name)
}

fn trace_file_header(shared: &Shared, flush_info: &FlushInfo) -> Header {
    Header {
        version: TRACE_FILE_VERSION,
        session_id: shared.options.session_id,
        process_id: shared.options.process_id,
        thread_id: flush_info.thread_id,
        system_clock_timestamp: shared.system_clock.now(),
        steady_clock_timestamp: shared.steady_clock.now(),
        event_count: flush_info.buffer.size() as u64,
    }
}

/// 64-bit hash of the platform thread identifier.
pub(crate) fn current_thread_trace_id() -> TraceThreadId {
    let mut hasher = DefaultHasher::new();
    thread::current().id().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::slice_pool::{DynamicSlicePool, DynamicSlicePoolOptions};
    use crate::trace_writer::TraceWriteError;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct RecordingWriter {
        writes: Mutex<Vec<(PathBuf, Header, Vec<Event>)>>,
        failures_remaining: AtomicUsize,
    }

    impl RecordingWriter {
        fn new() -> Self {
            Self::failing_first(0)
        }

        fn failing_first(failures: usize) -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
                failures_remaining: AtomicUsize::new(failures),
            }
        }

        fn written(&self) -> Vec<(PathBuf, Header, Vec<Event>)> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl TraceWriter for RecordingWriter {
        fn write(
            &self,
            path: &Path,
            header: &Header,
            buffer: &crate::circular_buffer::CircularBuffer<Event>,
            _footer: &Footer,
        ) -> Result<(), TraceWriteError> {
            let failures = self.failures_remaining.load(Ordering::Acquire);
            if failures > 0 {
                self.failures_remaining.store(failures - 1, Ordering::Release);
                return Err(TraceWriteError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "synthetic failure",
                )));
            }
            let events: Vec<Event> = buffer
                .contiguous_memory_chunks()
                .into_iter()
                .flatten()
                .copied()
                .collect();
            self.writes
                .lock()
                .unwrap()
                .push((path.to_path_buf(), *header, events));
            Ok(())
        }
    }

    struct Fixture {
        queue: FlushQueue,
        clock: Arc<ManualClock>,
        writer: Arc<RecordingWriter>,
        pool: DynamicSlicePool<Event>,
    }

    fn fixture(retention: Duration, writer: RecordingWriter) -> Fixture {
        let clock = Arc::new(ManualClock::new(0));
        let writer = Arc::new(writer);
        let queue = FlushQueue::new(
            FlushQueueOptions {
                trace_file_path: PathBuf::from("/traces"),
                session_id: 0xfeed,
                process_id: 42,
                buffer_retention_duration: retention,
                max_buffer_flush_attempts: 2,
            },
            clock.clone(),
            clock.clone(),
            writer.clone(),
        );
        let pool = DynamicSlicePool::new(DynamicSlicePoolOptions {
            capacity: 1 << 16,
            slice_capacity: 1 << 10,
            borrow_cas_attempts: 8,
        });
        Fixture {
            queue,
            clock,
            writer,
            pool,
        }
    }

    fn filled_buffer(pool: &DynamicSlicePool<Event>, events: u64) -> OwnedSlice<Event> {
        let mut slice = pool.borrow(1 << 10).unwrap();
        for i in 0..events {
            slice.push(Event::new(crate::event::EventKind::FunctionEntry, i, i as i64));
        }
        slice
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::yield_now();
        }
    }

    #[test]
    fn test_initial_state_is_stopped() {
        let fixture = fixture(Duration::from_secs(1), RecordingWriter::new());
        assert_eq!(fixture.queue.state(), State::Stopped);
        assert!(fixture.queue.is_empty());
        assert_eq!(fixture.queue.size(), 0);
    }

    #[test]
    fn test_enqueue_rejected_while_stopped() {
        let fixture = fixture(Duration::from_secs(1), RecordingWriter::new());
        fixture.queue.enqueue(filled_buffer(&fixture.pool, 3));
        assert!(fixture.queue.is_empty());
        // The rejected buffer's capacity went straight back to the pool.
        assert_eq!(fixture.pool.size(), fixture.pool.capacity());
    }

    #[test]
    fn test_flush_makes_queued_buffer_eligible() {
        let fixture = fixture(Duration::from_secs(3600), RecordingWriter::new());
        fixture.queue.run();
        assert_eq!(fixture.queue.state(), State::Running);

        fixture.clock.advance(1_000);
        fixture.queue.enqueue(filled_buffer(&fixture.pool, 5));
        fixture.clock.advance(1_000);
        fixture.queue.flush();

        wait_until(|| !fixture.writer.written().is_empty());
        let written = fixture.writer.written();
        assert_eq!(written.len(), 1);
        let (path, header, events) = &written[0];
        assert_eq!(header.session_id, 0xfeed);
        assert_eq!(header.event_count, 5);
        assert_eq!(events.len(), 5);
        let expected_name = format!(
            "spoor-{:016x}-{:016x}-{:016x}.trace",
            0xfeed_u64, header.thread_id, 1_000
        );
        assert_eq!(path, &PathBuf::from("/traces").join(expected_name));

        fixture.queue.drain_and_stop();
        assert_eq!(fixture.queue.state(), State::Stopped);
    }

    #[test]
    fn test_retention_expiry_writes_without_flush() {
        let fixture = fixture(Duration::from_nanos(1_000), RecordingWriter::new());
        fixture.queue.run();
        fixture.clock.advance(100);
        fixture.queue.enqueue(filled_buffer(&fixture.pool, 2));

        // Retention still open and no flush requested: nothing is written.
        // (The entry may transiently sit in the worker's hands, so only the
        // absence of writes is asserted.)
        fixture.clock.advance(500);
        thread::sleep(Duration::from_millis(10));
        assert!(fixture.writer.written().is_empty());

        // Aging past the retention window makes the buffer eligible even
        // though the horizon never moved.
        fixture.clock.advance(600);
        wait_until(|| fixture.writer.written().len() == 1);
        assert_eq!(fixture.writer.written()[0].2.len(), 2);

        fixture.queue.drain_and_stop();
    }

    #[test]
    fn test_clear_discards_queued_buffers() {
        let fixture = fixture(Duration::from_secs(3600), RecordingWriter::new());
        // Accept enqueues without a worker so the queue contents stay
        // deterministic while we clear.
        fixture.queue.shared.running.store(true, Ordering::Release);
        fixture.clock.advance(1_000);
        fixture.queue.enqueue(filled_buffer(&fixture.pool, 1));
        fixture.queue.enqueue(filled_buffer(&fixture.pool, 1));
        assert_eq!(fixture.queue.size(), 2);

        fixture.queue.clear();
        assert_eq!(fixture.queue.size(), 0);
        // The discarded buffers' slices went straight back to the pool.
        assert_eq!(fixture.pool.size(), fixture.pool.capacity());
        assert!(fixture.writer.written().is_empty());
        fixture.queue.shared.running.store(false, Ordering::Release);
    }

    #[test]
    fn test_write_errors_retry_then_succeed() {
        let fixture = fixture(Duration::ZERO, RecordingWriter::failing_first(2));
        fixture.queue.run();
        fixture.queue.enqueue(filled_buffer(&fixture.pool, 4));
        // Two synthetic failures consume the retry budget; the third
        // attempt lands.
        wait_until(|| fixture.writer.written().len() == 1);
        fixture.queue.drain_and_stop();
    }

    #[test]
    fn test_write_errors_exhaust_attempts_and_drop() {
        let fixture = fixture(Duration::ZERO, RecordingWriter::failing_first(usize::MAX));
        fixture.queue.run();
        fixture.queue.enqueue(filled_buffer(&fixture.pool, 4));
        // 1 initial attempt + 2 retries, then the buffer is dropped and
        // its slice returns to the pool.
        wait_until(|| fixture.pool.size() == fixture.pool.capacity());
        fixture.queue.drain_and_stop();
        assert!(fixture.queue.is_empty());
        assert!(fixture.writer.written().is_empty());
    }

    #[test]
    fn test_drain_and_stop_flushes_eligible_entries() {
        let fixture = fixture(Duration::ZERO, RecordingWriter::new());
        fixture.queue.run();
        for _ in 0..3 {
            fixture.queue.enqueue(filled_buffer(&fixture.pool, 1));
        }
        fixture.queue.drain_and_stop();
        assert_eq!(fixture.queue.state(), State::Stopped);
        assert!(fixture.queue.is_empty());
        assert_eq!(fixture.writer.written().len(), 3);
        // Idempotent.
        fixture.queue.drain_and_stop();
        assert_eq!(fixture.queue.state(), State::Stopped);
    }

    #[test]
    fn test_run_is_idempotent_and_restartable() {
        let fixture = fixture(Duration::ZERO, RecordingWriter::new());
        fixture.queue.run();
        fixture.queue.run();
        assert_eq!(fixture.queue.state(), State::Running);
        fixture.queue.drain_and_stop();
        fixture.queue.run();
        assert_eq!(fixture.queue.state(), State::Running);
        fixture.queue.enqueue(filled_buffer(&fixture.pool, 1));
        wait_until(|| fixture.writer.written().len() == 1);
        fixture.queue.drain_and_stop();
    }
}

//! Trace-file serialization boundary.
//!
//! The flush queue hands a filled buffer to a [`TraceWriter`] together
//! with the header and footer describing it; everything about the on-disk
//! byte layout lives behind this trait. [`FileTraceWriter`] is the
//! production implementation: little-endian fixed-width fields, events
//! serialized chunk by chunk straight out of the ring buffer's storage.
//!
//! A write either fully succeeds or reports an error; the queue treats
//! any error as retriable.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use crate::circular_buffer::CircularBuffer;
use crate::event::{Event, ProcessId, SessionId, TimestampNanos, TraceThreadId};

/// Version tag written into every trace-file header.
pub const TRACE_FILE_VERSION: u32 = 1;

/// Metadata preceding the event payload in a trace file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub session_id: SessionId,
    pub process_id: ProcessId,
    pub thread_id: TraceThreadId,
    pub system_clock_timestamp: TimestampNanos,
    pub steady_clock_timestamp: TimestampNanos,
    pub event_count: u64,
}

/// Trailer following the event payload. Currently empty; reserved for
/// integrity metadata.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Footer {}

#[derive(Debug, Error)]
pub enum TraceWriteError {
    #[error("failed to write trace file: {0}")]
    Io(#[from] std::io::Error),
}

/// Serializes one filled buffer to stable storage.
pub trait TraceWriter: Send + Sync {
    fn write(
        &self,
        path: &Path,
        header: &Header,
        buffer: &CircularBuffer<Event>,
        footer: &Footer,
    ) -> Result<(), TraceWriteError>;
}

/// Writes trace files to the local filesystem.
///
/// The file is assembled under a temporary name and renamed into place,
/// so a crashed or failed write never leaves a partial `.trace` file for
/// readers to trip over.
#[derive(Debug, Default)]
pub struct FileTraceWriter {}

impl FileTraceWriter {
    pub fn new() -> Self {
        Self {}
    }

    fn write_header(writer: &mut impl Write, header: &Header) -> std::io::Result<()> {
        writer.write_all(&header.version.to_le_bytes())?;
        writer.write_all(&header.session_id.to_le_bytes())?;
        writer.write_all(&header.process_id.to_le_bytes())?;
        writer.write_all(&header.thread_id.to_le_bytes())?;
        writer.write_all(&header.system_clock_timestamp.to_le_bytes())?;
        writer.write_all(&header.steady_clock_timestamp.to_le_bytes())?;
        writer.write_all(&header.event_count.to_le_bytes())
    }

    fn write_event(writer: &mut impl Write, event: &Event) -> std::io::Result<()> {
        writer.write_all(&(event.kind as u64).to_le_bytes())?;
        writer.write_all(&event.function_id.to_le_bytes())?;
        writer.write_all(&event.steady_clock_timestamp.to_le_bytes())
    }

    fn write_footer(_writer: &mut impl Write, _footer: &Footer) -> std::io::Result<()> {
        Ok(())
    }
}

impl TraceWriter for FileTraceWriter {
    fn write(
        &self,
        path: &Path,
        header: &Header,
        buffer: &CircularBuffer<Event>,
        footer: &Footer,
    ) -> Result<(), TraceWriteError> {
        let temporary_path = path.with_extension("trace.tmp");
        {
            let file = File::create(&temporary_path)?;
            let mut writer = BufWriter::new(file);
            Self::write_header(&mut writer, header)?;
            for chunk in buffer.contiguous_memory_chunks() {
                for event in chunk {
                    Self::write_event(&mut writer, event)?;
                }
            }
            Self::write_footer(&mut writer, footer)?;
            writer.flush()?;
        }
        fs::rename(&temporary_path, path)?;
        Ok(())
    }
}

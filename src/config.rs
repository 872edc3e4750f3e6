//! Runtime configuration read from the environment.
//!
//! Every option has a same-named `SPOOR_RUNTIME_*` environment variable
//! and a default. Configuration can never fail the runtime: a missing or
//! unparseable value silently falls back to its default.

use std::path::PathBuf;
use std::str::FromStr;

use crate::event::{SessionId, TimestampNanos};

pub const TRACE_FILE_PATH_KEY: &str = "SPOOR_RUNTIME_TRACE_FILE_PATH";
pub const SESSION_ID_KEY: &str = "SPOOR_RUNTIME_SESSION_ID";
pub const THREAD_EVENT_BUFFER_CAPACITY_KEY: &str =
    "SPOOR_RUNTIME_THREAD_EVENT_BUFFER_CAPACITY";
pub const MAX_RESERVED_EVENT_BUFFER_SLICE_CAPACITY_KEY: &str =
    "SPOOR_RUNTIME_MAX_RESERVED_EVENT_BUFFER_SLICE_CAPACITY";
pub const MAX_DYNAMIC_EVENT_BUFFER_SLICE_CAPACITY_KEY: &str =
    "SPOOR_RUNTIME_MAX_DYNAMIC_EVENT_BUFFER_SLICE_CAPACITY";
pub const RESERVED_EVENT_POOL_CAPACITY_KEY: &str =
    "SPOOR_RUNTIME_RESERVED_EVENT_POOL_CAPACITY";
pub const DYNAMIC_EVENT_POOL_CAPACITY_KEY: &str =
    "SPOOR_RUNTIME_DYNAMIC_EVENT_POOL_CAPACITY";
pub const DYNAMIC_EVENT_SLICE_BORROW_CAS_ATTEMPTS_KEY: &str =
    "SPOOR_RUNTIME_DYNAMIC_EVENT_SLICE_BORROW_CAS_ATTEMPTS";
pub const EVENT_BUFFER_RETENTION_DURATION_NANOSECONDS_KEY: &str =
    "SPOOR_RUNTIME_EVENT_BUFFER_RETENTION_DURATION_NANOSECONDS";
pub const MAX_FLUSH_BUFFER_TO_FILE_ATTEMPTS_KEY: &str =
    "SPOOR_RUNTIME_MAX_FLUSH_BUFFER_TO_FILE_ATTEMPTS";
pub const FLUSH_EVENT_BUFFER_WHEN_FULL_KEY: &str =
    "SPOOR_RUNTIME_FLUSH_EVENT_BUFFER_WHEN_FULL";
pub const FLUSH_EVENT_BUFFER_IMMEDIATELY_AFTER_FLUSH_KEY: &str =
    "SPOOR_RUNTIME_FLUSH_EVENT_BUFFER_IMMEDIATELY_AFTER_FLUSH";

const TRACE_FILE_PATH_DEFAULT: &str = ".";
const THREAD_EVENT_BUFFER_CAPACITY_DEFAULT: usize = 10_000;
const MAX_RESERVED_EVENT_BUFFER_SLICE_CAPACITY_DEFAULT: usize = 10_000;
const MAX_DYNAMIC_EVENT_BUFFER_SLICE_CAPACITY_DEFAULT: usize = 10_000;
const RESERVED_EVENT_POOL_CAPACITY_DEFAULT: usize = 1_000_000;
const DYNAMIC_EVENT_POOL_CAPACITY_DEFAULT: usize = 1_000_000;
const DYNAMIC_EVENT_SLICE_BORROW_CAS_ATTEMPTS_DEFAULT: usize = 1;
const EVENT_BUFFER_RETENTION_DURATION_NANOSECONDS_DEFAULT: TimestampNanos =
    1_000_000_000;
const MAX_FLUSH_BUFFER_TO_FILE_ATTEMPTS_DEFAULT: i32 = 2;
const FLUSH_EVENT_BUFFER_WHEN_FULL_DEFAULT: bool = true;
const FLUSH_EVENT_BUFFER_IMMEDIATELY_AFTER_FLUSH_DEFAULT: bool = true;

/// User-facing runtime options. See the module docs for the environment
/// variable naming scheme.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Directory trace files are written into.
    pub trace_file_path: PathBuf,
    /// Shared by every trace file of one runtime activation. Defaults to
    /// a generated value.
    pub session_id: SessionId,
    /// Per-thread ring size in events.
    pub thread_event_buffer_capacity: usize,
    pub max_reserved_event_buffer_slice_capacity: usize,
    pub max_dynamic_event_buffer_slice_capacity: usize,
    pub reserved_event_pool_capacity: usize,
    pub dynamic_event_pool_capacity: usize,
    pub dynamic_event_slice_borrow_cas_attempts: usize,
    pub event_buffer_retention_duration_nanoseconds: TimestampNanos,
    pub max_flush_buffer_to_file_attempts: i32,
    /// Enqueue a thread's buffer as soon as it fills.
    pub flush_event_buffer_when_full: bool,
    /// Have an explicit flush also enqueue the calling thread's in-flight
    /// buffer.
    pub flush_event_buffer_immediately_after_flush: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env_with(|_| None)
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    fn from_env_with(get_env: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            trace_file_path: PathBuf::from(
                get_env(TRACE_FILE_PATH_KEY)
                    .unwrap_or_else(|| TRACE_FILE_PATH_DEFAULT.to_string()),
            ),
            session_id: parse_or(get_env(SESSION_ID_KEY), rand::random::<SessionId>()),
            thread_event_buffer_capacity: parse_or(
                get_env(THREAD_EVENT_BUFFER_CAPACITY_KEY),
                THREAD_EVENT_BUFFER_CAPACITY_DEFAULT,
            ),
            max_reserved_event_buffer_slice_capacity: parse_or(
                get_env(MAX_RESERVED_EVENT_BUFFER_SLICE_CAPACITY_KEY),
                MAX_RESERVED_EVENT_BUFFER_SLICE_CAPACITY_DEFAULT,
            ),
            max_dynamic_event_buffer_slice_capacity: parse_or(
                get_env(MAX_DYNAMIC_EVENT_BUFFER_SLICE_CAPACITY_KEY),
                MAX_DYNAMIC_EVENT_BUFFER_SLICE_CAPACITY_DEFAULT,
            ),
            reserved_event_pool_capacity: parse_or(
                get_env(RESERVED_EVENT_POOL_CAPACITY_KEY),
                RESERVED_EVENT_POOL_CAPACITY_DEFAULT,
            ),
            dynamic_event_pool_capacity: parse_or(
                get_env(DYNAMIC_EVENT_POOL_CAPACITY_KEY),
                DYNAMIC_EVENT_POOL_CAPACITY_DEFAULT,
            ),
            dynamic_event_slice_borrow_cas_attempts: parse_or(
                get_env(DYNAMIC_EVENT_SLICE_BORROW_CAS_ATTEMPTS_KEY),
                DYNAMIC_EVENT_SLICE_BORROW_CAS_ATTEMPTS_DEFAULT,
            ),
            event_buffer_retention_duration_nanoseconds: parse_or(
                get_env(EVENT_BUFFER_RETENTION_DURATION_NANOSECONDS_KEY),
                EVENT_BUFFER_RETENTION_DURATION_NANOSECONDS_DEFAULT,
            ),
            max_flush_buffer_to_file_attempts: parse_or(
                get_env(MAX_FLUSH_BUFFER_TO_FILE_ATTEMPTS_KEY),
                MAX_FLUSH_BUFFER_TO_FILE_ATTEMPTS_DEFAULT,
            ),
            flush_event_buffer_when_full: parse_bool_or(
                get_env(FLUSH_EVENT_BUFFER_WHEN_FULL_KEY),
                FLUSH_EVENT_BUFFER_WHEN_FULL_DEFAULT,
            ),
            flush_event_buffer_immediately_after_flush: parse_bool_or(
                get_env(FLUSH_EVENT_BUFFER_IMMEDIATELY_AFTER_FLUSH_KEY),
                FLUSH_EVENT_BUFFER_IMMEDIATELY_AFTER_FLUSH_DEFAULT,
            ),
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    match value {
        Some(value) => value.trim().parse().unwrap_or(default),
        None => default,
    }
}

fn parse_bool_or(value: Option<String>, default: bool) -> bool {
    let value = match value {
        Some(value) => value,
        None => return default,
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

//! # WTF recording formats
//!
//! This crate provides Rust types for the JSON payload of Web Tracing
//! Framework recordings (`.wtf-json` files) together with the MIME types and
//! file extensions the ingestion layer recognizes.
//!
//! ## Format Overview
//!
//! A recording is a single JSON object with a small header followed by a flat
//! event list:
//!
//! ```json
//! {
//!   "contextInfo": "script",
//!   "flags": 1,
//!   "timebase": 1469084304.734,
//!   "timeDelay": 0.0007,
//!   "events": [
//!     {"event": "wtf.scope#enter", "time": 0, "args": {"name": "frame"}},
//!     {"event": "wtf.scope#leave", "time": 16000}
//!   ]
//! }
//! ```
//!
//! ## Header
//!
//! - `contextInfo` names the recorded context (a script URL, a process name).
//! - `flags` is a bitmask of [`source_flags`] values.
//! - `timebase` is the wall-clock time of t=0 in the trace, in seconds.
//! - `timeDelay` is the estimated source-to-local clock skew, in seconds.
//!
//! ## Events
//!
//! Each entry names an event type, carries a timestamp in microseconds
//! relative to the timebase, and optionally an argument object. Events do not
//! need to be in timestamp order; the database sorts on ingestion.
//!
//! Binary recordings (`.wtf-trace`) share the MIME constants below but their
//! wire format is parsed elsewhere; this crate only describes the JSON shape.

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MIME type designating binary WTF recordings.
pub const TRACE_MIME_TYPE: &str = "application/x-extension-wtf-trace";

/// MIME type designating JSON event-list recordings.
pub const JSON_MIME_TYPE: &str = "application/x-extension-wtf-json";

/// File extension for binary recordings.
pub const TRACE_EXTENSION: &str = ".wtf-trace";

/// File extension for partial binary recordings still being written.
pub const TRACE_PART_EXTENSION: &str = ".bin.part";

/// File extension for JSON event-list recordings.
pub const JSON_EXTENSION: &str = ".wtf-json";

/// Bits carried in the recording header `flags` field.
pub mod source_flags {
    /// Timestamps were captured with a high-resolution clock.
    pub const HAS_HIGH_RESOLUTION_TIMES: u32 = 1 << 0;
}

/// Returns the recording MIME type for a file name, if recognized.
pub fn mime_type_for_path(path: &str) -> Option<&'static str> {
    if path.ends_with(TRACE_EXTENSION) || path.ends_with(TRACE_PART_EXTENSION) {
        Some(TRACE_MIME_TYPE)
    } else if path.ends_with(JSON_EXTENSION) {
        Some(JSON_MIME_TYPE)
    } else {
        None
    }
}

/// The top-level `.wtf-json` document.
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct TraceDocument {
    /// Human-readable description of the recorded context.
    #[serde(rename = "contextInfo", skip_serializing_if = "Option::is_none")]
    pub context_info: Option<String>,

    /// Bitmask of [`source_flags`] values.
    #[serde(default)]
    #[builder(default)]
    pub flags: u32,

    /// Wall-clock seconds of t=0 in the trace.
    #[serde(default)]
    #[builder(default)]
    pub timebase: f64,

    /// Estimated source-to-local clock skew in seconds.
    #[serde(rename = "timeDelay", default)]
    #[builder(default)]
    pub time_delay: f64,

    /// Free-form metadata attached by the recorder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// The event list. Entries need not be time-sorted.
    #[serde(default)]
    #[builder(default)]
    pub events: Vec<EventEntry>,
}

/// A single entry in the event list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    /// Full event type name, e.g. `wtf.scope#enter`.
    pub event: String,

    /// Occurrence time in microseconds relative to the timebase.
    pub time: u64,

    /// Optional argument object. Keys and value types must match the event
    /// type's signature; unknown keys are preserved as-is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

/// One captured data-stream buffer, as returned by storage snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotBuffer {
    /// MIME type of `data`, one of the constants above.
    pub mime_type: String,
    /// The raw recording bytes.
    pub data: Vec<u8>,
}

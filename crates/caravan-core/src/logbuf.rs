//! Append-only in-memory log buffer with a movable checkpoint.
//!
//! The runner marks the buffer before a feature's lifecycle begins and
//! extracts everything appended since the mark once it completes, so the
//! exact log slice for one feature can be shipped back to the instance as
//! an artifact without tracking line numbers externally.

use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// LogBuffer
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct LogBuffer {
    lines: Vec<String>,
    mark: usize,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Move the checkpoint to the current end of the buffer.
    pub fn mark(&mut self) {
        self.mark = self.lines.len();
    }

    /// All lines appended after the last `mark()` call, or from the start
    /// if never marked. Repeated calls without intervening appends return
    /// the same slice.
    pub fn since_mark(&self) -> &[String] {
        &self.lines[self.mark..]
    }

    /// Empty the buffer and reset the checkpoint to zero.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.mark = 0;
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RunLog
// ---------------------------------------------------------------------------

/// Shared handle to a [`LogBuffer`], cloneable across hook invocations.
///
/// Lines go to the buffer and are mirrored as tracing events, so operators
/// see them live while the buffer accumulates the artifact copy.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    buf: Arc<Mutex<LogBuffer>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{line}");
        self.buf.lock().expect("log buffer poisoned").append(line);
    }

    pub fn warn(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::warn!("{line}");
        self.buf.lock().expect("log buffer poisoned").append(line);
    }

    pub fn mark(&self) {
        self.buf.lock().expect("log buffer poisoned").mark();
    }

    pub fn since_mark(&self) -> Vec<String> {
        self.buf
            .lock()
            .expect("log buffer poisoned")
            .since_mark()
            .to_vec()
    }

    pub fn clear(&self) {
        self.buf.lock().expect("log buffer poisoned").clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

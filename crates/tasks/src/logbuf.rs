//! Bounded per-task log capture.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

/// Per-task log ring capacity. Big enough for container build output, small
/// enough that a runaway job cannot exhaust memory.
pub const TASK_LOG_CAPACITY: usize = 512 * 1024;

/// Append-only byte ring; once full, the oldest bytes fall off the front.
#[derive(Debug)]
pub struct TaskLogBuffer {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl TaskLogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::new(),
            capacity,
        }
    }

    pub fn append(&mut self, data: &[u8]) {
        // A write larger than the whole ring keeps only its tail.
        let data = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };

        let overflow = (self.buf.len() + data.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(data);
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buf.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Shared writer handle to a task's log ring, cloned into the job closure
/// and read by the log endpoint while the task runs.
#[derive(Debug, Clone)]
pub struct TaskLogHandle {
    inner: Arc<Mutex<TaskLogBuffer>>,
}

impl TaskLogHandle {
    pub fn new() -> Self {
        Self::with_capacity(TASK_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TaskLogBuffer::new(capacity))),
        }
    }

    pub fn append(&self, data: &[u8]) {
        self.inner.lock().expect("task log lock poisoned").append(data);
    }

    /// Appends a line of progress output, newline-terminated.
    pub fn append_line(&self, line: &str) {
        let mut guard = self.inner.lock().expect("task log lock poisoned");
        guard.append(line.as_bytes());
        guard.append(b"\n");
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.inner
            .lock()
            .expect("task log lock poisoned")
            .contents()
    }
}

impl Default for TaskLogHandle {
    fn default() -> Self {
        Self::new()
    }
}

//! Scenario log destinations
//!
//! Each context keeps an explicit stack of appenders. Whoever wants to
//! intercept output pushes a wrapper that forwards to the appender below
//! it, and pops it when done.

use std::sync::{Arc, Mutex, PoisonError};

/// Destination for scenario log output
pub trait LogAppender: Send + Sync {
    fn append(&self, text: &str);
}

/// Appender that accumulates output in memory
#[derive(Debug, Default)]
pub struct BufferAppender {
    buffer: Mutex<String>,
}

impl BufferAppender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents, leaving the buffer intact
    pub fn buffer(&self) -> String {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LogAppender for BufferAppender {
    fn append(&self, text: &str) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
    }
}

/// Stack of appenders; output goes to the top entry
pub struct LogStack {
    base: Arc<dyn LogAppender>,
    stack: Mutex<Vec<Arc<dyn LogAppender>>>,
}

impl LogStack {
    pub fn new(base: Arc<dyn LogAppender>) -> Self {
        Self {
            base,
            stack: Mutex::new(Vec::new()),
        }
    }

    /// Appender currently receiving output
    pub fn current(&self) -> Arc<dyn LogAppender> {
        self.lock().last().cloned().unwrap_or_else(|| self.base.clone())
    }

    /// Install an interceptor on top of the stack
    pub fn push(&self, appender: Arc<dyn LogAppender>) {
        self.lock().push(appender);
    }

    /// Remove the most recent interceptor; the base appender stays
    pub fn pop(&self) -> Option<Arc<dyn LogAppender>> {
        self.lock().pop()
    }

    /// Number of interceptors above the base appender
    pub fn depth(&self) -> usize {
        self.lock().len()
    }

    pub fn append(&self, text: &str) {
        self.current().append(text);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn LogAppender>>> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for LogStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStack").field("depth", &self.depth()).finish()
    }
}

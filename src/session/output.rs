//! Bounded buffer of scenario output

use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;

/// One chunk of buffered output
#[derive(Debug, Clone, Serialize)]
pub struct OutputEvent {
    pub category: String,
    pub output: String,
    #[serde(skip)]
    pub timestamp: Instant,
}

/// Output kept for `get_output`, oldest entries dropped first
#[derive(Debug)]
pub struct OutputBuffer {
    events: VecDeque<OutputEvent>,
    max_events: usize,
    max_bytes: usize,
    current_bytes: usize,
}

impl OutputBuffer {
    pub fn new(max_events: usize, max_bytes: usize) -> Self {
        Self {
            events: VecDeque::new(),
            max_events: max_events.max(1),
            max_bytes: max_bytes.max(1),
            current_bytes: 0,
        }
    }

    pub fn push(&mut self, category: &str, output: &str) {
        // Truncate oversized messages on a char boundary
        let output = if output.len() > self.max_bytes {
            tracing::warn!(
                "Output message ({} bytes) exceeds max buffer size ({} bytes), truncating",
                output.len(),
                self.max_bytes
            );
            let mut end = self.max_bytes;
            while !output.is_char_boundary(end) {
                end -= 1;
            }
            output[..end].to_string()
        } else {
            output.to_string()
        };
        let output_bytes = output.len();

        while self.current_bytes + output_bytes > self.max_bytes && self.pop_oldest() {}
        while self.events.len() >= self.max_events && self.pop_oldest() {}

        self.events.push_back(OutputEvent {
            category: category.to_string(),
            output,
            timestamp: Instant::now(),
        });
        self.current_bytes += output_bytes;
    }

    /// Buffered events, or the last `tail` of them
    pub fn get(&mut self, tail: Option<usize>, clear: bool) -> Vec<OutputEvent> {
        let result: Vec<OutputEvent> = match tail {
            Some(n) => self.events.iter().rev().take(n).cloned().rev().collect(),
            None => self.events.iter().cloned().collect(),
        };
        if clear {
            self.events.clear();
            self.current_bytes = 0;
        }
        result
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.current_bytes
    }

    fn pop_oldest(&mut self) -> bool {
        match self.events.pop_front() {
            Some(removed) => {
                self.current_bytes = self.current_bytes.saturating_sub(removed.output.len());
                true
            }
            None => false,
        }
    }
}

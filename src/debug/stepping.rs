//! Step-mode table
//!
//! Maps a stack depth to "stop at every step at this depth". A missing
//! entry means the thread runs freely at that depth. Depths are 1-based
//! stack lengths of the owning controller.

use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct StepModes {
    modes: HashMap<usize, bool>,
}

impl StepModes {
    /// Run freely at every depth
    pub fn clear(&mut self) {
        self.modes.clear();
    }

    /// Step over: stop at the next step seen at `depth`
    pub fn next(&mut self, depth: usize) {
        self.modes.insert(depth, true);
    }

    /// Step out: stop stepping at `depth`, stop at the next step of the caller
    pub fn step_out(&mut self, depth: usize) {
        self.modes.insert(depth, false);
        if depth > 1 {
            self.modes.insert(depth - 1, true);
        }
    }

    /// Whether a step at `depth` must suspend
    pub fn is_active(&self, depth: usize) -> bool {
        self.modes.get(&depth).copied().unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_only_affects_recorded_depth() {
        let mut modes = StepModes::default();
        modes.next(2);
        assert!(modes.is_active(2));
        assert!(!modes.is_active(1));
        assert!(!modes.is_active(3));
    }

    #[test]
    fn test_step_out_moves_to_caller() {
        let mut modes = StepModes::default();
        modes.next(2);
        modes.step_out(2);
        assert!(!modes.is_active(2));
        assert!(modes.is_active(1));
    }

    #[test]
    fn test_step_out_at_top_level_runs_free() {
        let mut modes = StepModes::default();
        modes.next(1);
        modes.step_out(1);
        assert!(!modes.is_active(1));
        assert!(!modes.is_active(0));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut modes = StepModes::default();
        modes.next(1);
        modes.next(3);
        modes.clear();
        modes.clear();
        assert!(modes.is_empty());
        assert!(!modes.is_active(1));
    }
}

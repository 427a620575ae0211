//! Per-thread debug controller
//!
//! A [`DebugThread`] is bound to one native execution thread. The host
//! engine calls it at each instrumentation point through [`RuntimeHook`];
//! when a step must not run yet, the execution thread blocks inside the
//! controller until the debugger client resumes it.
//!
//! Every field touched by both the execution thread and the command side
//! lives in [`ThreadState`] behind one mutex, paired with the `resumed`
//! condition variable. Resuming is a broadcast: every registered controller
//! is woken and re-checks its own `stopped` flag, so only the addressed one
//! proceeds.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use crate::common::{Error, Result};
use crate::engine::{ContextRef, LogAppender, RuntimeHook, Step, StepResult};

use super::handler::{SessionHandler, StopReason, ThreadEventKind};
use super::registry::FrameId;
use super::stepping::StepModes;

/// State shared between the execution thread and the command side
#[derive(Debug, Default)]
struct ThreadState {
    /// Frame ids, innermost last
    stack: Vec<FrameId>,
    step_modes: StepModes,
    step_in: bool,
    step_back: bool,
    paused: bool,
    /// Pause requested by stop-on-entry
    entry: bool,
    /// Permanent: every later suspension point aborts
    interrupted: bool,
    /// Blocked in `suspend` and not yet released by a command
    stopped: bool,
    /// The previous step failed and has not been retried or skipped
    errored: bool,
    /// The debugger client is gone: never suspend again
    detached: bool,
}

/// How a suspended thread was released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resumption {
    /// Released by a command, run the step
    Proceed,
    /// Did not block at all
    Unsuspended,
    /// Rewound one step, the context has been repositioned
    SteppedBack,
    /// Woken without a command, the context has been reset
    Reset,
    /// Interrupted, abort
    Aborted,
}

impl Resumption {
    fn proceeds(self) -> bool {
        matches!(self, Resumption::Proceed | Resumption::Unsuspended)
    }
}

pub struct DebugThread {
    id: i64,
    name: String,
    handler: Arc<dyn SessionHandler>,
    state: Mutex<ThreadState>,
    resumed: Condvar,
    log_prefix: Option<String>,
    me: Weak<DebugThread>,
}

impl DebugThread {
    /// Create a controller for the execution thread `id`
    ///
    /// With `prefix_output`, intercepted log lines are forwarded to the
    /// session as `[name] line`.
    pub fn new(
        id: i64,
        name: impl Into<String>,
        handler: Arc<dyn SessionHandler>,
        prefix_output: bool,
    ) -> Arc<Self> {
        let name = name.into();
        let log_prefix = prefix_output.then(|| format!("[{}] ", name));
        Arc::new_cyclic(|me| Self {
            id,
            name,
            handler,
            state: Mutex::new(ThreadState::default()),
            resumed: Condvar::new(),
            log_prefix,
            me: me.clone(),
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frame ids of the active scenarios, outermost first
    pub fn stack(&self) -> Vec<FrameId> {
        self.lock().stack.clone()
    }

    pub fn depth(&self) -> usize {
        self.lock().stack.len()
    }

    pub fn top_frame(&self) -> Option<FrameId> {
        self.lock().stack.last().copied()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub fn is_interrupted(&self) -> bool {
        self.lock().interrupted
    }

    pub fn is_detached(&self) -> bool {
        self.lock().detached
    }

    /// Context of the innermost active scenario
    pub fn current_context(&self) -> Option<ContextRef> {
        let top = self.top_frame()?;
        self.handler.frames().context(top)
    }

    // === Commands ===

    /// Stop at the next step
    pub fn pause(&self) -> &Self {
        self.lock().paused = true;
        self
    }

    /// Run freely at every depth
    pub fn continue_execution(&self) -> &Self {
        self.lock().step_modes.clear();
        self
    }

    /// Stop at the next step at the current depth
    pub fn step_over(&self) -> &Self {
        let mut state = self.lock();
        let depth = state.stack.len();
        state.step_modes.next(depth);
        self
    }

    /// Stop at the next step of the caller
    pub fn step_out(&self) -> &Self {
        let mut state = self.lock();
        let depth = state.stack.len();
        state.step_modes.step_out(depth);
        self
    }

    /// Stop at the very next step, whatever its depth
    pub fn step_in(&self) -> &Self {
        self.lock().step_in = true;
        self
    }

    /// Rewind one step in the current frame
    ///
    /// Discards the frame's most recent snapshot. Fails without changing
    /// anything when the frame has no snapshot left.
    pub fn step_back(&self) -> Result<&Self> {
        let mut state = self.lock();
        let top = state
            .stack
            .last()
            .copied()
            .ok_or_else(|| Error::invalid_state("step back", "not running a scenario"))?;
        self.handler.frames().pop_snapshot(top)?;
        state.step_back = true;
        Ok(self)
    }

    /// Release this thread and wake every registered controller
    pub fn resume(&self) {
        let context = self.current_context();
        self.handler.before_resume(self.id, context.as_ref());
        self.lock().stopped = false;
        self.resumed.notify_all();
        for thread in self.handler.threads().snapshot() {
            if thread.id != self.id {
                thread.resumed.notify_all();
            }
        }
        tracing::debug!(thread_id = self.id, "Resume broadcast");
    }

    /// Abort this thread's scenarios at their next suspension point
    pub fn interrupt(&self) {
        self.lock().interrupted = true;
        self.resumed.notify_all();
        tracing::info!(thread_id = self.id, "Thread interrupted");
    }

    /// Stop suspending; a thread blocked right now wakes without a command
    pub fn detach(&self) {
        self.lock().detached = true;
        self.resumed.notify_all();
    }

    // === Suspension ===

    /// Report a stop and block until a command releases this thread
    fn suspend(
        &self,
        context: &ContextRef,
        reason: StopReason,
        description: Option<&str>,
        breakpoint_ids: &[u32],
    ) -> Resumption {
        {
            let mut state = self.lock();
            if state.interrupted {
                return Resumption::Aborted;
            }
            if state.detached || !self.handler.is_attached() {
                return Resumption::Unsuspended;
            }
            // Marked before the event goes out so a fast resume is never lost
            state.stopped = true;
        }

        tracing::debug!(thread_id = self.id, %reason, "Suspending");
        if let Err(e) = self
            .handler
            .stop_event(self.id, reason, description, breakpoint_ids)
        {
            tracing::warn!(thread_id = self.id, error = %e, "Stop event failed, detaching thread");
            let mut state = self.lock();
            state.stopped = false;
            state.detached = true;
            return Resumption::Unsuspended;
        }

        let mut state = self.lock();
        while state.stopped && !state.interrupted && !state.detached {
            state = match self.resumed.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => {
                    tracing::warn!(thread_id = self.id, "Wait failed, interrupting thread");
                    let mut guard = poisoned.into_inner();
                    guard.interrupted = true;
                    guard
                }
            };
        }

        if state.interrupted {
            state.stopped = false;
            return Resumption::Aborted;
        }
        let step_back = state.step_back;
        let still_stopped = state.stopped;
        let detached = state.detached;
        let top = state.stack.last().copied();
        state.stopped = false;
        drop(state);

        // A detached thread was released by disconnect, not by a command
        if !detached {
            if let Err(e) = self.handler.continue_event(self.id) {
                tracing::debug!(thread_id = self.id, error = %e, "Continue event not delivered");
            }
        }

        // step_back stays set: the next before_step consumes it
        if step_back {
            let restore = top.and_then(|frame| self.handler.frames().latest_snapshot(frame));
            context.step_back(restore.as_ref());
            return Resumption::SteppedBack;
        }
        if still_stopped {
            context.reset_step();
            return Resumption::Reset;
        }
        Resumption::Proceed
    }

    fn lock(&self) -> MutexGuard<'_, ThreadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_thread_event(&self, kind: ThreadEventKind) {
        if let Err(e) = self.handler.thread_event(self.id, kind) {
            tracing::debug!(thread_id = self.id, error = %e, "Thread event not delivered");
        }
    }
}

impl RuntimeHook for DebugThread {
    fn before_scenario(&self, context: &ContextRef) -> bool {
        let frame_id = self.handler.next_frame_id();
        self.handler.frames().insert(frame_id, context.clone());
        let outermost = context.call_depth() == 0;
        {
            let mut state = self.lock();
            state.stack.push(frame_id);
            if outermost {
                // Leftovers from a scenario that ended on a failed or rewound step
                state.errored = false;
                state.step_back = false;
                state.entry = self.handler.stop_on_entry();
            }
        }
        if outermost {
            if let Some(me) = self.me.upgrade() {
                self.handler.threads().register(me);
            }
            self.send_thread_event(ThreadEventKind::Started);
        }

        let logs = context.log_appenders();
        logs.push(Arc::new(ThreadAppender {
            prefix: self.log_prefix.clone(),
            handler: self.handler.clone(),
            previous: logs.current(),
        }));

        tracing::debug!(thread_id = self.id, frame_id, scenario = context.name(), "Scenario entered");
        true
    }

    fn after_scenario(&self, context: &ContextRef) {
        // Unregister before popping so a registered controller always has a frame
        if context.call_depth() == 0 {
            self.handler.threads().unregister(self.id);
            self.send_thread_event(ThreadEventKind::Exited);
        }
        let frame = self.lock().stack.pop();
        if let Some(frame_id) = frame {
            self.handler.frames().remove(frame_id);
            tracing::debug!(thread_id = self.id, frame_id, scenario = context.name(), "Scenario exited");
        }
        context.log_appenders().pop();
    }

    fn before_step(&self, step: &Step, context: &ContextRef) -> bool {
        let mut state = self.lock();
        if state.interrupted {
            return false;
        }
        if state.paused || state.entry {
            let reason = if state.entry {
                StopReason::Entry
            } else {
                StopReason::Pause
            };
            state.paused = false;
            state.entry = false;
            drop(state);
            return self.suspend(context, reason, None, &[]).proceeds();
        }
        if state.errored {
            state.errored = false;
            let depth = state.stack.len();
            let stepping = state.step_modes.is_active(depth);
            let top = state.stack.last().copied();
            drop(state);
            if stepping {
                context.skip_step();
            } else {
                // The failed step runs again, so its snapshot no longer counts
                if let Some(frame_id) = top {
                    if let Err(e) = self.handler.frames().pop_snapshot(frame_id) {
                        tracing::debug!(
                            thread_id = self.id,
                            frame_id,
                            error = %e,
                            "No snapshot to discard for retried step"
                        );
                    }
                }
                context.retry_step();
            }
            return false;
        }
        if state.step_back {
            state.step_back = false;
            drop(state);
            return self.suspend(context, StopReason::Step, None, &[]).proceeds();
        }
        if state.step_in {
            state.step_in = false;
            drop(state);
            return self.suspend(context, StopReason::Step, None, &[]).proceeds();
        }
        let depth = state.stack.len();
        if state.step_modes.is_active(depth) {
            drop(state);
            return self.suspend(context, StopReason::Step, None, &[]).proceeds();
        }
        drop(state);

        match self
            .handler
            .resolve_breakpoint(step, step.line, context.as_ref())
        {
            Some(breakpoint) => self
                .suspend(context, StopReason::Breakpoint, None, &[breakpoint.id])
                .proceeds(),
            None => true,
        }
    }

    fn after_step(&self, result: &StepResult, context: &ContextRef) {
        let mut rewound = false;
        if let Some(message) = result.error_message() {
            if let Err(e) = self.handler.output(&format!("*** step failed: {}\n", message)) {
                tracing::debug!(thread_id = self.id, error = %e, "Failure notice not delivered");
            }
            match self.suspend(context, StopReason::Exception, Some(message), &[]) {
                Resumption::Proceed => self.lock().errored = true,
                Resumption::SteppedBack => rewound = true,
                _ => {}
            }
        }
        if rewound {
            return;
        }
        if let Some(frame_id) = self.top_frame() {
            self.handler
                .frames()
                .push_snapshot(frame_id, context.variables());
        }
    }
}

impl std::fmt::Debug for DebugThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugThread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("stack", &self.stack())
            .finish()
    }
}

/// Interceptor installed on a context's log stack while it is debugged
///
/// Forwards every chunk to the session, prefixed with the thread name, and
/// to the appender that was current before it.
struct ThreadAppender {
    prefix: Option<String>,
    handler: Arc<dyn SessionHandler>,
    previous: Arc<dyn LogAppender>,
}

impl LogAppender for ThreadAppender {
    fn append(&self, text: &str) {
        let forwarded = match &self.prefix {
            Some(prefix) => prefix_lines(prefix, text),
            None => text.to_string(),
        };
        if let Err(e) = self.handler.output(&forwarded) {
            tracing::trace!(error = %e, "Log output not forwarded");
        }
        self.previous.append(text);
    }
}

fn prefix_lines(prefix: &str, text: &str) -> String {
    let mut out = String::with_capacity(text.len() + prefix.len());
    for line in text.split_inclusive('\n') {
        out.push_str(prefix);
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::testing::{wait_until, RecordingContext, RecordingHandler};
    use crate::debug::BreakpointSpec;
    use crate::engine::ScenarioContext;
    use serde_json::json;
    use std::thread;

    fn step(line: u32) -> Step {
        Step {
            source: "flow.scn".to_string(),
            line,
            index: line as usize - 1,
            text: format!("step {}", line),
        }
    }

    fn setup() -> (Arc<RecordingHandler>, Arc<DebugThread>) {
        let handler = RecordingHandler::new();
        let thread = DebugThread::new(1, "worker-1", handler.clone(), true);
        (handler, thread)
    }

    #[test]
    fn test_free_run_never_suspends() {
        let (handler, thread) = setup();
        let ctx: ContextRef = RecordingContext::top_level("flow");

        assert!(thread.before_scenario(&ctx));
        for line in 1..=5 {
            assert!(thread.before_step(&step(line), &ctx));
            thread.after_step(&StepResult::Passed, &ctx);
        }
        let frame = thread.top_frame().unwrap();
        assert_eq!(handler.frames().snapshot_count(frame), Some(5));
        thread.after_scenario(&ctx);

        assert!(handler.stops().is_empty());
        assert_eq!(handler.events(), vec!["thread 1 started", "thread 1 exited"]);
        assert!(handler.threads().is_empty());
        assert!(handler.frames().is_empty());
    }

    #[test]
    fn test_registration_only_for_outermost_scenario() {
        let (handler, thread) = setup();
        let outer: ContextRef = RecordingContext::top_level("outer");
        let inner: ContextRef = RecordingContext::nested("inner", 1);

        thread.before_scenario(&outer);
        assert_eq!(handler.threads().len(), 1);
        thread.before_scenario(&inner);
        assert_eq!(thread.depth(), 2);
        thread.after_scenario(&inner);
        assert_eq!(handler.threads().len(), 1);
        assert_eq!(thread.depth(), 1);
        thread.after_scenario(&outer);
        assert!(handler.threads().is_empty());
        assert_eq!(thread.depth(), 0);
    }

    #[test]
    fn test_breakpoint_suspends_until_continue() {
        let (handler, thread) = setup();
        handler
            .breakpoints
            .set_breakpoints("flow.scn", &[BreakpointSpec::at(2)]);
        let ctx: ContextRef = RecordingContext::top_level("flow");
        thread.before_scenario(&ctx);
        assert!(thread.before_step(&step(1), &ctx));

        let worker = {
            let thread = thread.clone();
            let ctx = ctx.clone();
            thread::spawn(move || thread.before_step(&step(2), &ctx))
        };
        wait_until(|| thread.is_stopped());
        assert_eq!(handler.stops(), vec!["stopped 1 breakpoint [1]"]);

        thread.continue_execution().resume();
        assert!(worker.join().unwrap());
        assert!(handler.events().contains(&"continued 1".to_string()));
    }

    #[test]
    fn test_failure_then_continue_retries() {
        let (handler, thread) = setup();
        let rc = RecordingContext::top_level("flow");
        let ctx: ContextRef = rc.clone();
        thread.before_scenario(&ctx);
        assert!(thread.before_step(&step(1), &ctx));

        let worker = {
            let thread = thread.clone();
            let ctx = ctx.clone();
            thread::spawn(move || thread.after_step(&StepResult::failed("boom"), &ctx))
        };
        wait_until(|| thread.is_stopped());
        assert_eq!(handler.stops(), vec!["stopped 1 exception boom"]);
        assert!(handler.output_text().contains("*** step failed: boom"));

        thread.continue_execution().resume();
        worker.join().unwrap();

        assert!(!thread.before_step(&step(2), &ctx));
        assert_eq!(rc.controls(), vec!["retry"]);
        // The retried step's snapshot is discarded
        assert_eq!(handler.frames().snapshot_count(thread.top_frame().unwrap()), Some(0));
    }

    #[test]
    fn test_failure_then_next_skips() {
        let (_handler, thread) = setup();
        let rc = RecordingContext::top_level("flow");
        let ctx: ContextRef = rc.clone();
        thread.before_scenario(&ctx);

        let worker = {
            let thread = thread.clone();
            let ctx = ctx.clone();
            thread::spawn(move || thread.after_step(&StepResult::failed("boom"), &ctx))
        };
        wait_until(|| thread.is_stopped());
        thread.step_over().resume();
        worker.join().unwrap();

        assert!(!thread.before_step(&step(2), &ctx));
        assert_eq!(rc.controls(), vec!["skip"]);
    }

    #[test]
    fn test_step_back_rewinds_to_previous_snapshot() {
        let (handler, thread) = setup();
        let rc = RecordingContext::top_level("flow");
        let ctx: ContextRef = rc.clone();
        thread.before_scenario(&ctx);
        for n in 1..=3 {
            assert!(thread.before_step(&step(n), &ctx));
            rc.set_variable("n", json!(n));
            thread.after_step(&StepResult::Passed, &ctx);
        }
        let frame = thread.top_frame().unwrap();
        assert_eq!(handler.frames().snapshot_count(frame), Some(3));

        thread.pause();
        let worker = {
            let thread = thread.clone();
            let ctx = ctx.clone();
            thread::spawn(move || thread.before_step(&step(4), &ctx))
        };
        wait_until(|| thread.is_stopped());
        thread.step_back().unwrap().resume();
        assert!(!worker.join().unwrap());

        assert_eq!(handler.frames().snapshot_count(frame), Some(2));
        assert_eq!(rc.controls(), vec!["back"]);
        assert_eq!(rc.variables().get("n"), Some(&json!(2)));
    }

    #[test]
    fn test_step_back_without_snapshot_is_rejected() {
        let (_handler, thread) = setup();
        let ctx: ContextRef = RecordingContext::top_level("flow");
        thread.before_scenario(&ctx);

        let err = thread.step_back().unwrap_err();
        assert!(matches!(err, Error::StepBackUnavailable { .. }));
        thread.pause();
        // step_back flag was not set: the pause is reported, not a step
        let worker = {
            let thread = thread.clone();
            let ctx = ctx.clone();
            thread::spawn(move || thread.before_step(&step(1), &ctx))
        };
        wait_until(|| thread.is_stopped());
        thread.resume();
        assert!(worker.join().unwrap());
    }

    #[test]
    fn test_interrupt_aborts_blocked_and_later_steps() {
        let (_handler, thread) = setup();
        let ctx: ContextRef = RecordingContext::top_level("flow");
        thread.before_scenario(&ctx);
        thread.pause();

        let worker = {
            let thread = thread.clone();
            let ctx = ctx.clone();
            thread::spawn(move || thread.before_step(&step(1), &ctx))
        };
        wait_until(|| thread.is_stopped());
        thread.interrupt();
        assert!(!worker.join().unwrap());

        for line in 2..5 {
            assert!(!thread.before_step(&step(line), &ctx));
        }
        assert!(thread.is_interrupted());
    }

    #[test]
    fn test_failed_stop_event_detaches() {
        let (handler, thread) = setup();
        handler.fail_events();
        let ctx: ContextRef = RecordingContext::top_level("flow");
        thread.before_scenario(&ctx);
        thread.pause();

        assert!(thread.before_step(&step(1), &ctx));
        assert!(thread.is_detached());
        thread.step_in();
        assert!(thread.before_step(&step(2), &ctx));
    }

    #[test]
    fn test_detach_releases_waiting_thread_with_reset() {
        let (handler, thread) = setup();
        let rc = RecordingContext::top_level("flow");
        let ctx: ContextRef = rc.clone();
        thread.before_scenario(&ctx);
        thread.pause();

        let worker = {
            let thread = thread.clone();
            let ctx = ctx.clone();
            thread::spawn(move || thread.before_step(&step(1), &ctx))
        };
        wait_until(|| thread.is_stopped());
        thread.detach();
        assert!(!worker.join().unwrap());
        assert_eq!(rc.controls(), vec!["reset"]);
        // Released by detach, so no continue is reported
        assert!(!handler.events().iter().any(|e| e.starts_with("continued")));
    }

    #[test]
    fn test_retry_without_snapshot_still_retries() {
        let (handler, thread) = setup();
        let rc = RecordingContext::top_level("flow");
        let ctx: ContextRef = rc.clone();
        thread.before_scenario(&ctx);

        let worker = {
            let thread = thread.clone();
            let ctx = ctx.clone();
            thread::spawn(move || thread.after_step(&StepResult::failed("boom"), &ctx))
        };
        wait_until(|| thread.is_stopped());
        thread.continue_execution().resume();
        worker.join().unwrap();

        let frame = thread.top_frame().unwrap();
        handler.frames().pop_snapshot(frame).unwrap();
        assert!(!thread.before_step(&step(2), &ctx));
        assert_eq!(rc.controls(), vec!["retry"]);
        assert_eq!(handler.frames().snapshot_count(frame), Some(0));
    }

    #[test]
    fn test_repeated_step_back_while_suspended() {
        let (handler, thread) = setup();
        let rc = RecordingContext::top_level("flow");
        let ctx: ContextRef = rc.clone();
        thread.before_scenario(&ctx);
        for n in 1..=3 {
            assert!(thread.before_step(&step(n), &ctx));
            rc.set_variable("n", json!(n));
            thread.after_step(&StepResult::Passed, &ctx);
        }
        let frame = thread.top_frame().unwrap();

        thread.pause();
        let worker = {
            let thread = thread.clone();
            let ctx = ctx.clone();
            thread::spawn(move || thread.before_step(&step(4), &ctx))
        };
        wait_until(|| thread.is_stopped());
        // Two rewinds issued before the thread wakes
        thread.step_back().unwrap().step_back().unwrap().resume();
        assert!(!worker.join().unwrap());
        assert_eq!(handler.frames().snapshot_count(frame), Some(1));
        assert_eq!(rc.controls(), vec!["back"]);
        assert_eq!(rc.variables().get("n"), Some(&json!(1)));

        // The flag outlives the wake and fires once more at the next step
        let worker = {
            let thread = thread.clone();
            let ctx = ctx.clone();
            thread::spawn(move || thread.before_step(&step(3), &ctx))
        };
        wait_until(|| thread.is_stopped());
        assert_eq!(handler.stops().last().map(String::as_str), Some("stopped 1 step"));
        thread.resume();
        assert!(worker.join().unwrap());

        assert!(thread.before_step(&step(4), &ctx));
        assert_eq!(handler.stops().len(), 2);
    }

    #[test]
    fn test_log_output_is_prefixed_and_restored() {
        let (handler, thread) = setup();
        let rc = RecordingContext::top_level("flow");
        let ctx: ContextRef = rc.clone();

        thread.before_scenario(&ctx);
        rc.log_appenders().append("hello\nworld\n");
        thread.after_scenario(&ctx);
        rc.log_appenders().append("after\n");

        assert_eq!(handler.output_text(), "[worker-1] hello\n[worker-1] world\n");
        assert_eq!(rc.log(), "hello\nworld\nafter\n");
    }

    #[test]
    fn test_prefix_lines_keeps_partial_line() {
        assert_eq!(prefix_lines("> ", "a\nb"), "> a\n> b");
        assert_eq!(prefix_lines("> ", ""), "");
    }
}

//! Debug session
//!
//! Owns everything shared between execution threads and the debugger
//! client: breakpoints, the frame and thread registries, queued variable
//! edits and the output buffer. Events leave through an unbounded channel
//! so execution threads never wait on the client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::common::{config::Config, Error, Result};
use crate::dap::{
    Capabilities, ContinuedEventBody, Event, OutputEventBody, Source, StackFrame,
    StoppedEventBody, TerminatedEventBody, Thread, ThreadEventBody, Variable,
};
use crate::debug::{
    Breakpoint, BreakpointSpec, BreakpointStore, DebugThread, FrameId, FrameRegistry,
    SessionHandler, StopReason, ThreadEventKind, ThreadRegistry,
};
use crate::engine::{ContextRef, ScenarioContext, Step, Variables};

use super::output::{OutputBuffer, OutputEvent};

/// Snapshot of one frame's recorded history
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotHistory {
    pub frame_id: FrameId,
    /// Oldest first; the last entry is the frame's current state
    pub snapshots: Vec<Variables>,
}

pub struct DebugSession {
    config: Config,
    events: mpsc::UnboundedSender<Event>,
    attached: AtomicBool,
    breakpoints: BreakpointStore,
    frames: FrameRegistry,
    threads: ThreadRegistry,
    /// Controllers by native thread, alive for the whole session
    controllers: Mutex<HashMap<ThreadId, Arc<DebugThread>>>,
    next_thread_id: AtomicI64,
    next_frame_id: AtomicU64,
    /// Variable edits per thread, applied just before it resumes
    pending_edits: Mutex<HashMap<i64, Vec<(String, Value)>>>,
    output: Mutex<OutputBuffer>,
}

impl DebugSession {
    /// Create a session and the receiving end of its event stream
    pub fn new(config: Config) -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let output = OutputBuffer::new(config.output.max_events, config.max_output_bytes());
        let session = Arc::new(Self {
            config,
            events: tx,
            attached: AtomicBool::new(true),
            breakpoints: BreakpointStore::new(),
            frames: FrameRegistry::new(),
            threads: ThreadRegistry::new(),
            controllers: Mutex::new(HashMap::new()),
            next_thread_id: AtomicI64::new(0),
            next_frame_id: AtomicU64::new(0),
            pending_edits: Mutex::new(HashMap::new()),
            output: Mutex::new(output),
        });
        (session, rx)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_configuration_done_request: false,
            supports_conditional_breakpoints: true,
            supports_hit_conditional_breakpoints: true,
            supports_step_back: true,
            supports_set_variable: true,
            supports_terminate_request: true,
        }
    }

    /// Controller for the calling native thread, created on first use
    pub fn thread_hook(self: &Arc<Self>) -> Arc<DebugThread> {
        let native = std::thread::current();
        let mut controllers = self.controllers.lock().unwrap_or_else(PoisonError::into_inner);
        controllers
            .entry(native.id())
            .or_insert_with(|| {
                let id = self.next_thread_id.fetch_add(1, Ordering::SeqCst) + 1;
                let name = native
                    .name()
                    .map(String::from)
                    .unwrap_or_else(|| format!("thread-{}", id));
                tracing::debug!(thread_id = id, %name, "Controller created");
                let handler: Arc<dyn SessionHandler> = self.clone();
                DebugThread::new(id, name, handler, self.config.output.thread_prefix)
            })
            .clone()
    }

    // === Breakpoints ===

    /// Replace the breakpoints of `source`
    pub fn set_breakpoints(&self, source: &str, specs: &[BreakpointSpec]) -> Vec<crate::dap::Breakpoint> {
        self.breakpoints
            .set_breakpoints(source, specs)
            .iter()
            .map(Breakpoint::to_dap)
            .collect()
    }

    pub fn add_breakpoint(&self, source: &str, spec: BreakpointSpec) -> Breakpoint {
        self.breakpoints.add(source, spec)
    }

    pub fn remove_breakpoint(&self, id: u32) -> Result<Breakpoint> {
        self.breakpoints.remove(id)
    }

    pub fn list_breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints.list()
    }

    // === Execution Control ===

    pub fn continue_thread(&self, thread_id: i64) -> Result<()> {
        self.stopped_thread(thread_id, "continue")?
            .continue_execution()
            .resume();
        Ok(())
    }

    /// Step over
    pub fn next(&self, thread_id: i64) -> Result<()> {
        self.stopped_thread(thread_id, "step over")?
            .step_over()
            .resume();
        Ok(())
    }

    pub fn step_in(&self, thread_id: i64) -> Result<()> {
        self.stopped_thread(thread_id, "step in")?.step_in().resume();
        Ok(())
    }

    pub fn step_out(&self, thread_id: i64) -> Result<()> {
        self.stopped_thread(thread_id, "step out")?
            .step_out()
            .resume();
        Ok(())
    }

    /// Rewind one step; rejected when the frame has no snapshot to discard
    pub fn step_back(&self, thread_id: i64) -> Result<()> {
        self.stopped_thread(thread_id, "step back")?
            .step_back()?
            .resume();
        Ok(())
    }

    pub fn pause(&self, thread_id: i64) -> Result<()> {
        let thread = self.thread(thread_id)?;
        if thread.is_stopped() {
            return Err(Error::invalid_state("pause", "stopped"));
        }
        thread.pause();
        Ok(())
    }

    pub fn interrupt(&self, thread_id: i64) -> Result<()> {
        self.thread(thread_id)?.interrupt();
        Ok(())
    }

    /// Queue a variable edit for a stopped thread
    pub fn set_variable(&self, thread_id: i64, name: &str, value: Value) -> Result<()> {
        self.stopped_thread(thread_id, "set variable")?;
        tracing::debug!(thread_id, name, "Variable edit queued");
        self.lock_edits()
            .entry(thread_id)
            .or_default()
            .push((name.to_string(), value));
        Ok(())
    }

    // === Inspection ===

    /// Threads currently running a top-level scenario
    pub fn threads_view(&self) -> Vec<Thread> {
        self.threads
            .snapshot()
            .iter()
            .map(|t| Thread {
                id: t.id(),
                name: t.name().to_string(),
            })
            .collect()
    }

    /// Ids of the threads currently suspended
    pub fn stopped_threads(&self) -> Vec<i64> {
        self.threads
            .snapshot()
            .iter()
            .filter(|t| t.is_stopped())
            .map(|t| t.id())
            .collect()
    }

    /// Frames of a thread, innermost first
    pub fn stack_trace(&self, thread_id: i64) -> Result<Vec<StackFrame>> {
        let thread = self.thread(thread_id)?;
        let frames = thread
            .stack()
            .into_iter()
            .rev()
            .filter_map(|frame_id| {
                let context = self.frames.context(frame_id)?;
                let step = context.current_step();
                Some(StackFrame {
                    id: frame_id as i64,
                    name: context.name().to_string(),
                    source: step.as_ref().map(|s| Source {
                        name: std::path::Path::new(&s.source)
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned()),
                        path: Some(s.source.clone()),
                    }),
                    line: step.as_ref().map_or(0, |s| s.line),
                    column: 1,
                })
            })
            .collect();
        Ok(frames)
    }

    /// Current variables of a frame: its latest snapshot, else the live bindings
    pub fn variables(&self, frame_id: FrameId) -> Result<Vec<Variable>> {
        let vars = match self.frames.latest_snapshot(frame_id) {
            Some(snapshot) => snapshot,
            None => self
                .frames
                .context(frame_id)
                .ok_or(Error::FrameNotFound(frame_id))?
                .variables(),
        };
        Ok(vars
            .iter()
            .map(|(name, value)| Variable::from_json(name, value))
            .collect())
    }

    pub fn snapshot_history(&self, frame_id: FrameId) -> Result<SnapshotHistory> {
        let snapshots = self
            .frames
            .history(frame_id)
            .ok_or(Error::FrameNotFound(frame_id))?;
        Ok(SnapshotHistory {
            frame_id,
            snapshots,
        })
    }

    pub fn get_output(&self, tail: Option<usize>, clear: bool) -> Vec<OutputEvent> {
        self.lock_output().get(tail, clear)
    }

    // === Lifecycle ===

    pub fn is_detached(&self) -> bool {
        !self.attached.load(Ordering::SeqCst)
    }

    /// Release every thread and stop debugging
    ///
    /// Waiting threads wake without a command and reset their step; no
    /// controller suspends again. Clearing the registries also drops the
    /// controllers' references back to the session.
    pub fn disconnect(&self) {
        if self.attached.swap(false, Ordering::SeqCst) {
            tracing::info!("Debug session disconnected");
            let _ = self
                .events
                .send(Event::Terminated(TerminatedEventBody { restart: false }));
        }
        let controllers: Vec<Arc<DebugThread>> = self
            .controllers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, thread)| thread)
            .collect();
        let registered = self.threads.drain();
        for thread in controllers.iter().chain(registered.iter()) {
            thread.detach();
        }
        self.breakpoints.clear();
        self.lock_edits().clear();
    }

    fn thread(&self, thread_id: i64) -> Result<Arc<DebugThread>> {
        self.threads
            .get(thread_id)
            .ok_or(Error::ThreadNotFound(thread_id))
    }

    fn stopped_thread(&self, thread_id: i64, action: &str) -> Result<Arc<DebugThread>> {
        if self.is_detached() {
            return Err(Error::SessionDetached);
        }
        let thread = self.thread(thread_id)?;
        if !thread.is_stopped() {
            return Err(Error::invalid_state(action, "running"));
        }
        Ok(thread)
    }

    fn send(&self, event: Event) -> Result<()> {
        self.events.send(event).map_err(|_| Error::Disconnected)
    }

    fn lock_edits(&self) -> MutexGuard<'_, HashMap<i64, Vec<(String, Value)>>> {
        self.pending_edits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_output(&self) -> MutexGuard<'_, OutputBuffer> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionHandler for DebugSession {
    fn stop_event(
        &self,
        thread_id: i64,
        reason: StopReason,
        description: Option<&str>,
        breakpoint_ids: &[u32],
    ) -> Result<()> {
        tracing::info!(thread_id, %reason, ?breakpoint_ids, "Thread stopped");
        self.send(Event::Stopped(StoppedEventBody {
            reason: reason.as_str().to_string(),
            description: description.map(String::from),
            thread_id: Some(thread_id),
            all_threads_stopped: self.config.session.all_threads_stopped,
            hit_breakpoint_ids: breakpoint_ids.to_vec(),
            text: None,
        }))
    }

    fn continue_event(&self, thread_id: i64) -> Result<()> {
        self.send(Event::Continued(ContinuedEventBody {
            thread_id,
            all_threads_continued: false,
        }))
    }

    fn thread_event(&self, thread_id: i64, kind: ThreadEventKind) -> Result<()> {
        self.send(Event::Thread(ThreadEventBody {
            reason: kind.as_str().to_string(),
            thread_id,
        }))
    }

    fn output(&self, text: &str) -> Result<()> {
        self.lock_output().push("stdout", text);
        self.send(Event::Output(OutputEventBody {
            category: Some("stdout".to_string()),
            output: text.to_string(),
        }))
    }

    fn resolve_breakpoint(&self, step: &Step, line: u32, context: &dyn ScenarioContext) -> Option<Breakpoint> {
        self.breakpoints.resolve(step, line, context)
    }

    fn next_frame_id(&self) -> FrameId {
        self.next_frame_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn frames(&self) -> &FrameRegistry {
        &self.frames
    }

    fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    /// Apply the edits queued for this thread
    fn before_resume(&self, thread_id: i64, context: Option<&ContextRef>) {
        let edits = self.lock_edits().remove(&thread_id).unwrap_or_default();
        let Some(context) = context else {
            if !edits.is_empty() {
                tracing::warn!(thread_id, "No active frame, dropping variable edits");
            }
            return;
        };
        for (name, value) in edits {
            tracing::debug!(thread_id, %name, "Applying variable edit");
            context.set_variable(&name, value);
        }
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst) && !self.events.is_closed()
    }

    fn stop_on_entry(&self) -> bool {
        self.config.session.stop_on_entry
    }
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("attached", &!self.is_detached())
            .field("threads", &self.threads.len())
            .field("frames", &self.frames.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RuntimeHook;
    use crate::script::{parse_scenario, ScriptContext};

    fn context(body: &str) -> ContextRef {
        let scenario = parse_scenario("flow.scn", body).unwrap();
        ScriptContext::top_level(Arc::new(scenario))
    }

    #[test]
    fn test_thread_hook_is_per_native_thread() {
        let (session, _rx) = DebugSession::new(Config::default());
        let a = session.thread_hook();
        let b = session.thread_hook();
        assert_eq!(a.id(), b.id());

        let other = {
            let session = session.clone();
            std::thread::spawn(move || session.thread_hook().id())
                .join()
                .unwrap()
        };
        assert_ne!(other, a.id());
        session.disconnect();
    }

    #[test]
    fn test_commands_require_stopped_thread() {
        let (session, _rx) = DebugSession::new(Config::default());
        let hook = session.thread_hook();
        let ctx = context("print hi\n");
        hook.before_scenario(&ctx);

        let err = session.continue_thread(hook.id()).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        let err = session.next(42).unwrap_err();
        assert!(matches!(err, Error::ThreadNotFound(42)));
        assert!(session.pause(hook.id()).is_ok());

        hook.after_scenario(&ctx);
        session.disconnect();
    }

    #[test]
    fn test_variables_fall_back_to_live_bindings() {
        let (session, _rx) = DebugSession::new(Config::default());
        let hook = session.thread_hook();
        let ctx = context("set a = 1\n");
        ctx.set_variable("live", serde_json::json!(true));
        hook.before_scenario(&ctx);

        let frame = hook.top_frame().unwrap();
        let vars = session.variables(frame).unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "live");
        assert!(session.snapshot_history(frame).unwrap().snapshots.is_empty());
        assert!(matches!(session.variables(999), Err(Error::FrameNotFound(999))));

        hook.after_scenario(&ctx);
        session.disconnect();
    }

    #[test]
    fn test_events_fail_once_receiver_is_dropped() {
        let (session, rx) = DebugSession::new(Config::default());
        assert!(session.is_attached());
        drop(rx);
        assert!(!session.is_attached());
        assert!(matches!(session.continue_event(1), Err(Error::Disconnected)));
        // Output is still buffered locally
        let _ = session.output("kept\n");
        assert_eq!(session.get_output(None, false)[0].output, "kept\n");
    }

    #[test]
    fn test_disconnect_sends_terminated_once() {
        let (session, mut rx) = DebugSession::new(Config::default());
        session.disconnect();
        session.disconnect();
        assert!(matches!(rx.try_recv(), Ok(Event::Terminated(_))));
        assert!(rx.try_recv().is_err());
        assert!(matches!(session.continue_thread(1), Err(Error::SessionDetached)));
    }
}

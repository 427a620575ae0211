//! Shared harness for the end-to-end debugging tests
//!
//! Runs fixture scenarios on real OS threads against a `DebugSession` and
//! collects the events it emits.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use scenario_debugger::common::config::Config;
use scenario_debugger::dap::{Event, StackFrame, StoppedEventBody};
use scenario_debugger::engine::RuntimeHook;
use scenario_debugger::script::{Runner, ScenarioOutcome};
use scenario_debugger::{DebugSession, Result};
use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver};

const TIMEOUT: Duration = Duration::from_secs(10);

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub struct TestContext {
    pub session: Arc<DebugSession>,
    events: Option<UnboundedReceiver<Event>>,
    /// Every event received so far, in arrival order
    pub seen: Vec<Event>,
    runner: Arc<Runner>,
    execution: Option<JoinHandle<Result<Vec<ScenarioOutcome>>>>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let files: Vec<PathBuf> = [
            "checkout.scn",
            "add_item.scn",
            "flaky.scn",
            "worker.scn",
            "order.scn",
            "finalize.scn",
        ]
        .iter()
        .map(|f| fixture(f))
        .collect();
        let runner = Runner::load(&files).expect("fixtures should load");
        let (session, events) = DebugSession::new(config);
        Self {
            session,
            events: Some(events),
            seen: Vec::new(),
            runner: Arc::new(runner),
            execution: None,
        }
    }

    /// Simulate a client that went away before the run started
    pub fn drop_client(&mut self) {
        self.events = None;
    }

    /// Start running the named scenarios, one thread each
    pub fn start(&mut self, names: &[&str]) {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let runner = self.runner.clone();
        let session = self.session.clone();
        self.execution = Some(std::thread::spawn(move || {
            runner.run_parallel(&names, move || session.thread_hook() as Arc<dyn RuntimeHook>)
        }));
    }

    /// Wait for the next event matching `pred`, keeping everything received
    pub fn wait_for<F>(&mut self, what: &str, pred: F) -> Event
    where
        F: Fn(&Event) -> bool,
    {
        let deadline = Instant::now() + TIMEOUT;
        let events = self.events.as_mut().expect("client was dropped");
        loop {
            match events.try_recv() {
                Ok(event) => {
                    self.seen.push(event.clone());
                    if pred(&event) {
                        return event;
                    }
                }
                Err(TryRecvError::Empty) => {
                    if Instant::now() > deadline {
                        panic!("timed out waiting for {}; seen: {:?}", what, self.seen);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(TryRecvError::Disconnected) => {
                    panic!("event channel closed waiting for {}", what)
                }
            }
        }
    }

    pub fn wait_stopped(&mut self) -> StoppedEventBody {
        match self.wait_for("stopped event", |e| matches!(e, Event::Stopped(_))) {
            Event::Stopped(body) => body,
            _ => unreachable!(),
        }
    }

    pub fn wait_exited(&mut self, thread_id: i64) {
        self.wait_for("thread exit", |e| {
            matches!(e, Event::Thread(body) if body.thread_id == thread_id && body.reason == "exited")
        });
    }

    /// Innermost frame of a stopped thread
    pub fn top_frame(&self, thread_id: i64) -> StackFrame {
        self.session
            .stack_trace(thread_id)
            .expect("thread should be registered")
            .into_iter()
            .next()
            .expect("thread should have a frame")
    }

    /// Wait for every scenario thread and drain the remaining events
    pub fn finish(&mut self) -> Vec<ScenarioOutcome> {
        let handle = self.execution.take().expect("run was not started");
        let deadline = Instant::now() + TIMEOUT;
        while !handle.is_finished() {
            if Instant::now() > deadline {
                panic!("scenarios did not finish; seen: {:?}", self.seen);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let outcomes = handle
            .join()
            .expect("runner thread panicked")
            .expect("run should succeed");
        if let Some(events) = self.events.as_mut() {
            while let Ok(event) = events.try_recv() {
                self.seen.push(event);
            }
        }
        outcomes
    }

    pub fn stops(&self) -> Vec<&StoppedEventBody> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                Event::Stopped(body) => Some(body),
                _ => None,
            })
            .collect()
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        // Release anything still suspended so a failed assertion never hangs
        self.session.disconnect();
    }
}

//! Line-oriented scenario engine
//!
//! Parses `.scn` files and runs them on OS threads, calling a
//! [`RuntimeHook`](crate::engine::RuntimeHook) at every step.

mod context;
mod parser;
mod runner;

pub use context::{Control, ScriptContext};
pub use parser::{load_file, parse_scenario, Action, Scenario, ScriptStep};
pub use runner::{Runner, ScenarioOutcome, StepFailure};

//! Breakpoint store
//!
//! Breakpoints are grouped by source. Setting breakpoints for a source
//! replaces that source's whole set, as DAP `setBreakpoints` does. Ids are
//! never reused within a session.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::dap;
use crate::engine::{ScenarioContext, Step};

/// Requested breakpoint within a source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointSpec {
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Stop on the Nth hit and every hit after it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_count: Option<u32>,
}

impl BreakpointSpec {
    pub fn at(line: u32) -> Self {
        Self {
            line,
            ..Self::default()
        }
    }
}

/// Installed breakpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: u32,
    pub source: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_count: Option<u32>,
}

impl Breakpoint {
    /// Protocol view of this breakpoint
    pub fn to_dap(&self) -> dap::Breakpoint {
        let name = Path::new(&self.source)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        dap::Breakpoint {
            id: Some(self.id),
            verified: true,
            message: None,
            source: Some(dap::Source {
                name,
                path: Some(self.source.clone()),
            }),
            line: Some(self.line),
        }
    }
}

struct Entry {
    breakpoint: Breakpoint,
    hits: AtomicU32,
}

#[derive(Default)]
pub struct BreakpointStore {
    next_id: AtomicU32,
    by_source: Mutex<BTreeMap<String, Vec<Arc<Entry>>>>,
}

impl BreakpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every breakpoint of `source` with `specs`
    pub fn set_breakpoints(&self, source: &str, specs: &[BreakpointSpec]) -> Vec<Breakpoint> {
        let entries: Vec<Arc<Entry>> = specs
            .iter()
            .map(|spec| {
                Arc::new(Entry {
                    breakpoint: Breakpoint {
                        id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                        source: source.to_string(),
                        line: spec.line,
                        condition: spec.condition.clone(),
                        hit_count: spec.hit_count,
                    },
                    hits: AtomicU32::new(0),
                })
            })
            .collect();
        let installed = entries.iter().map(|e| e.breakpoint.clone()).collect();

        let mut by_source = self.lock();
        if entries.is_empty() {
            by_source.remove(source);
        } else {
            by_source.insert(source.to_string(), entries);
        }
        tracing::debug!(source, count = specs.len(), "Breakpoints replaced");
        installed
    }

    /// Add one breakpoint, keeping the others of its source
    pub fn add(&self, source: &str, spec: BreakpointSpec) -> Breakpoint {
        let entry = Arc::new(Entry {
            breakpoint: Breakpoint {
                id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                source: source.to_string(),
                line: spec.line,
                condition: spec.condition,
                hit_count: spec.hit_count,
            },
            hits: AtomicU32::new(0),
        });
        let breakpoint = entry.breakpoint.clone();
        self.lock().entry(source.to_string()).or_default().push(entry);
        breakpoint
    }

    pub fn remove(&self, id: u32) -> Result<Breakpoint> {
        let mut by_source = self.lock();
        let mut removed = None;
        for entries in by_source.values_mut() {
            if let Some(pos) = entries.iter().position(|e| e.breakpoint.id == id) {
                removed = Some(entries.remove(pos).breakpoint.clone());
                break;
            }
        }
        by_source.retain(|_, entries| !entries.is_empty());
        removed.ok_or(Error::BreakpointNotFound { id })
    }

    /// All breakpoints, ordered by source then insertion
    pub fn list(&self) -> Vec<Breakpoint> {
        self.lock()
            .values()
            .flat_map(|entries| entries.iter().map(|e| e.breakpoint.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Breakpoint that should stop `step`, if any
    ///
    /// Counts a hit for every breakpoint at the location whose condition
    /// holds, then reports the first one whose hit count has been reached.
    pub fn resolve(&self, step: &Step, line: u32, context: &dyn ScenarioContext) -> Option<Breakpoint> {
        let candidates: Vec<Arc<Entry>> = {
            let by_source = self.lock();
            by_source
                .iter()
                .filter(|(source, _)| source_matches(source, &step.source))
                .flat_map(|(_, entries)| entries.iter().filter(|e| e.breakpoint.line == line).cloned())
                .collect()
        };

        // Conditions are evaluated outside the store lock
        let mut matched = None;
        for entry in candidates {
            if let Some(condition) = &entry.breakpoint.condition {
                match context.evaluate(condition) {
                    Ok(value) if is_truthy(&value) => {}
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(id = entry.breakpoint.id, condition, error = %e, "Breakpoint condition failed");
                        continue;
                    }
                }
            }
            let hits = entry.hits.fetch_add(1, Ordering::SeqCst) + 1;
            let reached = entry.breakpoint.hit_count.map_or(true, |n| hits >= n);
            if reached && matched.is_none() {
                matched = Some(entry.breakpoint.clone());
            }
        }
        matched
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<Arc<Entry>>>> {
        self.by_source.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Breakpoint sources may be given relative to the step's source path
fn source_matches(breakpoint_source: &str, step_source: &str) -> bool {
    breakpoint_source == step_source || Path::new(step_source).ends_with(breakpoint_source)
}

pub(crate) fn is_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

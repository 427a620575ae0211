//! Scenario file parser
//!
//! One scenario per file, named after the file stem. Each non-blank line
//! that is not a `#` comment is a step:
//!
//! ```text
//! set user = {"name": "alice"}
//! assert user == {"name": "alice"}
//! print hello ${user}
//! call login
//! fail not implemented yet
//! ```

use std::path::Path;

use serde_json::Value;

use crate::common::{Error, Result};
use crate::engine::Step;

/// What a step does when executed
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Set { name: String, value: Value },
    Assert { name: String, expected: Value },
    Print(String),
    Call(String),
    Fail(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptStep {
    pub step: Step,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub source: String,
    pub steps: Vec<ScriptStep>,
}

/// Read and parse a scenario file
pub fn load_file(path: &Path) -> Result<Scenario> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    parse_scenario(&path.display().to_string(), &content)
}

/// Parse scenario text read from `path`
pub fn parse_scenario(path: &str, content: &str) -> Result<Scenario> {
    let name = Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::script_parse(path, 0, "cannot derive a scenario name"))?;

    let mut steps = Vec::new();
    for (i, raw) in content.lines().enumerate() {
        let line = (i + 1) as u32;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let action = parse_action(text).map_err(|message| Error::script_parse(path, line, message))?;
        steps.push(ScriptStep {
            step: Step {
                source: path.to_string(),
                line,
                index: steps.len(),
                text: text.to_string(),
            },
            action,
        });
    }

    Ok(Scenario {
        name,
        source: path.to_string(),
        steps,
    })
}

fn parse_action(text: &str) -> std::result::Result<Action, String> {
    let (keyword, rest) = match text.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (text, ""),
    };

    match keyword {
        "set" => {
            let (name, value) = rest
                .split_once('=')
                .ok_or("expected 'set <name> = <json>'")?;
            Ok(Action::Set {
                name: identifier(name)?,
                value: json_value(value)?,
            })
        }
        "assert" => {
            let (name, expected) = rest
                .split_once("==")
                .ok_or("expected 'assert <name> == <json>'")?;
            Ok(Action::Assert {
                name: identifier(name)?,
                expected: json_value(expected)?,
            })
        }
        "print" => Ok(Action::Print(rest.to_string())),
        "call" => Ok(Action::Call(identifier(rest).map_err(|_| "expected 'call <scenario>'")?)),
        "fail" => Ok(Action::Fail(if rest.is_empty() {
            "failed".to_string()
        } else {
            rest.to_string()
        })),
        other => Err(format!("unknown step '{}'", other)),
    }
}

fn identifier(s: &str) -> std::result::Result<String, String> {
    let s = s.trim();
    let valid = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(s.to_string())
    } else {
        Err(format!("invalid name '{}'", s))
    }
}

pub(crate) fn json_value(s: &str) -> std::result::Result<Value, String> {
    let s = s.trim();
    serde_json::from_str(s).map_err(|e| format!("invalid JSON '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_steps_with_lines() {
        let scenario = parse_scenario(
            "flows/checkout.scn",
            "# checkout flow\n\nset cart = [1, 2]\nassert cart == [1,2]\n  print total ${cart}\ncall pay\nfail\n",
        )
        .unwrap();

        assert_eq!(scenario.name, "checkout");
        assert_eq!(scenario.steps.len(), 5);
        assert_eq!(scenario.steps[0].step.line, 3);
        assert_eq!(scenario.steps[0].step.index, 0);
        assert_eq!(
            scenario.steps[0].action,
            Action::Set {
                name: "cart".to_string(),
                value: json!([1, 2])
            }
        );
        assert_eq!(scenario.steps[2].action, Action::Print("total ${cart}".to_string()));
        assert_eq!(scenario.steps[3].action, Action::Call("pay".to_string()));
        assert_eq!(scenario.steps[4].action, Action::Fail("failed".to_string()));
        assert_eq!(scenario.steps[4].step.line, 7);
    }

    #[test]
    fn test_parse_errors_carry_location() {
        let err = parse_scenario("a.scn", "set x = 1\nset y = {oops\n").unwrap_err();
        match err {
            Error::ScriptParse { path, line, .. } => {
                assert_eq!(path, "a.scn");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(parse_scenario("a.scn", "jump 3\n").is_err());
        assert!(parse_scenario("a.scn", "assert x = 1\n").is_err());
        assert!(parse_scenario("a.scn", "call\n").is_err());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("greet.scn");
        std::fs::write(&path, "print hi\n").unwrap();

        let scenario = load_file(&path).unwrap();
        assert_eq!(scenario.name, "greet");
        assert_eq!(scenario.steps[0].step.source, path.display().to_string());

        let missing = load_file(&dir.path().join("missing.scn")).unwrap_err();
        assert!(matches!(missing, Error::FileRead { .. }));
    }
}

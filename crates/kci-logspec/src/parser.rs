//! The state/transition graph and the loop that executes it: a registry
//! of named state and transition functions is populated once at startup,
//! a `ParserDefs` document (loaded from YAML) names which functions wire
//! up into which graph, and `parse_log` walks that graph over a log's
//! text.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::LogspecError;

/// Engine version. `ParserDefs::version`'s middle (minor) component must
/// match this crate's, enforced as a parser-definition compatibility check.
pub const VERSION: (u32, u32, u32) = (1, 0, 0);

/// What a state function produces after examining the remaining text.
pub struct StateOutput {
    /// Key/value pairs merged into the running data accumulator.
    pub data: Map<String, Value>,
    /// How many bytes of `text` this state consumed; `None` leaves the
    /// cursor where it was (the state only inspected, didn't consume).
    pub match_end: Option<usize>,
    /// Any errors extracted while processing this state.
    pub errors: Vec<Arc<dyn LogspecError + Send + Sync>>,
}

impl StateOutput {
    pub fn empty() -> Self {
        Self {
            data: Map::new(),
            match_end: None,
            errors: Vec::new(),
        }
    }
}

/// A named state function: examines the remaining log text plus data
/// accumulated so far, returns updates, a cursor advance and any errors.
pub trait StateFn: Send + Sync {
    fn run(&self, text: &str, data: &Map<String, Value>) -> StateOutput;
}

impl<F> StateFn for F
where
    F: Fn(&str, &Map<String, Value>) -> StateOutput + Send + Sync,
{
    fn run(&self, text: &str, data: &Map<String, Value>) -> StateOutput {
        self(text, data)
    }
}

/// A named transition predicate: decides, from the remaining text and
/// accumulated data, whether to move to its target state.
pub trait TransitionFn: Send + Sync {
    fn matches(&self, text: &str, data: &Map<String, Value>) -> bool;
}

impl<F> TransitionFn for F
where
    F: Fn(&str, &Map<String, Value>) -> bool + Send + Sync,
{
    fn matches(&self, text: &str, data: &Map<String, Value>) -> bool {
        self(text, data)
    }
}

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("failed to parse parser definitions: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(
        "incompatible parser definition version {found} (engine is {engine})"
    )]
    VersionMismatch { found: String, engine: String },
    #[error("unknown parser: {0}")]
    UnknownParser(String),
    #[error("state {0:?} references unknown state function {1:?}")]
    UnknownStateFn(String, String),
    #[error("transition in state {0:?} references unknown transition function {1:?}")]
    UnknownTransitionFn(String, String),
    #[error("state {0:?} references unknown target state {1:?}")]
    UnknownTargetState(String, String),
}

/// One YAML-declared transition: a named predicate and its target state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionDef {
    pub function: String,
    pub state: String,
}

/// One YAML-declared state: an optional named state function plus its
/// ordered transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDef {
    pub name: String,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,
}

/// One named parser graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserDef {
    pub start_state: String,
    pub states: Vec<StateDef>,
}

/// The full parser-definitions document, as loaded from
/// `parser_defs.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserDefs {
    pub version: String,
    pub parsers: HashMap<String, ParserDef>,
}

impl ParserDefs {
    pub fn from_yaml_str(s: &str) -> Result<Self, ParserError> {
        Ok(serde_yaml::from_str(s)?)
    }

    fn check_version(&self) -> Result<(), ParserError> {
        let parts: Vec<&str> = self.version.split('.').collect();
        let minor: Option<u32> = parts.get(1).and_then(|p| p.parse().ok());
        if minor != Some(VERSION.1) {
            return Err(ParserError::VersionMismatch {
                found: self.version.clone(),
                engine: format!("{}.{}.{}", VERSION.0, VERSION.1, VERSION.2),
            });
        }
        Ok(())
    }
}

/// A compiled state: its function (if any) and its ordered transitions,
/// targets resolved by name against the owning `Graph`.
pub struct CompiledState {
    pub name: String,
    run: Option<Arc<dyn StateFn>>,
    transitions: Vec<(Arc<dyn TransitionFn>, String)>,
}

/// A compiled, ready-to-run parser graph.
pub struct Graph {
    pub name: String,
    pub start_state: String,
    states: HashMap<String, Arc<CompiledState>>,
}

/// Registry of named state/transition function implementations,
/// populated once at process start (the Rust analogue of
/// `register_state`/`register_transition_function` populating a
/// module-level dict at import time).
#[derive(Default)]
pub struct Registry {
    states: HashMap<String, Arc<dyn StateFn>>,
    transitions: HashMap<String, Arc<dyn TransitionFn>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_state(&mut self, name: impl Into<String>, f: impl StateFn + 'static) {
        self.states.insert(name.into(), Arc::new(f));
    }

    pub fn register_transition(&mut self, name: impl Into<String>, f: impl TransitionFn + 'static) {
        self.transitions.insert(name.into(), Arc::new(f));
    }

    /// Assemble the named parser from `defs` into a runnable `Graph`.
    pub fn build(&self, defs: &ParserDefs, parser_name: &str) -> Result<Graph, ParserError> {
        defs.check_version()?;
        let def = defs
            .parsers
            .get(parser_name)
            .ok_or_else(|| ParserError::UnknownParser(parser_name.to_string()))?;

        let mut states = HashMap::new();
        for state_def in &def.states {
            let run = match &state_def.function {
                Some(name) => Some(
                    self.states
                        .get(name)
                        .cloned()
                        .ok_or_else(|| {
                            ParserError::UnknownStateFn(state_def.name.clone(), name.clone())
                        })?,
                ),
                None => None,
            };
            let mut transitions = Vec::new();
            for t in &state_def.transitions {
                let predicate = self.transitions.get(&t.function).cloned().ok_or_else(|| {
                    ParserError::UnknownTransitionFn(state_def.name.clone(), t.function.clone())
                })?;
                transitions.push((predicate, t.state.clone()));
            }
            states.insert(
                state_def.name.clone(),
                Arc::new(CompiledState {
                    name: state_def.name.clone(),
                    run,
                    transitions,
                }),
            );
        }

        // Validate every transition target exists up front rather than
        // failing mid-parse.
        for state in states.values() {
            for (_, target) in &state.transitions {
                if !states.contains_key(target) && target != "stop" {
                    return Err(ParserError::UnknownTargetState(
                        state.name.clone(),
                        target.clone(),
                    ));
                }
            }
        }

        Ok(Graph {
            name: parser_name.to_string(),
            start_state: def.start_state.clone(),
            states,
        })
    }
}

/// Result of running a parser graph over a log's text.
pub struct ParseResult {
    pub data: Map<String, Value>,
    pub errors: Vec<Arc<dyn LogspecError + Send + Sync>>,
}

/// Walk `graph` over `text` from its start state until no transition
/// fires or the sentinel `"stop"` target is reached.
///
/// Each iteration: run the current state's function (if any) against the
/// remaining text, merge its data into the accumulator, advance the
/// cursor by `match_end`, then evaluate transitions in order — the first
/// whose predicate returns true selects the next state.
pub fn parse_log(graph: &Graph, text: &str) -> ParseResult {
    let mut data = Map::new();
    let mut errors = Vec::new();
    let mut cursor = 0usize;
    let mut current = graph.start_state.clone();

    loop {
        let Some(state) = graph.states.get(&current) else {
            break;
        };
        let remaining = &text[cursor.min(text.len())..];

        if let Some(run) = &state.run {
            let output = run.run(remaining, &data);
            data.extend(output.data);
            errors.extend(output.errors);
            if let Some(advance) = output.match_end {
                cursor = (cursor + advance).min(text.len());
            }
        }

        let remaining = &text[cursor.min(text.len())..];
        let next = state
            .transitions
            .iter()
            .find(|(predicate, _)| predicate.matches(remaining, &data))
            .map(|(_, target)| target.clone());

        match next {
            Some(target) if target == "stop" => break,
            Some(target) => current = target,
            None => break,
        }
    }

    ParseResult { data, errors }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_defs() -> ParserDefs {
        ParserDefs::from_yaml_str(
            r#"
version: "1.0.0"
parsers:
  demo:
    start_state: start
    states:
      - name: start
        function: count_lines
        transitions:
          - function: always
            state: stop
"#,
        )
        .unwrap()
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let defs = ParserDefs::from_yaml_str("version: \"2.0.0\"\nparsers: {}\n").unwrap();
        let registry = Registry::new();
        let err = registry.build(&defs, "demo").unwrap_err();
        assert!(matches!(err, ParserError::VersionMismatch { .. }));
    }

    #[test]
    fn unknown_parser_is_rejected() {
        let defs = simple_defs();
        let registry = Registry::new();
        let err = registry.build(&defs, "missing").unwrap_err();
        assert!(matches!(err, ParserError::UnknownParser(_)));
    }

    #[test]
    fn simple_graph_runs_to_completion() {
        let defs = simple_defs();
        let mut registry = Registry::new();
        registry.register_state("count_lines", |text: &str, _data: &Map<String, Value>| {
            let mut data = Map::new();
            data.insert("lines".to_string(), Value::from(text.lines().count()));
            StateOutput {
                data,
                match_end: Some(text.len()),
                errors: Vec::new(),
            }
        });
        registry.register_transition("always", |_: &str, _: &Map<String, Value>| true);

        let graph = registry.build(&defs, "demo").unwrap();
        let result = parse_log(&graph, "a\nb\nc\n");
        assert_eq!(result.data.get("lines").unwrap(), &Value::from(4));
        assert!(result.errors.is_empty());
    }
}

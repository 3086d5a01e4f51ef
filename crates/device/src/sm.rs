// SPDX-License-Identifier: PolyForm-Shield-1.0

//! State-machine core: a graph of named shell states, command-backed
//! transition edges, and precomputed next-hop routing.
//!
//! The machine is immutable once built. Construction validates the whole
//! configuration: connectivity both ways between `NOT_CONNECTED` and every
//! state, hop-table termination, prompt consistency across edges landing in
//! the same state, and that every execute-command edge carries a command.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::families::NOT_CONNECTED;
use crate::DeviceError;

pub type ParamMap = serde_json::Map<String, serde_json::Value>;
pub type TransitionTable = BTreeMap<String, BTreeMap<String, TransitionAction>>;
pub type HopSpecTable = BTreeMap<String, BTreeMap<String, HopSpec>>;
pub type StateHopsTable = BTreeMap<String, BTreeMap<String, String>>;

/// What a transition edge does when taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    OpenConnection,
    CloseConnection,
    ExecuteCommand,
}

/// Command selector for execute-command edges. A tagged variant set instead
/// of name-based reflection: each tag maps to one constructor in
/// [`crate::commands`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Ssh,
    Su,
    Exit,
    AdbShell,
}

/// Per-edge command configuration: which command runs the transition, the
/// default parameters, and which parameters callers must supply before the
/// edge may be taken.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HopSpec {
    #[serde(default)]
    pub execute_command: Option<CommandKind>,
    #[serde(default)]
    pub command_params: ParamMap,
    #[serde(default)]
    pub required_command_params: Vec<String>,
}

impl HopSpec {
    pub fn command(kind: CommandKind) -> Self {
        Self {
            execute_command: Some(kind),
            ..Self::default()
        }
    }

    pub fn param(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.command_params.insert(name.to_string(), value.into());
        self
    }

    pub fn require(mut self, names: &[&str]) -> Self {
        self.required_command_params
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn expected_prompt(&self) -> Option<&str> {
        self.command_params
            .get("expected_prompt")
            .and_then(serde_json::Value::as_str)
    }

    pub fn target_newline(&self) -> Option<&str> {
        self.command_params
            .get("target_newline")
            .and_then(serde_json::Value::as_str)
    }
}

/// Raw merged configuration a state machine is built from.
#[derive(Debug, Clone, Default)]
pub struct SmConfig {
    pub transitions: TransitionTable,
    pub connection_hops: HopSpecTable,
    pub state_hops: StateHopsTable,
}

#[derive(Debug)]
pub struct StateMachine {
    config: SmConfig,
    states: BTreeSet<String>,
    state_prompts: BTreeMap<String, String>,
    newline_chars: BTreeMap<String, String>,
}

impl StateMachine {
    pub fn new(config: SmConfig) -> Result<Self, DeviceError> {
        let mut states = BTreeSet::new();
        states.insert(NOT_CONNECTED.to_string());
        for (from, edges) in &config.transitions {
            states.insert(from.clone());
            for to in edges.keys() {
                states.insert(to.clone());
            }
        }

        let (state_prompts, newline_chars) = derive_state_metadata(&config, &states)?;

        let machine = Self {
            config,
            states,
            state_prompts,
            newline_chars,
        };
        machine.validate_edges()?;
        machine.validate_connectivity()?;
        machine.validate_hops()?;
        Ok(machine)
    }

    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.states.iter().map(String::as_str)
    }

    pub fn contains_state(&self, state: &str) -> bool {
        self.states.contains(state)
    }

    /// The edge's action, when a direct edge `from → to` exists.
    pub fn action(&self, from: &str, to: &str) -> Result<TransitionAction, DeviceError> {
        self.config
            .transitions
            .get(from)
            .and_then(|edges| edges.get(to))
            .copied()
            .ok_or_else(|| DeviceError::NoHop {
                from: from.to_string(),
                target: to.to_string(),
            })
    }

    /// The command configuration of a direct execute-command edge.
    pub fn hop_spec(&self, from: &str, to: &str) -> Result<&HopSpec, DeviceError> {
        self.config
            .connection_hops
            .get(from)
            .and_then(|edges| edges.get(to))
            .ok_or_else(|| {
                DeviceError::Config(format!(
                    "transition {from} -> {to} has no command configuration"
                ))
            })
    }

    /// The next state on the way from `current` to `target`: the direct
    /// edge when one exists, otherwise the precomputed hop.
    pub fn next_hop(&self, current: &str, target: &str) -> Result<String, DeviceError> {
        if self
            .config
            .transitions
            .get(current)
            .is_some_and(|edges| edges.contains_key(target))
        {
            return Ok(target.to_string());
        }
        self.config
            .state_hops
            .get(current)
            .and_then(|hops| hops.get(target))
            .cloned()
            .ok_or_else(|| DeviceError::NoHop {
                from: current.to_string(),
                target: target.to_string(),
            })
    }

    /// Textual prompt identifying `state`, when one is configured.
    pub fn prompt_for(&self, state: &str) -> Option<&str> {
        self.state_prompts.get(state).map(String::as_str)
    }

    /// Newline sequence to use when sending while in `state`.
    pub fn newline_for(&self, state: &str) -> &str {
        self.newline_chars
            .get(state)
            .map(String::as_str)
            .unwrap_or("\n")
    }

    fn validate_edges(&self) -> Result<(), DeviceError> {
        for (from, edges) in &self.config.transitions {
            for (to, action) in edges {
                if *action == TransitionAction::ExecuteCommand {
                    let spec = self.hop_spec(from, to)?;
                    if spec.execute_command.is_none() {
                        return Err(DeviceError::Config(format!(
                            "transition {from} -> {to} names no command to execute"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_connectivity(&self) -> Result<(), DeviceError> {
        let forward = self.reachable_from(NOT_CONNECTED, false);
        let backward = self.reachable_from(NOT_CONNECTED, true);
        for state in &self.states {
            if !forward.contains(state) {
                return Err(DeviceError::Config(format!(
                    "state '{state}' is not reachable from {NOT_CONNECTED}"
                )));
            }
            if !backward.contains(state) {
                return Err(DeviceError::Config(format!(
                    "state '{state}' cannot reach {NOT_CONNECTED}"
                )));
            }
        }
        Ok(())
    }

    fn reachable_from(&self, start: &str, reversed: bool) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        seen.insert(start.to_string());
        queue.push_back(start.to_string());
        while let Some(state) = queue.pop_front() {
            for (from, edges) in &self.config.transitions {
                for to in edges.keys() {
                    let (src, dst) = if reversed { (to, from) } else { (from, to) };
                    if src == &state && seen.insert(dst.clone()) {
                        queue.push_back(dst.clone());
                    }
                }
            }
        }
        seen
    }

    /// Following `next_hop` from any state to any other declared state must
    /// terminate without revisiting the origin. Hop entries pointing at
    /// states the machine does not declare are tolerated (layered tables
    /// keep them for uniformity) but their next-hop must still be a real
    /// neighbor.
    fn validate_hops(&self) -> Result<(), DeviceError> {
        for (from, hops) in &self.config.state_hops {
            for (target, next) in hops {
                if !self
                    .config
                    .transitions
                    .get(from)
                    .is_some_and(|edges| edges.contains_key(next))
                {
                    return Err(DeviceError::Config(format!(
                        "hop {from} -> {target} routes via '{next}' which is not a neighbor of {from}"
                    )));
                }
            }
        }

        for from in &self.states {
            for target in &self.states {
                if from == target {
                    continue;
                }
                let mut current = from.clone();
                let mut steps = 0usize;
                while &current != target {
                    let next = match self.next_hop(&current, target) {
                        Ok(next) => next,
                        // Pairs with no route at all are legal; goto_state
                        // reports them when actually requested. A route that
                        // starts but cannot finish is a table bug.
                        Err(DeviceError::NoHop { .. }) if steps == 0 => break,
                        Err(DeviceError::NoHop { .. }) => {
                            return Err(DeviceError::Config(format!(
                                "route from '{from}' to '{target}' dead-ends at '{current}'"
                            )));
                        }
                        Err(e) => return Err(e),
                    };
                    if &next == from {
                        return Err(DeviceError::Config(format!(
                            "hop table from '{from}' to '{target}' revisits '{from}'"
                        )));
                    }
                    steps += 1;
                    if steps > self.states.len() {
                        return Err(DeviceError::Config(format!(
                            "hop table from '{from}' to '{target}' does not terminate"
                        )));
                    }
                    current = next;
                }
            }
        }
        Ok(())
    }
}

fn derive_state_metadata(
    config: &SmConfig,
    states: &BTreeSet<String>,
) -> Result<(BTreeMap<String, String>, BTreeMap<String, String>), DeviceError> {
    let mut prompts: BTreeMap<String, String> = BTreeMap::new();
    let mut newlines: BTreeMap<String, String> = BTreeMap::new();
    for (from, edges) in &config.connection_hops {
        for (to, spec) in edges {
            if !states.contains(to) {
                continue;
            }
            if let Some(prompt) = spec.expected_prompt() {
                match prompts.get(to) {
                    Some(existing) if existing != prompt => {
                        return Err(DeviceError::Config(format!(
                            "inconsistent prompts for state '{to}': edge {from} -> {to} expects '{prompt}' but another edge expects '{existing}'"
                        )));
                    }
                    _ => {
                        prompts.insert(to.clone(), prompt.to_string());
                    }
                }
            }
            if let Some(newline) = spec.target_newline() {
                newlines.insert(to.clone(), newline.to_string());
            }
        }
    }
    Ok((prompts, newlines))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge() -> HopSpec {
        HopSpec::command(CommandKind::Ssh).param("expected_prompt", "p$")
    }

    fn linear_machine() -> SmConfig {
        let mut config = SmConfig::default();
        for (from, to, action) in [
            (NOT_CONNECTED, "A", TransitionAction::OpenConnection),
            ("A", NOT_CONNECTED, TransitionAction::CloseConnection),
            ("A", "B", TransitionAction::ExecuteCommand),
            ("B", "A", TransitionAction::ExecuteCommand),
            ("B", "C", TransitionAction::ExecuteCommand),
            ("C", "B", TransitionAction::ExecuteCommand),
        ] {
            config
                .transitions
                .entry(from.to_string())
                .or_default()
                .insert(to.to_string(), action);
            if action == TransitionAction::ExecuteCommand {
                config
                    .connection_hops
                    .entry(from.to_string())
                    .or_default()
                    .insert(to.to_string(), edge());
            }
        }
        for (from, target, via) in [
            (NOT_CONNECTED, "B", "A"),
            (NOT_CONNECTED, "C", "A"),
            ("A", "C", "B"),
            ("B", NOT_CONNECTED, "A"),
            ("C", NOT_CONNECTED, "B"),
            ("C", "A", "B"),
        ] {
            config
                .state_hops
                .entry(from.to_string())
                .or_default()
                .insert(target.to_string(), via.to_string());
        }
        config
    }

    #[test]
    fn next_hop_prefers_direct_edges() {
        let machine = StateMachine::new(linear_machine()).unwrap();
        assert_eq!(machine.next_hop("A", "B").unwrap(), "B");
        assert_eq!(machine.next_hop("A", "C").unwrap(), "B");
        assert_eq!(machine.next_hop(NOT_CONNECTED, "C").unwrap(), "A");
    }

    #[test]
    fn missing_route_is_a_no_hop_error() {
        let mut config = linear_machine();
        config.state_hops.get_mut("A").unwrap().remove("C");
        let machine = StateMachine::new(config).unwrap();
        assert!(matches!(
            machine.next_hop("A", "C"),
            Err(DeviceError::NoHop { .. })
        ));
    }

    #[test]
    fn unreachable_state_is_rejected() {
        let mut config = linear_machine();
        // D can be left but never entered.
        config
            .transitions
            .entry("D".to_string())
            .or_default()
            .insert("A".to_string(), TransitionAction::ExecuteCommand);
        config
            .connection_hops
            .entry("D".to_string())
            .or_default()
            .insert("A".to_string(), edge());
        let err = StateMachine::new(config).unwrap_err();
        assert!(matches!(err, DeviceError::Config(_)));
    }

    #[test]
    fn hop_via_a_non_neighbor_is_rejected() {
        let mut config = linear_machine();
        config
            .state_hops
            .get_mut(NOT_CONNECTED)
            .unwrap()
            .insert("C".to_string(), "B".to_string());
        let err = StateMachine::new(config).unwrap_err();
        assert!(matches!(err, DeviceError::Config(_)));
    }

    #[test]
    fn conflicting_prompts_for_one_state_are_rejected() {
        let mut config = linear_machine();
        config.connection_hops.get_mut("C").unwrap().insert(
            "B".to_string(),
            HopSpec::command(CommandKind::Exit).param("expected_prompt", "other$"),
        );
        config.connection_hops.get_mut("A").unwrap().insert(
            "B".to_string(),
            HopSpec::command(CommandKind::Ssh).param("expected_prompt", "b$"),
        );
        let err = StateMachine::new(config).unwrap_err();
        assert!(matches!(err, DeviceError::Config(_)));
    }

    #[test]
    fn execute_edge_without_a_command_is_rejected() {
        let mut config = linear_machine();
        config
            .connection_hops
            .get_mut("A")
            .unwrap()
            .insert("B".to_string(), HopSpec::default());
        let err = StateMachine::new(config).unwrap_err();
        assert!(matches!(err, DeviceError::Config(_)));
    }

    #[test]
    fn prompts_and_newlines_are_derived_from_incoming_edges() {
        let mut config = linear_machine();
        config.connection_hops.get_mut("A").unwrap().insert(
            "B".to_string(),
            HopSpec::command(CommandKind::Ssh)
                .param("expected_prompt", "b$")
                .param("target_newline", "\r\n"),
        );
        config.connection_hops.get_mut("C").unwrap().insert(
            "B".to_string(),
            HopSpec::command(CommandKind::Exit).param("expected_prompt", "b$"),
        );
        let machine = StateMachine::new(config).unwrap();
        assert_eq!(machine.prompt_for("B"), Some("b$"));
        assert_eq!(machine.newline_for("B"), "\r\n");
        assert_eq!(machine.newline_for("A"), "\n");
    }
}

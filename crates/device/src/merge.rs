// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Deep merge of layered state-machine configurations.
//!
//! Device families contribute partial configurations which are merged in
//! chain order, with user-supplied connection hops overlaid last. Merge
//! rules: maps merge key-wise, required-parameter lists concatenate (first
//! occurrence wins on duplicates), and a scalar in a later layer overrides
//! the earlier one.

use crate::sm::{HopSpec, HopSpecTable, SmConfig, StateHopsTable, TransitionTable};

pub fn merge_sm_config(mut base: SmConfig, overlay: SmConfig) -> SmConfig {
    merge_transitions(&mut base.transitions, overlay.transitions);
    merge_hops(&mut base.connection_hops, overlay.connection_hops);
    merge_state_hops(&mut base.state_hops, overlay.state_hops);
    base
}

pub fn merge_transitions(base: &mut TransitionTable, overlay: TransitionTable) {
    for (from, edges) in overlay {
        let entry = base.entry(from).or_default();
        for (to, action) in edges {
            entry.insert(to, action);
        }
    }
}

pub fn merge_hops(base: &mut HopSpecTable, overlay: HopSpecTable) {
    for (from, edges) in overlay {
        let entry = base.entry(from).or_default();
        for (to, spec) in edges {
            match entry.get_mut(&to) {
                Some(existing) => merge_hop_spec(existing, spec),
                None => {
                    entry.insert(to, spec);
                }
            }
        }
    }
}

pub fn merge_state_hops(base: &mut StateHopsTable, overlay: StateHopsTable) {
    for (from, hops) in overlay {
        let entry = base.entry(from).or_default();
        for (target, via) in hops {
            entry.insert(target, via);
        }
    }
}

fn merge_hop_spec(base: &mut HopSpec, overlay: HopSpec) {
    if overlay.execute_command.is_some() {
        base.execute_command = overlay.execute_command;
    }
    for (name, value) in overlay.command_params {
        base.command_params.insert(name, value);
    }
    for required in overlay.required_command_params {
        if !base.required_command_params.contains(&required) {
            base.required_command_params.push(required);
        }
    }
}

//! Structural validation of a parsed document.
//!
//! Runs once, after parsing and before interpretation. The teacher's own `Fsm::valid()` is a
//! one-line stub checking only that every state's `doc_id != 0`; this module replaces it with
//! the full set of static checks the W3C document structure requires, and decorates the `Fsm`
//! with the precomputed ancestor chains the transition-selection algorithm relies on.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{ValidationError, Warning};
use crate::fsm::{Fsm, StateId};

/// Runs all structural checks against `fsm`, mutating it in place on success.
///
/// On success, `fsm.validated` is `true` and `fsm.ancestors` holds each state's root-to-parent
/// chain. On failure the `Fsm` is left exactly as the parser produced it; callers must not
/// attempt to interpret it.
pub fn validate(fsm: &mut Box<Fsm>) -> Result<Vec<Warning>, (Vec<ValidationError>, Vec<Warning>)> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    check_state_ids(fsm, &mut errors);
    check_transition_targets(fsm, &mut errors);
    check_initial_declarations(fsm, &mut errors);
    check_history_states(fsm, &mut errors);

    let ancestors = compute_ancestors(fsm);

    check_document_initial(fsm, &mut warnings);
    check_reachability(fsm, &mut warnings);

    if !errors.is_empty() {
        return Err((errors, warnings));
    }

    fsm.ancestors = ancestors;
    fsm.validated = true;
    Ok(warnings)
}

fn check_state_ids(fsm: &Fsm, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for state in &fsm.states {
        if state.name.is_empty() {
            errors.push(ValidationError::EmptyStateId);
            continue;
        }
        if !seen.insert(state.name.clone()) {
            errors.push(ValidationError::DuplicateStateId(state.name.clone()));
        }
    }
}

fn check_transition_targets(fsm: &Fsm, errors: &mut Vec<ValidationError>) {
    for transition in fsm.transitions.values() {
        let source_name = state_name(fsm, transition.source);
        for target in &transition.target {
            if fsm.states.get((*target - 1) as usize).is_none() {
                errors.push(ValidationError::UnknownTransitionTarget {
                    source: source_name.clone(),
                    target: target.to_string(),
                });
            }
        }
    }
}

fn check_initial_declarations(fsm: &Fsm, errors: &mut Vec<ValidationError>) {
    for state_id in &fsm.initial_conflicts {
        errors.push(ValidationError::ConflictingInitial(state_name(fsm, *state_id)));
    }
    for state in &fsm.states {
        if state.initial == 0 {
            continue;
        }
        let Some(transition) = fsm.transitions.get(&state.initial) else {
            continue;
        };

        if transition.target.len() != 1 {
            errors.push(ValidationError::InitialMustHaveOneTransition(state.name.clone()));
            continue;
        }
        let target = transition.target[0];
        if !state.states.contains(&target) {
            errors.push(ValidationError::InitialTransitionTargetNotDirectChild {
                state: state.name.clone(),
                target: state_name(fsm, target),
            });
        }
    }
}

fn check_history_states(fsm: &Fsm, errors: &mut Vec<ValidationError>) {
    for state in &fsm.states {
        if state.history_type == crate::fsm::HistoryType::None {
            continue;
        }
        let default_transitions: Vec<_> = state.transitions.iterator().collect();
        if default_transitions.len() != 1 {
            errors.push(ValidationError::HistoryRequiresOneDefaultTransition(
                state.name.clone(),
            ));
            continue;
        }
        let Some(transition) = fsm.transitions.get(default_transitions[0]) else {
            continue;
        };
        for target in &transition.target {
            if fsm.states.get((*target - 1) as usize).is_none() {
                errors.push(ValidationError::HistoryDefaultTargetUnknown {
                    state: state.name.clone(),
                    target: target.to_string(),
                });
            }
        }
    }
}

fn check_document_initial(fsm: &Fsm, warnings: &mut Vec<Warning>) {
    let root = fsm.get_state_by_id(fsm.pseudo_root);
    if root.initial == 0 {
        return;
    }
    let Some(transition) = fsm.transitions.get(&root.initial) else {
        return;
    };
    for target in &transition.target {
        if !root.states.contains(target) {
            warnings.push(Warning::UnknownDocumentInitial(state_name(fsm, *target)));
        }
    }
}

/// Precomputes, for every state, its chain of ancestor ids from the pseudo-root down to (but
/// excluding) the state itself.
fn compute_ancestors(fsm: &Fsm) -> HashMap<StateId, Vec<StateId>> {
    let mut ancestors = HashMap::new();
    for state in &fsm.states {
        let mut chain = Vec::new();
        let mut parent = state.parent;
        while parent != 0 {
            chain.push(parent);
            parent = fsm.get_state_by_id(parent).parent;
        }
        chain.reverse();
        ancestors.insert(state.id, chain);
    }
    ancestors
}

fn check_reachability(fsm: &Fsm, warnings: &mut Vec<Warning>) {
    let mut reachable = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(fsm.pseudo_root);

    while let Some(id) = queue.pop_front() {
        if !reachable.insert(id) {
            continue;
        }
        let state = fsm.get_state_by_id(id);
        for child in &state.states {
            queue.push_back(*child);
        }
        for history_id in state.history.iterator() {
            queue.push_back(*history_id);
        }
        for transition_id in state.transitions.iterator() {
            if let Some(transition) = fsm.transitions.get(transition_id) {
                for target in &transition.target {
                    queue.push_back(*target);
                }
            }
        }
        if let Some(transition) = fsm.transitions.get(&state.initial) {
            for target in &transition.target {
                queue.push_back(*target);
            }
        }
    }

    for state in &fsm.states {
        if state.id == fsm.pseudo_root || reachable.contains(&state.id) {
            continue;
        }
        // An unreachable parent already carries the warning; don't also flag its descendants.
        if state.parent != 0 && !reachable.contains(&state.parent) {
            continue;
        }
        warnings.push(Warning::UnreachableState(state.name.clone()));
    }
}

fn state_name(fsm: &Fsm, id: StateId) -> String {
    match fsm.states.get((id.wrapping_sub(1)) as usize) {
        Some(s) => s.name.clone(),
        None => format!("#{}", id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_from_xml;

    #[test]
    fn forward_referenced_transition_target_validates() {
        // The parser auto-vivifies a <state> for any target name seen before its declaration,
        // so a transition target is never structurally dangling by the time validation runs.
        let mut fsm = parse_from_xml(
            "<scxml initial='Main'><state id='Main'>\
            <transition event='go' target='Later'></transition></state>\
            <state id='Later'/></scxml>"
                .to_string(),
        )
        .unwrap();
        let r = validate(&mut fsm);
        assert!(r.is_ok());
    }

    #[test]
    fn valid_document_is_accepted() {
        let mut fsm = parse_from_xml(
            "<scxml initial='Main'><state id='Main'><state id='A'/><state id='B'/>\
            <transition event='go' target='B'></transition></state></scxml>"
                .to_string(),
        )
        .unwrap();
        let r = validate(&mut fsm);
        assert!(r.is_ok());
        assert!(fsm.validated);
        assert!(fsm.ancestors.contains_key(&fsm.statesNames["A"]));
    }

    #[test]
    fn conflicting_initial_is_reported() {
        let mut fsm = parse_from_xml(
            "<scxml initial='Main'><state id='Main' initial='A'><state id='A'/><state id='B'/>\
            <initial><transition target='B'></transition></initial></state></scxml>"
                .to_string(),
        )
        .unwrap();
        let r = validate(&mut fsm);
        match r {
            Err((errors, _)) => {
                assert!(errors
                    .iter()
                    .any(|e| matches!(e, ValidationError::ConflictingInitial(s) if s == "Main")));
            }
            Ok(_) => panic!("expected a ConflictingInitial error"),
        }
    }
}

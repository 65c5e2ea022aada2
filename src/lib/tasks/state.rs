use std::collections::HashMap;

use super::types::State;

/// Status machine for a generation task.
///
/// `Running -> Running` covers a previous run that crashed before persisting
/// its final status; `Failed -> Running` is a retry. `Done` is terminal.
pub fn valid_state_transition(src: &State, dst: &State) -> bool {
    let state_transition_map: HashMap<State, Vec<State>> = {
        let mut map = HashMap::new();
        map.insert(State::Init, vec![State::Running]);
        map.insert(
            State::Running,
            vec![State::Running, State::Done, State::Failed],
        );
        map.insert(State::Failed, vec![State::Running]);
        map.insert(State::Done, vec![]);
        map
    };

    if let Some(valid_states) = state_transition_map.get(src) {
        valid_states.contains(dst)
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(valid_state_transition(&State::Init, &State::Running));
        assert!(valid_state_transition(&State::Running, &State::Done));
        assert!(valid_state_transition(&State::Running, &State::Failed));
        assert!(valid_state_transition(&State::Failed, &State::Running));
        assert!(valid_state_transition(&State::Running, &State::Running));
    }

    #[test]
    fn done_is_terminal() {
        for dst in [State::Init, State::Running, State::Done, State::Failed] {
            assert!(!valid_state_transition(&State::Done, &dst));
        }
    }

    #[test]
    fn init_cannot_skip_running() {
        assert!(!valid_state_transition(&State::Init, &State::Done));
        assert!(!valid_state_transition(&State::Init, &State::Failed));
    }
}

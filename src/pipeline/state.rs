//! Cycle state machine.

use std::fmt;

/// Phase of the current ingestion cycle.
///
/// A cycle runs `Idle → Discovering → SchemaMerging → Writing → Committing
/// → Idle`. `Discovering` with nothing new returns to `Idle` directly, and
/// a failed phase aborts back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Idle,
    Discovering,
    SchemaMerging,
    Writing,
    Committing,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::Discovering => "discovering",
            CycleState::SchemaMerging => "schema_merging",
            CycleState::Writing => "writing",
            CycleState::Committing => "committing",
        }
    }

    /// Check whether `next` may follow this state.
    pub fn can_transition_to(self, next: CycleState) -> bool {
        use CycleState::*;

        match (self, next) {
            (Idle, Discovering)
            | (Discovering, SchemaMerging)
            | (SchemaMerging, Writing)
            | (Writing, Committing) => true,
            (Idle, Idle) => false,
            (_, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::CycleState::*;

    #[test]
    fn test_forward_path() {
        let path = [Idle, Discovering, SchemaMerging, Writing, Committing, Idle];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_skips_and_backward_moves_are_rejected() {
        assert!(!Idle.can_transition_to(Writing));
        assert!(!Discovering.can_transition_to(Committing));
        assert!(!Committing.can_transition_to(Discovering));
        assert!(!Writing.can_transition_to(SchemaMerging));
        assert!(!Idle.can_transition_to(Idle));
    }

    #[test]
    fn test_any_phase_can_abort_to_idle() {
        for state in [Discovering, SchemaMerging, Writing, Committing] {
            assert!(state.can_transition_to(Idle));
        }
    }
}

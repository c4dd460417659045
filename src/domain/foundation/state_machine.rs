//! State machine trait for lifecycle enums.

use super::ValidationError;

/// A status enum whose legal moves are listed per state.
///
/// Implementors only enumerate successors; reachability checks and
/// validated transitions are derived from that list.
pub trait StateMachine: Sized + Copy + PartialEq + std::fmt::Debug {
    /// States reachable in one step from `self`.
    fn valid_transitions(&self) -> Vec<Self>;

    fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }

    /// Returns `target` if the move is legal.
    fn transition_to(&self, target: Self) -> Result<Self, ValidationError> {
        if self.can_transition_to(&target) {
            return Ok(target);
        }
        Err(ValidationError::invalid_format(
            "state",
            format!("{:?} cannot move to {:?}", self, target),
        ))
    }

    /// No outgoing transitions.
    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

//! Pipeline state machine.

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

/// States of one pipeline run.
///
/// `Failed` is absorbing and reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Idle,
    ClusterEnsuring,
    JobSubmitting,
    /// Job submitted; the next transition is driven by its status envelope.
    AwaitingCompletion,
    MessageReceived,
    Loading,
    CleaningUp,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "IDLE",
            PipelineState::ClusterEnsuring => "CLUSTER_ENSURING",
            PipelineState::JobSubmitting => "JOB_SUBMITTING",
            PipelineState::AwaitingCompletion => "AWAITING_COMPLETION",
            PipelineState::MessageReceived => "MESSAGE_RECEIVED",
            PipelineState::Loading => "LOADING",
            PipelineState::CleaningUp => "CLEANING_UP",
            PipelineState::Done => "DONE",
            PipelineState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Idle, ClusterEnsuring)
            | (ClusterEnsuring, JobSubmitting)
            | (JobSubmitting, AwaitingCompletion)
            | (AwaitingCompletion, MessageReceived)
            | (MessageReceived, Loading)
            | (Loading, CleaningUp)
            | (CleaningUp, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current state of one handler invocation and its history.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: PipelineState,
    history: Vec<PipelineState>,
}

impl StateMachine {
    pub fn new(initial: PipelineState) -> Self {
        Self {
            current: initial,
            history: vec![initial],
        }
    }

    pub fn current(&self) -> PipelineState {
        self.current
    }

    /// Every state visited, starting with the initial one.
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Move to `next`.
    ///
    /// Illegal transitions are refused with a warning and leave the state
    /// unchanged. Returns whether the transition happened.
    pub fn transition(&mut self, next: PipelineState) -> bool {
        if !self.current.can_transition_to(next) {
            warn!(from = %self.current, to = %next, "Illegal state transition refused");
            return false;
        }
        info!(from = %self.current, to = %next, "State transition");
        self.current = next;
        self.history.push(next);
        true
    }

    /// Move to the absorbing failure state.
    pub fn fail(&mut self) {
        self.transition(PipelineState::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut machine = StateMachine::new(Idle);
        for next in [
            ClusterEnsuring,
            JobSubmitting,
            AwaitingCompletion,
            MessageReceived,
            Loading,
            CleaningUp,
            Done,
        ] {
            assert!(machine.transition(next));
        }
        assert!(machine.current().is_terminal());
        assert_eq!(machine.history().len(), 8);
    }

    #[test]
    fn test_failed_reachable_from_any_step() {
        for state in [
            Idle,
            ClusterEnsuring,
            JobSubmitting,
            AwaitingCompletion,
            MessageReceived,
            Loading,
            CleaningUp,
        ] {
            assert!(state.can_transition_to(Failed), "{state} -> FAILED");
        }
    }

    #[test]
    fn test_terminal_states_absorb() {
        let mut machine = StateMachine::new(Idle);
        machine.fail();
        assert!(!machine.transition(ClusterEnsuring));
        assert!(!machine.transition(Failed));
        assert_eq!(machine.history(), &[Idle, Failed]);
    }

    #[test]
    fn test_skipping_states_refused() {
        let mut machine = StateMachine::new(MessageReceived);
        assert!(!machine.transition(CleaningUp));
        assert_eq!(machine.current(), MessageReceived);
    }
}

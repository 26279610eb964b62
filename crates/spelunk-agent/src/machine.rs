//! The per-role state machine that sequences turns.
//!
//! The working cycle is fixed: planner runs once at the start when
//! requested, then explorer and evaluator alternate until a terminating
//! command moves the machine into `Done`. The machine itself never
//! terminates a session; the loop calls [`Machine::finish`] when the model
//! answers or gives up.

use crate::roles;
use spelunk_core::{ContextMode, MachineState, Role, is_valid_state_transition};

/// Everything the loop needs to run one state: the system prompt, the
/// context renderer to use, and where the machine goes next.
pub struct StateConfig {
    pub prompt_template: String,
    pub context_mode: ContextMode,
    pub next: MachineState,
}

/// Builds the configuration for one role/state pair.
#[must_use]
pub fn state_config(role: Role, state: MachineState) -> StateConfig {
    let (context_mode, next) = match state {
        MachineState::Planner => (ContextMode::TaskOnly, MachineState::Explorer),
        MachineState::Explorer => (ContextMode::WorkingMemory, MachineState::Evaluator),
        MachineState::Evaluator => (ContextMode::LastOutputs, MachineState::Explorer),
        MachineState::Done => (ContextMode::WorkingMemory, MachineState::Done),
    };
    StateConfig {
        prompt_template: roles::template(role, state),
        context_mode,
        next,
    }
}

#[derive(Debug, Clone)]
pub struct Machine {
    role: Role,
    current: MachineState,
    cycling: bool,
}

impl Machine {
    /// Full machine: starts in the planner when `plan_first`, otherwise in
    /// the explorer, and cycles explorer/evaluator from there.
    #[must_use]
    pub fn new(role: Role, plan_first: bool) -> Self {
        let start = if plan_first {
            MachineState::Planner
        } else {
            MachineState::Explorer
        };
        Self {
            role,
            current: start,
            cycling: true,
        }
    }

    /// Degenerate machine for plain runs: the explorer handles every turn.
    #[must_use]
    pub fn without_cycling(role: Role) -> Self {
        Self {
            role,
            current: MachineState::Explorer,
            cycling: false,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn current(&self) -> MachineState {
        self.current
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.current == MachineState::Done
    }

    #[must_use]
    pub fn config(&self) -> StateConfig {
        state_config(self.role, self.current)
    }

    /// Moves to the declared next state. Holds still once done or when
    /// cycling is off.
    pub fn advance(&mut self) {
        if self.current == MachineState::Done || !self.cycling {
            return;
        }
        let next = state_config(self.role, self.current).next;
        debug_assert!(is_valid_state_transition(self.current, next));
        self.current = next;
    }

    /// Terminal transition, taken when the model answers or gives up.
    pub fn finish(&mut self) {
        self.current = MachineState::Done;
    }
}

//! Retry and rollback decisions for failing commands.
//!
//! One [`ErrorState`] tracks the currently failing command. A different
//! command failing replaces it, so the retry count always refers to a
//! single repeated approach.

use spelunk_core::ErrorState;

/// What the loop should do about a command failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Surface the failure and give the model another try. Carries the
    /// failure count so far.
    Retry(u32),
    /// Retries are exhausted; restore the workspace before continuing.
    RollBack,
    /// The same command failed again after a rollback.
    Stuck,
}

pub(crate) fn on_failure(
    slot: &mut Option<ErrorState>,
    cmd: &str,
    error: &str,
) -> RecoveryAction {
    match slot {
        Some(state) if state.cmd == cmd => {
            state.last_error = Some(error.to_string());
            if state.rolled_back {
                return RecoveryAction::Stuck;
            }
            state.retries += 1;
            if state.retries > 3 {
                state.rolled_back = true;
                RecoveryAction::RollBack
            } else {
                RecoveryAction::Retry(state.retries)
            }
        }
        _ => {
            let mut state = ErrorState::new(cmd);
            state.retries = 1;
            state.last_error = Some(error.to_string());
            *slot = Some(state);
            RecoveryAction::Retry(1)
        }
    }
}

/// Clears the state when its command finally succeeds. A rolled-back
/// state also clears on any success: the abandoned approach has no other
/// path to resolution.
pub(crate) fn on_success(slot: &mut Option<ErrorState>, cmd: &str) {
    let clear = match slot {
        Some(state) => state.cmd == cmd || state.rolled_back,
        None => false,
    };
    if clear {
        *slot = None;
    }
}

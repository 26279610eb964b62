//! Renders the turn context handed to the model.
//!
//! Every machine state tags one of three context modes, and each mode has a
//! pure rendering function here: no I/O, no session mutation, just
//! `(task, memory, outputs, ...) -> String`. The loop composes the result
//! with the state's prompt template before each model call.

use spelunk_core::{ContextMode, ErrorState, MemoryItem, TurnOutput};

/// Everything a renderer may draw on for one turn. All fields are borrowed
/// from the live session; renderers never mutate.
pub struct ContextInput<'a> {
    pub task: &'a str,
    pub memory: &'a [MemoryItem],
    pub new_results: &'a [TurnOutput],
    pub notes: &'a [String],
    pub error_state: Option<&'a ErrorState>,
    pub plan: Option<&'a str>,
}

const EPHEMERAL_NOTICE: &str =
    "Command outputs vanish after one turn unless you keep or note them.";

/// General-purpose entry point: renders `input` for the given mode.
#[must_use]
pub fn render(mode: ContextMode, input: &ContextInput) -> String {
    match mode {
        ContextMode::TaskOnly => render_task_only(input),
        ContextMode::LastOutputs => render_last_outputs(input),
        ContextMode::WorkingMemory => render_working_memory(input),
    }
}

/// Minimal context: the task and nothing learned so far. Used by planning
/// states that must not be biased by partial findings.
#[must_use]
pub fn render_task_only(input: &ContextInput) -> String {
    let mut parts = vec![format!("Task: {}", input.task)];
    if let Some(state) = input.error_state {
        parts.push(render_error_state(state));
    }
    parts.push(EPHEMERAL_NOTICE.to_string());
    parts.join("\n\n")
}

/// This turn's raw command output, for the evaluating state that decides
/// what to keep. Ends with an instruction not to conclude yet.
#[must_use]
pub fn render_last_outputs(input: &ContextInput) -> String {
    let mut parts = vec![format!("Task: {}", input.task)];

    if let Some(state) = input.error_state {
        parts.push(render_error_state(state));
    }

    if let Some(plan) = input.plan.filter(|p| !p.trim().is_empty()) {
        parts.push(format!("Plan:\n{plan}"));
    }

    if !input.notes.is_empty() {
        parts.push(render_notes(input.notes));
    }

    if input.new_results.is_empty() {
        parts.push("No command output this turn.".to_string());
    } else {
        let mut section = String::from("Results from this turn:");
        for result in input.new_results {
            let suffix = if result.success { "" } else { " (failed)" };
            section.push_str(&format!("\n\n$ {}{}\n{}", result.cmd, suffix, result.content));
        }
        parts.push(section);
    }

    parts.push(EPHEMERAL_NOTICE.to_string());
    parts.push(
        "Do not conclude yet. Decide what to keep or note, then continue exploring.".to_string(),
    );
    parts.join("\n\n")
}

/// Durable memory plus this turn's notes, for the exploring state. New
/// outputs are not repeated here; only a failure warning derived from them.
#[must_use]
pub fn render_working_memory(input: &ContextInput) -> String {
    let mut parts = vec![format!("Task: {}", input.task)];

    if let Some(state) = input.error_state {
        parts.push(render_error_state(state));
    }

    if input.new_results.iter().any(|r| !r.success) {
        parts.push(
            "WARNING: some commands failed last turn. Check before building on their output."
                .to_string(),
        );
    }

    if !input.notes.is_empty() {
        parts.push(render_notes(input.notes));
    }

    if input.memory.is_empty() {
        parts.push(
            "Working memory is empty. Use $(keep ...) or $(note ...) to retain what matters."
                .to_string(),
        );
    } else {
        let mut section = format!("Working memory ({} items):", input.memory.len());
        for (index, item) in input.memory.iter().enumerate() {
            section.push_str(&format!("\n\n{}", render_memory_item(index + 1, item)));
        }
        parts.push(section);
    }

    parts.push(EPHEMERAL_NOTICE.to_string());
    parts.join("\n\n")
}

/// Combined view for loops that run a single state: durable memory and
/// this turn's raw output together, with no staging instruction at the end.
#[must_use]
pub fn render_general(input: &ContextInput) -> String {
    let mut parts = vec![format!("Task: {}", input.task)];

    if let Some(state) = input.error_state {
        parts.push(render_error_state(state));
    }

    if let Some(plan) = input.plan.filter(|p| !p.trim().is_empty()) {
        parts.push(format!("Plan:\n{plan}"));
    }

    if !input.notes.is_empty() {
        parts.push(render_notes(input.notes));
    }

    if !input.memory.is_empty() {
        let mut section = format!("Working memory ({} items):", input.memory.len());
        for (index, item) in input.memory.iter().enumerate() {
            section.push_str(&format!("\n\n{}", render_memory_item(index + 1, item)));
        }
        parts.push(section);
    }

    if !input.new_results.is_empty() {
        let mut section = String::from("Results from this turn:");
        for result in input.new_results {
            let suffix = if result.success { "" } else { " (failed)" };
            section.push_str(&format!("\n\n$ {}{}\n{}", result.cmd, suffix, result.content));
        }
        parts.push(section);
    }

    parts.push(EPHEMERAL_NOTICE.to_string());
    parts.join("\n\n")
}

fn render_notes(notes: &[String]) -> String {
    let mut section = String::from("Notes:");
    for note in notes {
        section.push_str(&format!("\n- {note}"));
    }
    section
}

fn render_memory_item(index: usize, item: &MemoryItem) -> String {
    let label = item.cmd.as_deref().unwrap_or("note");
    let suffix = if item.success == Some(false) { " (FAILED)" } else { "" };
    format!("[{index}] {label}{suffix}\n{}", item.content)
}

/// Describes an active failure to the model: the failing command, how many
/// retries are left, and what the escalation path is.
#[must_use]
pub fn render_error_state(state: &ErrorState) -> String {
    let mut section = format!("Command failed: {}", state.cmd);
    if let Some(err) = state.last_error.as_deref().filter(|e| !e.is_empty()) {
        section.push_str(&format!("\nError: {err}"));
    }
    if state.rolled_back {
        section.push_str(&format!(
            "\nAll changes were rolled back after {} failed attempts. Your options:\n\
             1. $(ask <question>) to ask the user for guidance\n\
             2. Try a different approach to the task\n\
             3. $(done <explanation>) to give up and explain why",
            state.retries
        ));
    } else if state.retries >= 3 {
        section.push_str(&format!(
            "\nThis command has failed {} times. One more failure rolls back all changes.",
            state.retries
        ));
    } else {
        section.push_str(&format!(
            "\nRetry {}/3. Fix the command or take another path.",
            state.retries
        ));
    }
    section
}

#[cfg(test)]
mod tests {
    use super::*;
    use spelunk_core::MemoryKind;

    fn input<'a>(task: &'a str) -> ContextInput<'a> {
        ContextInput {
            task,
            memory: &[],
            new_results: &[],
            notes: &[],
            error_state: None,
            plan: None,
        }
    }

    #[test]
    fn every_mode_includes_the_task_line() {
        let base = input("find the config loader");
        for mode in [
            ContextMode::TaskOnly,
            ContextMode::LastOutputs,
            ContextMode::WorkingMemory,
        ] {
            let rendered = render(mode, &base);
            assert!(
                rendered.contains("Task: find the config loader"),
                "mode {mode:?} lost the task line"
            );
        }
    }

    #[test]
    fn every_mode_states_that_outputs_are_ephemeral() {
        let base = input("t");
        for mode in [
            ContextMode::TaskOnly,
            ContextMode::LastOutputs,
            ContextMode::WorkingMemory,
        ] {
            assert!(render(mode, &base).contains("unless you keep or note"));
        }
    }

    #[test]
    fn working_memory_warns_when_a_new_result_failed() {
        let results = vec![
            TurnOutput::ok("read a.rs", "fine"),
            TurnOutput::failed("run make", "exit 2"),
        ];
        let mut ctx = input("t");
        ctx.new_results = &results;
        let rendered = render_working_memory(&ctx);
        assert!(rendered.contains("some commands failed"));
        assert!(!rendered.contains("exit 2"), "raw output is not repeated in memory mode");
    }

    #[test]
    fn working_memory_has_no_warning_when_all_succeeded() {
        let results = vec![TurnOutput::ok("read a.rs", "fine")];
        let mut ctx = input("t");
        ctx.new_results = &results;
        assert!(!render_working_memory(&ctx).contains("some commands failed"));
    }

    #[test]
    fn working_memory_lists_items_with_index_and_status() {
        let memory = vec![
            MemoryItem::note("ab12".to_string(), "the loader is in config.rs"),
            MemoryItem::kept_output(
                "cd34".to_string(),
                &TurnOutput::failed("run make", "exit 2"),
            ),
        ];
        let mut ctx = input("t");
        ctx.memory = &memory;
        let rendered = render_working_memory(&ctx);
        assert!(rendered.contains("Working memory (2 items):"));
        assert!(rendered.contains("[1] note\nthe loader is in config.rs"));
        assert!(rendered.contains("[2] run make (FAILED)\nexit 2"));
    }

    #[test]
    fn successful_items_carry_no_suffix() {
        let memory = vec![MemoryItem::kept_output(
            "ab12".to_string(),
            &TurnOutput::ok("read a.rs", "contents"),
        )];
        let mut ctx = input("t");
        ctx.memory = &memory;
        let rendered = render_working_memory(&ctx);
        assert!(rendered.contains("[1] read a.rs\ncontents"));
        assert!(!rendered.contains("FAILED"));
    }

    #[test]
    fn empty_memory_suggests_keep_and_note() {
        let rendered = render_working_memory(&input("t"));
        assert!(rendered.contains("Working memory is empty"));
        assert!(rendered.contains("$(keep"));
    }

    #[test]
    fn last_outputs_lists_results_and_forbids_concluding() {
        let results = vec![
            TurnOutput::ok("read a.rs", "contents"),
            TurnOutput::failed("run make", "exit 2"),
        ];
        let mut ctx = input("t");
        ctx.new_results = &results;
        let rendered = render_last_outputs(&ctx);
        assert!(rendered.contains("$ read a.rs\ncontents"));
        assert!(rendered.contains("$ run make (failed)\nexit 2"));
        assert!(rendered.contains("Do not conclude yet"));
    }

    #[test]
    fn last_outputs_without_results_says_so() {
        let rendered = render_last_outputs(&input("t"));
        assert!(rendered.contains("No command output this turn."));
    }

    #[test]
    fn plan_appears_only_when_present() {
        let mut ctx = input("t");
        assert!(!render_last_outputs(&ctx).contains("Plan:"));
        ctx.plan = Some("1. read the entry point\n2. trace imports");
        let rendered = render_last_outputs(&ctx);
        assert!(rendered.contains("Plan:\n1. read the entry point"));
    }

    #[test]
    fn blank_plan_is_treated_as_absent() {
        let mut ctx = input("t");
        ctx.plan = Some("   ");
        assert!(!render_last_outputs(&ctx).contains("Plan:"));
    }

    #[test]
    fn notes_render_as_bullets() {
        let notes = vec!["first".to_string(), "second".to_string()];
        let mut ctx = input("t");
        ctx.notes = &notes;
        let rendered = render_last_outputs(&ctx);
        assert!(rendered.contains("Notes:\n- first\n- second"));
    }

    #[test]
    fn error_state_reports_retry_count() {
        let mut state = ErrorState::new("run make");
        state.last_error = Some("exit 2".to_string());
        state.retries = 2;
        let rendered = render_error_state(&state);
        assert!(rendered.contains("Command failed: run make"));
        assert!(rendered.contains("Error: exit 2"));
        assert!(rendered.contains("Retry 2/3"));
    }

    #[test]
    fn three_retries_warn_about_rollback() {
        let mut state = ErrorState::new("run make");
        state.retries = 3;
        let rendered = render_error_state(&state);
        assert!(rendered.contains("rolls back all changes"));
        assert!(!rendered.contains("Retry 3/3"));
    }

    #[test]
    fn rolled_back_state_offers_the_three_ways_out() {
        let mut state = ErrorState::new("run make");
        state.retries = 4;
        state.rolled_back = true;
        let rendered = render_error_state(&state);
        assert!(rendered.contains("rolled back"));
        assert!(rendered.contains("$(ask"));
        assert!(rendered.contains("different approach"));
        assert!(rendered.contains("give up"));
    }

    #[test]
    fn error_state_is_rendered_inside_every_mode() {
        let state = ErrorState::new("run make");
        let mut ctx = input("t");
        ctx.error_state = Some(&state);
        for mode in [
            ContextMode::TaskOnly,
            ContextMode::LastOutputs,
            ContextMode::WorkingMemory,
        ] {
            assert!(render(mode, &ctx).contains("Command failed: run make"));
        }
    }

    #[test]
    fn general_view_shows_memory_and_results_together() {
        let memory = vec![MemoryItem::note("ab12".to_string(), "loader lives in config.rs")];
        let results = vec![TurnOutput::failed("run make", "exit 2")];
        let mut ctx = input("t");
        ctx.memory = &memory;
        ctx.new_results = &results;
        let rendered = render_general(&ctx);
        assert!(rendered.contains("[1] note\nloader lives in config.rs"));
        assert!(rendered.contains("$ run make (failed)\nexit 2"));
        assert!(!rendered.contains("Do not conclude"));
    }

    #[test]
    fn general_view_omits_empty_sections() {
        let rendered = render_general(&input("t"));
        assert!(!rendered.contains("Working memory"));
        assert!(!rendered.contains("Results from this turn"));
        assert!(rendered.contains("unless you keep or note"));
    }

    #[test]
    fn note_items_round_trip_through_memory_rendering() {
        let memory = vec![MemoryItem::note("ab12".to_string(), "x")];
        assert_eq!(memory[0].kind, MemoryKind::Note);
        let mut ctx = input("t");
        ctx.memory = &memory;
        assert!(render_working_memory(&ctx).contains("[1] note\nx"));
    }
}

//! Command-line grammar for the `spelunk` binary.
//!
//! The grammar interleaves flags with free text: anything not recognized
//! as a flag joins the task description. That rules out an off-the-shelf
//! argument parser, which would reject the loose tokens instead of
//! collecting them.

use spelunk_core::{RiskLevel, Role};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOptions {
    pub help: bool,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    pub explain: bool,
    pub resume: Option<String>,
    pub list_sessions: bool,
    pub list_logs: bool,
    pub list_roles: bool,
    pub non_interactive: bool,
    /// Role state machine on/off. Set directly or implied by a role
    /// shortcut flag.
    pub machine: bool,
    /// Start with a planning turn before exploring.
    pub plan: bool,
    pub role: Option<Role>,
    /// Validation command override. Parsed and carried; executed by the
    /// validation collaborator, not this core.
    pub validate_cmd: Option<String>,
    pub shadow: bool,
    pub auto_validate: bool,
    pub auto_approve: Option<RiskLevel>,
    pub commit: bool,
    pub retry: Option<u32>,
    /// Diff base reference; `Some("")` means auto-detect.
    pub diff_base: Option<String>,
    /// Pick the role by classifying the task with one model call.
    pub auto_dispatch: bool,
    pub task: String,
}

/// Parses argv-style tokens. Never fails: a flag missing its value is
/// dropped, an unparsable value falls back to the flag's default, and
/// every unrecognized token becomes part of the task text.
pub fn parse_cli<S: AsRef<str>>(tokens: &[S]) -> CliOptions {
    let mut opts = CliOptions::default();
    let mut task_words: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i].as_ref();
        match token {
            "-h" | "--help" => opts.help = true,
            "--provider" => opts.provider = required_value(tokens, &mut i),
            "--model" => opts.model = required_value(tokens, &mut i),
            "--max-turns" => {
                opts.max_turns = required_value(tokens, &mut i).and_then(|v| v.parse().ok());
            }
            "--explain" => opts.explain = true,
            "--resume" => opts.resume = required_value(tokens, &mut i),
            "--list-sessions" => opts.list_sessions = true,
            "--list-logs" => opts.list_logs = true,
            "--list-roles" => opts.list_roles = true,
            "--non-interactive" => opts.non_interactive = true,
            "--machine" => opts.machine = true,
            "--plan" => opts.plan = true,
            "--role" => {
                if let Some(value) = required_value(tokens, &mut i) {
                    opts.role = value.parse().ok();
                }
            }
            // Role shortcuts set every implied field together.
            "--investigate" => {
                opts.role = Some(Role::Investigator);
                opts.machine = true;
            }
            "--audit" => {
                opts.role = Some(Role::Auditor);
                opts.machine = true;
            }
            "--refactor" => {
                opts.role = Some(Role::Refactorer);
                opts.machine = true;
                opts.plan = true;
            }
            "--validate" => opts.validate_cmd = required_value(tokens, &mut i),
            "--shadow" => opts.shadow = true,
            "--auto-validate" => opts.auto_validate = true,
            "--auto-approve" => {
                let level = optional_value(tokens, &mut i)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(RiskLevel::Low);
                opts.auto_approve = Some(level);
            }
            "--commit" => opts.commit = true,
            "--retry" => {
                let count = optional_value(tokens, &mut i)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1);
                opts.retry = Some(count);
            }
            "--diff-base" => {
                opts.diff_base = Some(optional_value(tokens, &mut i).unwrap_or_default());
            }
            "--auto" => opts.auto_dispatch = true,
            _ => task_words.push(token),
        }
        i += 1;
    }

    opts.task = task_words.join(" ");
    opts
}

/// Consumes the next token as this flag's value. `None` at end of input.
fn required_value<S: AsRef<str>>(tokens: &[S], i: &mut usize) -> Option<String> {
    if *i + 1 < tokens.len() {
        *i += 1;
        Some(tokens[*i].as_ref().to_string())
    } else {
        None
    }
}

/// Consumes the next token only when it does not look like another flag.
fn optional_value<S: AsRef<str>>(tokens: &[S], i: &mut usize) -> Option<String> {
    if *i + 1 < tokens.len() && !tokens[*i + 1].as_ref().starts_with('-') {
        *i += 1;
        Some(tokens[*i].as_ref().to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(tokens: &[&str]) -> CliOptions {
        parse_cli(tokens)
    }

    #[test]
    fn loose_words_become_the_task() {
        let opts = parse(&["find", "the", "connection", "leak"]);
        assert_eq!(opts.task, "find the connection leak");
        assert!(opts.role.is_none());
        assert!(!opts.machine);
    }

    #[test]
    fn flags_interleave_with_task_words() {
        let opts = parse(&["find", "--audit", "the", "leak", "--max-turns", "20"]);
        assert_eq!(opts.task, "find the leak");
        assert_eq!(opts.role, Some(Role::Auditor));
        assert!(opts.machine);
        assert_eq!(opts.max_turns, Some(20));
    }

    #[test]
    fn refactor_shortcut_sets_machine_and_plan() {
        let opts = parse(&["--refactor", "extract", "the", "pool"]);
        assert_eq!(opts.role, Some(Role::Refactorer));
        assert!(opts.machine);
        assert!(opts.plan);
    }

    #[test]
    fn investigate_shortcut_sets_machine_only() {
        let opts = parse(&["--investigate"]);
        assert_eq!(opts.role, Some(Role::Investigator));
        assert!(opts.machine);
        assert!(!opts.plan);
    }

    #[test]
    fn bare_role_flag_implies_nothing_extra() {
        let opts = parse(&["--role", "auditor"]);
        assert_eq!(opts.role, Some(Role::Auditor));
        assert!(!opts.machine);

        let bad = parse(&["--role", "janitor", "fix", "it"]);
        assert!(bad.role.is_none());
        assert_eq!(bad.task, "fix it");
    }

    #[test]
    fn auto_approve_defaults_to_low() {
        let opts = parse(&["--auto-approve"]);
        assert_eq!(opts.auto_approve, Some(RiskLevel::Low));

        let opts = parse(&["--auto-approve", "medium"]);
        assert_eq!(opts.auto_approve, Some(RiskLevel::Medium));
    }

    #[test]
    fn optional_value_does_not_eat_the_next_flag() {
        let opts = parse(&["--auto-approve", "--plan", "tidy", "up"]);
        assert_eq!(opts.auto_approve, Some(RiskLevel::Low));
        assert!(opts.plan);
        assert_eq!(opts.task, "tidy up");
    }

    #[test]
    fn retry_defaults_to_one() {
        assert_eq!(parse(&["--retry"]).retry, Some(1));
        assert_eq!(parse(&["--retry", "3"]).retry, Some(3));
        assert_eq!(parse(&["--retry", "lots"]).retry, Some(1));
    }

    #[test]
    fn diff_base_bare_means_auto_detect() {
        assert_eq!(parse(&["--diff-base"]).diff_base, Some(String::new()));
        assert_eq!(
            parse(&["--diff-base", "main"]).diff_base,
            Some("main".to_string())
        );
    }

    #[test]
    fn value_flag_at_end_of_input_is_dropped() {
        let opts = parse(&["investigate", "--model"]);
        assert!(opts.model.is_none());
        assert_eq!(opts.task, "investigate");
    }

    #[test]
    fn listing_and_resume_flags() {
        let opts = parse(&["--list-sessions"]);
        assert!(opts.list_sessions);

        let opts = parse(&["--resume", "k4mp2xyz"]);
        assert_eq!(opts.resume.as_deref(), Some("k4mp2xyz"));

        let opts = parse(&["--list-logs", "--list-roles", "-h"]);
        assert!(opts.list_logs && opts.list_roles && opts.help);
    }

    #[test]
    fn carried_flags_parse_without_side_effects() {
        let opts = parse(&[
            "--validate",
            "cargo test",
            "--shadow",
            "--auto-validate",
            "--commit",
            "--auto",
            "ship",
            "it",
        ]);
        assert_eq!(opts.validate_cmd.as_deref(), Some("cargo test"));
        assert!(opts.shadow && opts.auto_validate && opts.commit && opts.auto_dispatch);
        assert_eq!(opts.task, "ship it");
    }

    #[test]
    fn unknown_dashed_tokens_join_the_task() {
        let opts = parse(&["--frobnicate", "the", "cache"]);
        assert_eq!(opts.task, "--frobnicate the cache");
    }
}

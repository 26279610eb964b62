use anyhow::{Result, anyhow};
use spelunk_agent::{
    AgentEngine, AgentOutcome, ApprovalHandler, AskHandler, RunSettings, SessionReport,
};
use spelunk_core::{AppConfig, Role};
use spelunk_llm::HttpModelClient;
use spelunk_parser::cli::{CliOptions, parse_cli};
use spelunk_store::Store;
use spelunk_tools::BinaryHost;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

const USAGE: &str = "\
spelunk - a turn-based code investigation agent

USAGE:
  spelunk [OPTIONS] <task...>
  spelunk --resume ID [OPTIONS]

The task is free text; any word not recognized as a flag joins it.

ROLES AND MODES:
  --investigate          investigator role, state machine on
  --audit                auditor role, state machine on
  --refactor             refactorer role, state machine on, plan first
  --role NAME            set the role without implying anything else
  --auto                 classify the task to pick a role
  --machine              cycle planner/explorer/evaluator states
  --plan                 start with a planning turn

SESSIONS:
  --resume ID            continue a checkpointed session
  --list-sessions        checkpointed sessions, newest first
  --list-logs            session activity logs, newest first
  --list-roles           describe the available roles

MODEL:
  --provider NAME        deepseek, openai or openrouter
  --model NAME           model id override
  --max-turns N          turn budget for this run (default 15)

APPROVAL AND OUTPUT:
  --auto-approve [LEVEL] apply edits at or below LEVEL without asking;
                         low, medium or high (bare flag means low)
  --non-interactive      never prompt; unapproved edits are denied
  --explain              verbose progress on stderr
  -h, --help             this text

Accepted, no effect in this build:
  --validate CMD   --shadow   --auto-validate   --commit
  --retry [N]      --diff-base [REF]
";

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = parse_cli(&args);
    let cwd = std::env::current_dir()?;

    if opts.help {
        print!("{USAGE}");
        return Ok(());
    }
    if opts.list_roles {
        list_roles();
        return Ok(());
    }
    if opts.list_sessions {
        list_sessions(&cwd);
        return Ok(());
    }
    if opts.list_logs {
        list_logs(&cwd);
        return Ok(());
    }
    if opts.resume.is_none() && opts.task.trim().is_empty() {
        return Err(anyhow!("nothing to do: give a task or --resume ID (see --help)"));
    }
    warn_inert_flags(&opts);

    let mut engine = build_engine(&cwd, &opts)?;
    engine.set_verbose(opts.explain);
    if !opts.non_interactive {
        engine.set_approver(stdin_approver());
        engine.set_ask_handler(stdin_ask_handler());
    }

    let settings = RunSettings {
        role: opts.role,
        auto_role: opts.auto_dispatch,
        machine: opts.machine,
        plan_first: opts.plan.then_some(true),
    };
    let report = match opts.resume.as_deref() {
        Some(session_id) => engine.resume(session_id, &settings)?,
        None => engine.run(&opts.task, &settings)?,
    };

    print_report(&report);
    if matches!(report.outcome, AgentOutcome::Blocked(_)) {
        std::process::exit(1);
    }
    Ok(())
}

/// Engine on the workspace config with per-invocation flag overrides
/// applied. Overrides are not written back to the config file.
fn build_engine(workspace: &Path, opts: &CliOptions) -> Result<AgentEngine> {
    let mut cfg = AppConfig::ensure(workspace)?;
    if let Some(provider) = opts.provider.as_deref() {
        cfg.llm.apply_provider(provider);
    }
    if let Some(model) = opts.model.as_deref() {
        cfg.llm.model = model.to_string();
    }
    if let Some(max_turns) = opts.max_turns {
        cfg.agent.max_turns = max_turns;
    }
    if let Some(level) = opts.auto_approve {
        cfg.agent.auto_approve = Some(level);
    }

    let model = Arc::new(HttpModelClient::new(cfg.llm.clone())?);
    let host = Arc::new(BinaryHost::from_config(workspace, &cfg.tools));
    AgentEngine::with_components(workspace, cfg, model, host)
}

fn list_roles() {
    for &role in Role::ALL {
        println!("{:<14} {}", role.as_str(), role_summary(role));
    }
}

fn role_summary(role: Role) -> &'static str {
    match role {
        Role::Investigator => "answers questions about how the code works",
        Role::Auditor => "sweeps for security and correctness problems",
        Role::Refactorer => "plans first, then makes focused edits",
    }
}

fn list_sessions(workspace: &Path) {
    let store = Store::new(workspace);
    let ids = store.list_sessions();
    if ids.is_empty() {
        println!("No sessions yet.");
        return;
    }
    for id in ids {
        match store.load_checkpoint(&id) {
            Ok(session) => println!("{id}  turn {:<3} {}", session.turn, session.task),
            Err(_) => println!("{id}  (unreadable checkpoint)"),
        }
    }
}

fn list_logs(workspace: &Path) {
    let store = Store::new(workspace);
    let ids = store.list_logs();
    if ids.is_empty() {
        println!("No session logs yet.");
        return;
    }
    for id in ids {
        println!("{}", store.log_path(&id).display());
    }
}

/// Flags from the option surface whose pipelines live outside this
/// binary. They parse cleanly so scripts keep working, and warn so
/// nobody relies on them silently.
fn warn_inert_flags(opts: &CliOptions) {
    let inert: &[(&str, bool)] = &[
        ("--validate", opts.validate_cmd.is_some()),
        ("--shadow", opts.shadow),
        ("--auto-validate", opts.auto_validate),
        ("--commit", opts.commit),
        ("--retry", opts.retry.is_some()),
        ("--diff-base", opts.diff_base.is_some()),
    ];
    for (flag, set) in inert {
        if *set {
            eprintln!("warning: {flag} has no effect in this build");
        }
    }
}

fn print_report(report: &SessionReport) {
    eprintln!(
        "session {} finished after {} turn(s)",
        report.session_id, report.turns
    );
    match &report.outcome {
        AgentOutcome::Answered(text) => println!("{text}"),
        AgentOutcome::MaxTurns(progress) => {
            println!("Stopped at the turn limit.");
            if !progress.trim().is_empty() {
                println!("Progress so far: {progress}");
            }
            println!(
                "Continue with: spelunk --resume {} --max-turns <N>",
                report.session_id
            );
        }
        AgentOutcome::Blocked(reason) => println!("Blocked: {reason}"),
    }
}

fn stdin_approver() -> ApprovalHandler {
    Box::new(|edit, assessment| {
        eprintln!(
            "proposed {} on {} (risk {}: {})",
            edit.action.as_str(),
            edit.target,
            assessment.level,
            assessment.reason
        );
        prompt("apply it? [y/N] ")
            .is_some_and(|reply| reply.eq_ignore_ascii_case("y") || reply.eq_ignore_ascii_case("yes"))
    })
}

fn stdin_ask_handler() -> AskHandler {
    Box::new(|question| {
        eprintln!("the agent asks: {question}");
        prompt("> ")
    })
}

/// One trimmed line from stdin. `None` on EOF, a read error or an empty
/// reply.
fn prompt(text: &str) -> Option<String> {
    eprint!("{text}");
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => {
            let trimmed = line.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
    }
}

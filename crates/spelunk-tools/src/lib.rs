//! Bridge to the external primitives binary.
//!
//! The engine never touches files or parses syntax itself; every `view`,
//! `edit` and `analyze` style command is handed to a sibling binary through
//! a shell, and only the text that comes back matters. Failures become
//! failed [`TurnOutput`]s rather than errors, so the recovery policy can
//! react to them.

use anyhow::{Context, Result};
use spelunk_core::{Command as DslCommand, ToolsConfig, TurnOutput};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Where primitive commands go. The turn loop only sees this trait; tests
/// substitute a scripted host.
pub trait PrimitiveHost {
    /// Runs one command and reports its output. Never errors: a host that
    /// cannot run the command reports a failed output instead.
    fn execute(&self, cmd: &DslCommand) -> TurnOutput;

    /// Asks the host to restore the workspace to its last good state.
    fn rollback(&self) -> TurnOutput;
}

/// What one shell invocation came back with. `output` already interleaves
/// stdout and stderr the way the model should see them.
#[derive(Debug, Clone)]
pub struct ShellOutcome {
    pub status: Option<i32>,
    pub output: String,
    pub timed_out: bool,
}

/// Runs `line` through the platform shell in `cwd`, killing the child when
/// `timeout` expires. A timed-out child still yields whatever output it
/// managed to write before the kill.
pub fn run_shell(line: &str, cwd: &Path, timeout: Duration) -> Result<ShellOutcome> {
    let mut child = platform_shell(line)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn '{line}' in '{}'", cwd.display()))?;

    let timed_out = child.wait_timeout(timeout)?.is_none();
    if timed_out {
        child.kill()?;
    }
    let raw = child.wait_with_output()?;
    Ok(ShellOutcome {
        status: raw.status.code(),
        output: merge_output(
            &String::from_utf8_lossy(&raw.stdout),
            &String::from_utf8_lossy(&raw.stderr),
        ),
        timed_out,
    })
}

#[cfg(target_os = "windows")]
fn platform_shell(line: &str) -> Command {
    let mut shell = Command::new("cmd");
    shell.arg("/C").arg(line);
    shell
}

#[cfg(not(target_os = "windows"))]
fn platform_shell(line: &str) -> Command {
    let mut shell = Command::new("sh");
    shell.arg("-c").arg(line);
    shell
}

/// Stdout first, stderr appended. Primitives write diagnostics to stderr
/// even on success and the model should see both.
fn merge_output(stdout: &str, stderr: &str) -> String {
    let out = stdout.trim_end();
    let err = stderr.trim_end();
    match (out.is_empty(), err.is_empty()) {
        (false, false) => format!("{out}\n{err}"),
        (true, false) => err.to_string(),
        _ => out.to_string(),
    }
}

// ── Binary-backed host ───────────────────────────────────────────────────────

/// Forwards each command to the configured primitives binary as
/// `<bin> <name> <args>` and interprets the exit status.
pub struct BinaryHost {
    workspace: PathBuf,
    bin: String,
    timeout: Duration,
}

impl BinaryHost {
    #[must_use]
    pub fn new(workspace: &Path, bin: &str, timeout: Duration) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            bin: bin.to_string(),
            timeout,
        }
    }

    #[must_use]
    pub fn from_config(workspace: &Path, cfg: &ToolsConfig) -> Self {
        Self::new(
            workspace,
            &cfg.primitives_bin,
            Duration::from_secs(cfg.timeout_seconds),
        )
    }

    fn run(&self, display_cmd: &str, line: &str) -> TurnOutput {
        match run_shell(line, &self.workspace, self.timeout) {
            Ok(res) if res.timed_out => TurnOutput::failed(
                display_cmd,
                format!("command timed out after {:?}", self.timeout),
            ),
            Ok(res) if res.status == Some(0) => TurnOutput::ok(display_cmd, res.output),
            Ok(res) if res.output.is_empty() => {
                let status = res
                    .status
                    .map_or_else(|| "killed".to_string(), |code| code.to_string());
                TurnOutput::failed(display_cmd, format!("exit status {status}"))
            }
            Ok(res) => TurnOutput::failed(display_cmd, res.output),
            Err(err) => TurnOutput::failed(display_cmd, err.to_string()),
        }
    }
}

impl PrimitiveHost for BinaryHost {
    fn execute(&self, cmd: &DslCommand) -> TurnOutput {
        self.run(&cmd.full, &format!("{} {}", self.bin, cmd.full))
    }

    fn rollback(&self) -> TurnOutput {
        self.run("rollback", &format!("{} rollback", self.bin))
    }
}

// ── Null host ────────────────────────────────────────────────────────────────

/// Host for modes that must not touch the workspace. Every command fails
/// with an explanation instead of executing.
#[derive(Debug, Default)]
pub struct NullHost;

impl PrimitiveHost for NullHost {
    fn execute(&self, cmd: &DslCommand) -> TurnOutput {
        TurnOutput::failed(
            &cmd.full,
            "no primitives host is configured; command not executed",
        )
    }

    fn rollback(&self) -> TurnOutput {
        TurnOutput::failed("rollback", "no primitives host is configured")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_runs_a_command() {
        let out = run_shell("echo spelunk", Path::new("."), Duration::from_secs(2))
            .expect("run command");
        assert!(!out.timed_out);
        assert_eq!(out.status, Some(0));
        assert!(out.output.contains("spelunk"));
    }

    #[cfg(unix)]
    #[test]
    fn shell_merges_stderr_into_the_output() {
        let out = run_shell(
            "echo out; echo err >&2",
            Path::new("."),
            Duration::from_secs(2),
        )
        .expect("run command");
        assert_eq!(out.status, Some(0));
        assert_eq!(out.output, "out\nerr");
    }

    #[cfg(unix)]
    #[test]
    fn shell_kills_at_the_timeout() {
        let out = run_shell("sleep 5", Path::new("."), Duration::from_millis(150))
            .expect("run command");
        assert!(out.timed_out);
        assert_eq!(out.status, None);
    }

    #[test]
    fn merge_prefers_both_streams() {
        assert_eq!(merge_output("out\n", "err\n"), "out\nerr");
        assert_eq!(merge_output("", "err"), "err");
        assert_eq!(merge_output("out", ""), "out");
        assert_eq!(merge_output("", ""), "");
    }

    #[test]
    fn binary_host_reports_success_with_stdout() {
        let host = BinaryHost::new(Path::new("."), "echo", Duration::from_secs(2));
        let out = host.execute(&DslCommand::new("read", "src/main.rs"));
        assert!(out.success);
        assert_eq!(out.cmd, "read src/main.rs");
        assert_eq!(out.content, "read src/main.rs");
    }

    #[cfg(unix)]
    #[test]
    fn binary_host_reports_failure_with_exit_status() {
        let host = BinaryHost::new(Path::new("."), "false", Duration::from_secs(2));
        let out = host.execute(&DslCommand::new("read", "src/main.rs"));
        assert!(!out.success);
        assert!(out.content.contains("exit status 1"), "got: {}", out.content);
    }

    #[cfg(unix)]
    #[test]
    fn binary_host_reports_a_missing_binary() {
        let host = BinaryHost::new(
            Path::new("."),
            "spelunk-no-such-bin",
            Duration::from_secs(2),
        );
        let out = host.execute(&DslCommand::new("view", "src/lib.rs"));
        assert!(!out.success);
        assert!(out.content.contains("not found"), "got: {}", out.content);
    }

    #[cfg(unix)]
    #[test]
    fn binary_host_reports_timeouts() {
        let host = BinaryHost::new(Path::new("."), "sleep", Duration::from_millis(150));
        let out = host.execute(&DslCommand::new("3", ""));
        assert!(!out.success);
        assert!(out.content.contains("timed out"), "got: {}", out.content);
    }

    #[test]
    fn binary_host_rollback_invokes_the_binary() {
        let host = BinaryHost::new(Path::new("."), "echo", Duration::from_secs(2));
        let out = host.rollback();
        assert!(out.success);
        assert_eq!(out.cmd, "rollback");
        assert_eq!(out.content, "rollback");
    }

    #[test]
    fn null_host_never_executes() {
        let host = NullHost;
        let out = host.execute(&DslCommand::new("delete", "src/main.rs"));
        assert!(!out.success);
        assert!(out.content.contains("not executed"));
        assert!(!host.rollback().success);
    }
}

//! Scripted collaborators for driving the turn loop in tests.
//!
//! The loop's two external seams are the model client and the primitives
//! host; both get deterministic fakes here so every control-flow path can
//! be exercised without a network or a primitives binary.

use anyhow::{Result, anyhow};
use spelunk_agent::AgentEngine;
use spelunk_core::{AppConfig, Command, ModelRequest, TurnOutput};
use spelunk_llm::ModelClient;
use spelunk_tools::PrimitiveHost;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Scripted model ───────────────────────────────────────────────────────────

/// Replays canned replies in order and records every request it saw.
/// Running past the script is an error, same as a network failure.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    #[must_use]
    pub fn new<S: Into<String>>(replies: Vec<S>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replies not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    /// Every request the loop sent, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ModelClient for ScriptedModel {
    fn complete(&self, req: &ModelRequest) -> Result<String> {
        self.requests.lock().unwrap().push(req.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no more scripted replies"))
    }
}

// ── Scripted host ────────────────────────────────────────────────────────────

/// Primitives host that replays scripted outputs, echoing successes once
/// the script runs out. Records executed command lines and rollbacks.
pub struct ScriptedHost {
    outputs: Mutex<VecDeque<TurnOutput>>,
    executed: Mutex<Vec<String>>,
    rollbacks: AtomicUsize,
}

impl ScriptedHost {
    #[must_use]
    pub fn new(outputs: Vec<TurnOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            executed: Mutex::new(Vec::new()),
            rollbacks: AtomicUsize::new(0),
        }
    }

    /// Host with no script: every command succeeds and echoes itself.
    #[must_use]
    pub fn echoing() -> Self {
        Self::new(Vec::new())
    }

    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    #[must_use]
    pub fn rollback_count(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

impl PrimitiveHost for ScriptedHost {
    fn execute(&self, cmd: &Command) -> TurnOutput {
        self.executed.lock().unwrap().push(cmd.full.clone());
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| TurnOutput::ok(&cmd.full, format!("ran {}", cmd.full)))
    }

    fn rollback(&self) -> TurnOutput {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        TurnOutput::ok("rollback", "workspace restored")
    }
}

// ── Workspace helper ─────────────────────────────────────────────────────────

/// Fresh throwaway workspace. Keep the [`TempDir`] alive for the duration
/// of the test; the directory is removed when it drops.
#[must_use]
pub fn temp_workspace() -> (TempDir, PathBuf) {
    let dir = tempfile::Builder::new()
        .prefix("spelunk-test-")
        .tempdir()
        .expect("temp workspace");
    let path = dir.path().to_path_buf();
    (dir, path)
}

// ── Engine harness ───────────────────────────────────────────────────────────

/// Engine wired to a scripted model and an echoing host, on default
/// config. Returns both fakes so tests can inspect the traffic afterwards.
pub fn scripted_engine(
    workspace: &Path,
    replies: Vec<&str>,
) -> Result<(AgentEngine, Arc<ScriptedModel>, Arc<ScriptedHost>)> {
    scripted_engine_with_host(workspace, replies, ScriptedHost::echoing())
}

/// Same as [`scripted_engine`] but with a caller-supplied host script,
/// for failure and rollback scenarios.
pub fn scripted_engine_with_host(
    workspace: &Path,
    replies: Vec<&str>,
    host: ScriptedHost,
) -> Result<(AgentEngine, Arc<ScriptedModel>, Arc<ScriptedHost>)> {
    let model = Arc::new(ScriptedModel::new(replies));
    let host = Arc::new(host);
    let engine =
        AgentEngine::with_components(workspace, AppConfig::default(), model.clone(), host.clone())?;
    Ok((engine, model, host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spelunk_agent::RunSettings;

    #[test]
    fn scripted_model_replays_in_order_then_errors() {
        let model = ScriptedModel::new(vec!["first", "second"]);
        let req = ModelRequest {
            system: "s".to_string(),
            user: "u".to_string(),
        };
        assert_eq!(model.complete(&req).expect("first"), "first");
        assert_eq!(model.complete(&req).expect("second"), "second");
        let err = model.complete(&req).expect_err("script exhausted");
        assert!(err.to_string().contains("no more scripted replies"));
        assert_eq!(model.requests().len(), 3);
    }

    #[test]
    fn scripted_host_echoes_after_the_script_runs_out() {
        let host = ScriptedHost::new(vec![TurnOutput::failed("read x", "no such file")]);
        let first = host.execute(&Command::new("read", "x"));
        assert!(!first.success);
        let second = host.execute(&Command::new("grep", "load"));
        assert!(second.success);
        assert_eq!(second.content, "ran grep load");
        assert_eq!(host.executed(), vec!["read x".to_string(), "grep load".to_string()]);
    }

    #[test]
    fn scripted_host_counts_rollbacks() {
        let host = ScriptedHost::echoing();
        assert_eq!(host.rollback_count(), 0);
        assert!(host.rollback().success);
        assert_eq!(host.rollback_count(), 1);
    }

    #[test]
    fn temp_workspace_exists_until_dropped() {
        let (dir, path) = temp_workspace();
        assert!(path.exists());
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn scripted_engine_drives_a_whole_session() {
        let (_dir, ws) = temp_workspace();
        let (mut engine, model, host) =
            scripted_engine(&ws, vec!["$(answer hi)"]).expect("engine");
        let report = engine.run("ping", &RunSettings::default()).expect("run");
        assert_eq!(report.turns, 1);
        assert_eq!(model.remaining(), 0);
        assert!(host.executed().is_empty());
    }
}

//! Session orchestration: the engine that drives model turns.
//!
//! [`AgentEngine`] owns the collaborators (model client, primitives host,
//! session store, risk policy, observer) and drives the turn loop until
//! the model answers, gives up, or the turn budget runs out. Interactive
//! concerns (edit approval, user questions) are injected as handlers so
//! the engine itself never touches a terminal.

mod classify;
mod machine;
mod recovery;
pub mod roles;
mod turn;

pub use classify::classify_role;
pub use machine::{Machine, StateConfig, state_config};
pub use recovery::RecoveryAction;

use anyhow::Result;
use spelunk_core::{AppConfig, ProposedEdit, Role};
use spelunk_llm::{HttpModelClient, ModelClient};
use spelunk_observe::Observer;
use spelunk_policy::{RiskAssessment, RiskPolicy};
use spelunk_store::Store;
use spelunk_tools::{BinaryHost, PrimitiveHost};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Decides whether an assessed edit may go ahead.
pub type ApprovalHandler = Box<dyn FnMut(&ProposedEdit, &RiskAssessment) -> bool>;

/// Produces the user's reply to an `ask` command, or `None` when nobody
/// can answer.
pub type AskHandler = Box<dyn FnMut(&str) -> Option<String>>;

/// How the caller configured a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSettings {
    /// Explicit role. `None` means the investigator, unless `auto_role`
    /// classifies the task first.
    pub role: Option<Role>,
    /// Pick the role by classifying the task with one model call.
    pub auto_role: bool,
    /// Cycle planner/explorer/evaluator states instead of running the
    /// explorer every turn.
    pub machine: bool,
    /// Overrides the role's plan-first default. Machine mode only.
    pub plan_first: Option<bool>,
}

/// Why a session stopped, with the model's closing text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    /// The model delivered an answer or closing summary.
    Answered(String),
    /// The turn budget ran out; carries the recorded progress.
    MaxTurns(String),
    /// Recovery was exhausted; carries the explanation.
    Blocked(String),
}

impl AgentOutcome {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Answered(_) => "answered",
            Self::MaxTurns(_) => "max_turns",
            Self::Blocked(_) => "blocked",
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Answered(text) | Self::MaxTurns(text) | Self::Blocked(text) => text,
        }
    }
}

/// Summary of one finished run.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub turns: u32,
    pub outcome: AgentOutcome,
}

pub struct AgentEngine {
    pub(crate) workspace: PathBuf,
    pub(crate) cfg: AppConfig,
    pub(crate) store: Store,
    pub(crate) observer: Observer,
    pub(crate) policy: RiskPolicy,
    pub(crate) model: Arc<dyn ModelClient>,
    pub(crate) host: Arc<dyn PrimitiveHost>,
    pub(crate) approver: Option<ApprovalHandler>,
    pub(crate) ask_handler: Option<AskHandler>,
}

impl AgentEngine {
    /// Engine wired to the real HTTP client and primitives binary, with
    /// the workspace's config (written with defaults on first run).
    pub fn new(workspace: &Path) -> Result<Self> {
        let cfg = AppConfig::ensure(workspace)?;
        let model = Arc::new(HttpModelClient::new(cfg.llm.clone())?);
        let host = Arc::new(BinaryHost::from_config(workspace, &cfg.tools));
        Self::with_components(workspace, cfg, model, host)
    }

    /// Engine around injected collaborators. Tests pass scripted doubles;
    /// the CLI passes a client built from an overridden config.
    pub fn with_components(
        workspace: &Path,
        cfg: AppConfig,
        model: Arc<dyn ModelClient>,
        host: Arc<dyn PrimitiveHost>,
    ) -> Result<Self> {
        let observer = Observer::new(workspace)?;
        Ok(Self {
            workspace: workspace.to_path_buf(),
            store: Store::new(workspace),
            policy: RiskPolicy::new(&cfg.policy),
            cfg,
            observer,
            model,
            host,
            approver: None,
            ask_handler: None,
        })
    }

    pub fn set_approver(&mut self, approver: ApprovalHandler) {
        self.approver = Some(approver);
    }

    pub fn set_ask_handler(&mut self, handler: AskHandler) {
        self.ask_handler = Some(handler);
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.observer.set_verbose(verbose);
    }
}

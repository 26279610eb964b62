use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub type Result<T> = anyhow::Result<T>;

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".spelunk")
}

// ── Commands and outputs ───────────────────────────────────────────────

/// One `$(name args)` directive extracted from a model reply.
///
/// `full` is the exact text handed to the primitives host: name and args
/// joined by a single space, even when `args` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: String,
    pub full: String,
}

impl Command {
    #[must_use]
    pub fn new(name: &str, args: &str) -> Self {
        Self {
            name: name.to_string(),
            args: args.to_string(),
            full: format!("{name} {args}"),
        }
    }
}

/// The result of executing one command within a turn. Outputs live for a
/// single turn unless the model keeps them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutput {
    pub cmd: String,
    pub content: String,
    pub success: bool,
}

impl TurnOutput {
    #[must_use]
    pub fn ok(cmd: &str, content: impl Into<String>) -> Self {
        Self {
            cmd: cmd.to_string(),
            content: content.into(),
            success: true,
        }
    }

    #[must_use]
    pub fn failed(cmd: &str, content: impl Into<String>) -> Self {
        Self {
            cmd: cmd.to_string(),
            content: content.into(),
            success: false,
        }
    }
}

// ── Working memory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Note,
    Output,
}

/// A durable entry in a session's working memory. Immutable once created;
/// removed only by an explicit forget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl MemoryItem {
    #[must_use]
    pub fn note(id: String, content: &str) -> Self {
        Self {
            kind: MemoryKind::Note,
            id,
            content: content.to_string(),
            cmd: None,
            success: None,
        }
    }

    #[must_use]
    pub fn kept_output(id: String, output: &TurnOutput) -> Self {
        Self {
            kind: MemoryKind::Output,
            id,
            content: output.content.clone(),
            cmd: Some(output.cmd.clone()),
            success: Some(output.success),
        }
    }
}

// ── Sessions and checkpoints ───────────────────────────────────────────

/// Live state of one investigation. The persisted form is [`Checkpoint`].
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub task: String,
    pub turn: u32,
    pub working_memory: Vec<MemoryItem>,
    pub progress: String,
    pub open_questions: String,
}

impl Session {
    #[must_use]
    pub fn new(id: String, task: &str) -> Self {
        Self {
            id,
            task: task.to_string(),
            turn: 0,
            working_memory: Vec::new(),
            progress: String::new(),
            open_questions: String::new(),
        }
    }
}

/// On-disk JSON form of a session. The field set is a published contract:
/// readers ignore unknown extra fields and default the optional ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub task: String,
    pub turn: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub working_memory: Vec<MemoryItem>,
    #[serde(default)]
    pub progress: String,
    #[serde(default)]
    pub open_questions: String,
}

impl Checkpoint {
    #[must_use]
    pub fn of(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            task: session.task.clone(),
            turn: session.turn,
            timestamp: Utc::now(),
            working_memory: session.working_memory.clone(),
            progress: session.progress.clone(),
            open_questions: session.open_questions.clone(),
        }
    }

    #[must_use]
    pub fn into_session(self) -> Session {
        Session {
            id: self.session_id,
            task: self.task,
            turn: self.turn,
            working_memory: self.working_memory,
            progress: self.progress,
            open_questions: self.open_questions,
        }
    }
}

// ── Roles and machine states ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Investigator,
    Auditor,
    Refactorer,
}

impl Role {
    pub const ALL: &'static [Role] = &[Role::Investigator, Role::Auditor, Role::Refactorer];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Investigator => "investigator",
            Self::Auditor => "auditor",
            Self::Refactorer => "refactorer",
        }
    }

    /// Whether this role starts with a planning turn by default.
    #[must_use]
    pub fn plan_first(&self) -> bool {
        matches!(self, Self::Refactorer)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "investigator" | "investigate" => Ok(Self::Investigator),
            "auditor" | "audit" => Ok(Self::Auditor),
            "refactorer" | "refactor" => Ok(Self::Refactorer),
            other => Err(anyhow::anyhow!(
                "invalid role '{}' (expected investigator|auditor|refactorer)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Planner,
    Explorer,
    Evaluator,
    Done,
}

impl MachineState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Explorer => "explorer",
            Self::Evaluator => "evaluator",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Legal moves in the role state machine. The working cycle is
/// planner → explorer → evaluator → explorer; `Done` is terminal and
/// reachable from any working state.
#[must_use]
pub fn is_valid_state_transition(from: MachineState, to: MachineState) -> bool {
    match from {
        MachineState::Planner => matches!(to, MachineState::Explorer | MachineState::Done),
        MachineState::Explorer => matches!(to, MachineState::Evaluator | MachineState::Done),
        MachineState::Evaluator => matches!(to, MachineState::Explorer | MachineState::Done),
        MachineState::Done => false,
    }
}

/// Which context renderer a machine state uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    TaskOnly,
    LastOutputs,
    WorkingMemory,
}

// ── Risk and edits ─────────────────────────────────────────────────────

/// Ordered by severity: `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(anyhow::anyhow!(
                "invalid risk level '{}' (expected low|medium|high)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditAction {
    Delete,
    Replace,
    Insert,
}

impl EditAction {
    /// Maps a command name onto an edit action. Returns `None` for
    /// non-edit commands.
    #[must_use]
    pub fn from_command_name(name: &str) -> Option<Self> {
        match name {
            "delete" => Some(Self::Delete),
            "replace" => Some(Self::Replace),
            "insert" => Some(Self::Insert),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Replace => "replace",
            Self::Insert => "insert",
        }
    }
}

/// An edit the model asked for, split into action, target path/symbol and
/// the content that would land there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedEdit {
    pub action: EditAction,
    pub target: String,
    pub content: String,
}

impl ProposedEdit {
    /// Builds an edit from an edit-family command: the first whitespace
    /// token of `args` is the target, the rest is content.
    #[must_use]
    pub fn from_command(action: EditAction, args: &str) -> Self {
        let trimmed = args.trim();
        let (target, content) = match trimmed.find(char::is_whitespace) {
            Some(pos) => (&trimmed[..pos], trimmed[pos..].trim_start()),
            None => (trimmed, ""),
        };
        Self {
            action,
            target: target.to_string(),
            content: content.to_string(),
        }
    }
}

// ── Error recovery ─────────────────────────────────────────────────────

/// Tracks one active repair loop. Exists only while a command is failing;
/// cleared when that command succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorState {
    pub cmd: String,
    pub retries: u32,
    pub rolled_back: bool,
    pub last_error: Option<String>,
}

impl ErrorState {
    #[must_use]
    pub fn new(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            retries: 0,
            rolled_back: false,
            last_error: None,
        }
    }
}

// ── Model wire types ───────────────────────────────────────────────────

/// One self-contained model call: system template plus rendered context.
/// Every turn is a fresh call; nothing else is carried over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub system: String,
    pub user: String,
}

// ── Configuration ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub policy: PolicySettings,
    pub tools: ToolsConfig,
}

impl AppConfig {
    pub fn config_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("config.toml")
    }

    pub fn load(workspace: &Path) -> Result<Self> {
        let path = Self::config_path(workspace);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Loads the config, writing the default file first when none exists.
    pub fn ensure(workspace: &Path) -> Result<Self> {
        let path = Self::config_path(workspace);
        if path.exists() {
            return Self::load(workspace);
        }
        let cfg = Self::default();
        cfg.save(workspace)?;
        Ok(cfg)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::config_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid config path"))?,
        )?;
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub max_retries: u8,
    pub retry_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            endpoint: "https://api.deepseek.com/chat/completions".to_string(),
            api_key: None,
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            temperature: 0.2,
            max_tokens: 4096,
            timeout_seconds: 120,
            max_retries: 3,
            retry_base_ms: 400,
        }
    }
}

impl LlmConfig {
    /// Switches endpoint, key env var and default model to a known
    /// provider. Unknown names only change the provider label.
    pub fn apply_provider(&mut self, provider: &str) {
        let normalized = provider.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "deepseek" => {
                self.endpoint = "https://api.deepseek.com/chat/completions".to_string();
                self.api_key_env = "DEEPSEEK_API_KEY".to_string();
                self.model = "deepseek-chat".to_string();
            }
            "openai" => {
                self.endpoint = "https://api.openai.com/v1/chat/completions".to_string();
                self.api_key_env = "OPENAI_API_KEY".to_string();
                self.model = "gpt-4o-mini".to_string();
            }
            "openrouter" => {
                self.endpoint = "https://openrouter.ai/api/v1/chat/completions".to_string();
                self.api_key_env = "OPENROUTER_API_KEY".to_string();
            }
            _ => {}
        }
        self.provider = normalized;
    }
}

fn default_max_turns() -> u32 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Highest risk level applied without confirmation. `None` means
    /// every edit needs an interactive approval.
    pub auto_approve: Option<RiskLevel>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            auto_approve: None,
        }
    }
}

/// Extension points for the risk rule table. Entries here are added to
/// the built-in sets, never replacing them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PolicySettings {
    pub extra_config_extensions: Vec<String>,
    pub extra_entry_points: Vec<String>,
}

fn default_primitives_bin() -> String {
    "spelunk-primitives".to_string()
}

fn default_tool_timeout_seconds() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Sibling binary that implements the view/edit/analyze primitives.
    #[serde(default = "default_primitives_bin")]
    pub primitives_bin: String,
    #[serde(default = "default_tool_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            primitives_bin: default_primitives_bin(),
            timeout_seconds: default_tool_timeout_seconds(),
        }
    }
}

//! Risk classification for proposed edits.
//!
//! Assessment walks an ordered rule table and stops at the first match,
//! so rule order is part of the contract: destructive actions and
//! sensitive targets outrank content heuristics.

use serde::Serialize;
use spelunk_core::{EditAction, PolicySettings, ProposedEdit, RiskLevel};

/// Outcome of classifying one edit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub reason: String,
}

impl RiskAssessment {
    fn of(level: RiskLevel, reason: &str) -> Self {
        Self {
            level,
            reason: reason.to_string(),
        }
    }
}

const CONFIG_EXTENSIONS: &[&str] = &[
    "toml", "yaml", "yml", "json", "ini", "cfg", "conf", "lock", "env", "properties",
];

const BUILD_FILES: &[&str] = &[
    "makefile",
    "dockerfile",
    "cargo.toml",
    "package.json",
    "cmakelists.txt",
    "build.gradle",
    "pom.xml",
    "go.mod",
    "setup.py",
    "pyproject.toml",
    "gemfile",
    "rakefile",
];

const ENTRY_POINTS: &[&str] = &[
    "main.rs", "main.go", "main.py", "main.c", "main.cpp", "main.java", "main.ts", "index.js",
    "index.ts", "app.py", "app.js", "server.js", "lib.rs",
];

const VISIBILITY_KEYWORDS: &[&str] = &["pub", "public", "export"];

const COMMENT_MARKERS: &[&str] = &["//", "#", "/*", "--", "<!--"];

struct Rule {
    applies: fn(&RiskPolicy, &ProposedEdit) -> bool,
    level: RiskLevel,
    reason: &'static str,
}

/// First match wins; the table ends with a catch-all.
const RULES: &[Rule] = &[
    Rule {
        applies: |_, edit| edit.action == EditAction::Delete,
        level: RiskLevel::High,
        reason: "deletes existing code",
    },
    Rule {
        applies: RiskPolicy::targets_config_or_build_file,
        level: RiskLevel::High,
        reason: "touches a configuration or build file",
    },
    Rule {
        applies: RiskPolicy::targets_entry_point,
        level: RiskLevel::High,
        reason: "touches an entry-point file",
    },
    Rule {
        applies: |_, edit| starts_with_visibility_keyword(&edit.content),
        level: RiskLevel::High,
        reason: "changes a public symbol",
    },
    Rule {
        applies: |_, edit| starts_with_comment_marker(&edit.content),
        level: RiskLevel::Low,
        reason: "comment-only change",
    },
    Rule {
        applies: |_, edit| edit.action == EditAction::Insert,
        level: RiskLevel::Low,
        reason: "adds code without modifying existing lines",
    },
    Rule {
        applies: |_, _| true,
        level: RiskLevel::Medium,
        reason: "modifies existing code",
    },
];

#[derive(Debug, Clone, Default)]
pub struct RiskPolicy {
    extra_config_extensions: Vec<String>,
    extra_entry_points: Vec<String>,
}

impl RiskPolicy {
    pub fn new(settings: &PolicySettings) -> Self {
        Self {
            extra_config_extensions: settings
                .extra_config_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            extra_entry_points: settings
                .extra_entry_points
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn assess(&self, edit: &ProposedEdit) -> RiskAssessment {
        for rule in RULES {
            if (rule.applies)(self, edit) {
                return RiskAssessment::of(rule.level, rule.reason);
            }
        }
        // The catch-all rule makes this unreachable.
        RiskAssessment::of(RiskLevel::Medium, "modifies existing code")
    }

    fn targets_config_or_build_file(&self, edit: &ProposedEdit) -> bool {
        let name = target_file_name(&edit.target).to_ascii_lowercase();
        if BUILD_FILES.contains(&name.as_str()) {
            return true;
        }
        match name.rsplit_once('.') {
            Some((_, ext)) => {
                CONFIG_EXTENSIONS.contains(&ext)
                    || self.extra_config_extensions.iter().any(|e| e == ext)
            }
            None => false,
        }
    }

    fn targets_entry_point(&self, edit: &ProposedEdit) -> bool {
        let name = target_file_name(&edit.target).to_ascii_lowercase();
        ENTRY_POINTS.contains(&name.as_str())
            || self.extra_entry_points.iter().any(|e| e == &name)
    }
}

/// Strips an optional `:line-range` or `:symbol` suffix and any leading
/// directories, leaving the bare file name.
fn target_file_name(target: &str) -> &str {
    let path = target.split(':').next().unwrap_or(target);
    path.rsplit('/').next().unwrap_or(path)
}

fn starts_with_visibility_keyword(content: &str) -> bool {
    match content.split_whitespace().next() {
        Some(first) => VISIBILITY_KEYWORDS.contains(&first),
        None => false,
    }
}

fn starts_with_comment_marker(content: &str) -> bool {
    let trimmed = content.trim_start();
    COMMENT_MARKERS.iter().any(|m| trimmed.starts_with(m))
}

/// Whether an assessed edit may proceed without asking. No configured
/// threshold means nothing is auto-approved.
#[must_use]
pub fn should_auto_approve(level: RiskLevel, threshold: Option<RiskLevel>) -> bool {
    threshold.is_some_and(|t| level <= t)
}

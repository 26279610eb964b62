//! One-shot role selection from a task description.

use spelunk_core::{ModelRequest, Role};
use spelunk_llm::ModelClient;

const ROUTING_PROMPT: &str = "\
You route tasks to one of three agent roles. Reply with exactly one word: \
investigator, auditor, or refactorer.\n\
\n\
investigator: answer a question about the code.\n\
auditor: sweep the code for defects, security issues or risky patterns.\n\
refactorer: change, clean up or restructure the code.";

/// Picks a role with a single history-free model call. The reply is
/// lowercased and stripped of whitespace before substring matching; any
/// call failure selects the investigator.
pub fn classify_role(client: &dyn ModelClient, task: &str) -> Role {
    let request = ModelRequest {
        system: ROUTING_PROMPT.to_string(),
        user: format!("Task: {task}"),
    };
    let Ok(reply) = client.complete(&request) else {
        return Role::Investigator;
    };
    let normalized: String = reply.to_lowercase().split_whitespace().collect();
    if normalized.contains("auditor") {
        Role::Auditor
    } else if normalized.contains("refactor") {
        Role::Refactorer
    } else {
        Role::Investigator
    }
}

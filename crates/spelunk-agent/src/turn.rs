//! The turn loop: render context, call the model, execute commands,
//! persist.
//!
//! Loop-level commands (`note`, `keep`, `ask`, ...) mutate the session
//! directly and never reach the primitives host. Everything else is
//! forwarded, and only forwarded commands feed the recovery policy.

use anyhow::Result;
use serde_json::json;
use spelunk_context::ContextInput;
use spelunk_core::{
    Command, EditAction, ErrorState, MachineState, MemoryItem, ModelRequest, ProposedEdit, Role,
    Session, TurnOutput,
};
use spelunk_parser::{parse_commands, parse_indices, parse_keep};
use spelunk_store::{SessionLogger, new_memory_id, new_session_id};

use crate::machine::Machine;
use crate::recovery::{self, RecoveryAction};
use crate::{AgentEngine, AgentOutcome, RunSettings, SessionReport};

/// Everything a run carries beyond the session itself. All of it is
/// ephemeral; only the session lands in checkpoints.
struct LoopState {
    session: Session,
    machine: Machine,
    /// Outputs produced last turn, rendered into the next context.
    previous: Vec<TurnOutput>,
    /// Outputs accumulating during the current turn.
    current: Vec<TurnOutput>,
    /// Host notices for the next render, cleared after one turn.
    notes: Vec<String>,
    error_state: Option<ErrorState>,
    plan: Option<String>,
    logger: Option<SessionLogger>,
    finished: Option<AgentOutcome>,
}

impl AgentEngine {
    /// Starts a fresh session for `task` and drives it to an outcome.
    pub fn run(&mut self, task: &str, settings: &RunSettings) -> Result<SessionReport> {
        let session = Session::new(new_session_id(), task);
        self.drive(session, settings)
    }

    /// Reloads a checkpointed session and continues its turn count.
    pub fn resume(&mut self, session_id: &str, settings: &RunSettings) -> Result<SessionReport> {
        let session = self.store.load_checkpoint(session_id)?;
        self.drive(session, settings)
    }

    fn drive(&mut self, session: Session, settings: &RunSettings) -> Result<SessionReport> {
        let role = match settings.role {
            Some(role) => role,
            None if settings.auto_role => {
                crate::classify::classify_role(self.model.as_ref(), &session.task)
            }
            None => Role::Investigator,
        };
        let plan_first = settings.plan_first.unwrap_or_else(|| role.plan_first());
        let machine = if settings.machine {
            Machine::new(role, plan_first)
        } else {
            Machine::without_cycling(role)
        };

        let logger = self.store.start_log(&session.id);
        if logger.is_none() {
            self.observer
                .warn_log("session log unavailable; continuing without it");
        }
        self.observer.verbose_log(&format!(
            "session {} role={role} in {}",
            session.id,
            self.workspace.display()
        ));
        let _ = self.observer.record_event("session_start", &session.id);

        let mut state = LoopState {
            session,
            machine,
            previous: Vec::new(),
            current: Vec::new(),
            notes: Vec::new(),
            error_state: None,
            plan: None,
            logger,
            finished: None,
        };

        let outcome = loop {
            if let Some(outcome) = state.finished.take() {
                break outcome;
            }
            if state.session.turn >= self.cfg.agent.max_turns {
                break AgentOutcome::MaxTurns(state.session.progress.clone());
            }

            let config = state.machine.config();
            let input = ContextInput {
                task: &state.session.task,
                memory: &state.session.working_memory,
                new_results: &state.previous,
                notes: &state.notes,
                error_state: state.error_state.as_ref(),
                plan: state.plan.as_deref(),
            };
            let body = if settings.machine {
                spelunk_context::render(config.context_mode, &input)
            } else {
                spelunk_context::render_general(&input)
            };
            let request = ModelRequest {
                system: config.prompt_template,
                user: body,
            };

            state.session.turn += 1;
            self.observer.verbose_log(&format!(
                "turn {} state={}",
                state.session.turn,
                state.machine.current()
            ));

            let reply = match self.model.complete(&request) {
                Ok(reply) => reply,
                Err(err) => {
                    self.observer.warn_log(&format!("model call failed: {err}"));
                    if let Some(mut logger) = state.logger.take() {
                        logger.log("model_error", json!({ "error": err.to_string() }));
                        logger.close(state.session.turn);
                    }
                    self.checkpoint(&state.session);
                    return Err(err);
                }
            };

            let commands = parse_commands(&reply);
            if let Some(logger) = state.logger.as_mut() {
                logger.log(
                    "turn",
                    json!({
                        "turn": state.session.turn,
                        "state": state.machine.current().as_str(),
                        "commands": commands.len(),
                    }),
                );
            }

            state.notes.clear();
            if state.machine.current() == MachineState::Planner {
                state.plan = Some(reply.clone());
            }

            for cmd in &commands {
                self.handle_command(cmd, &mut state);
                if state.finished.is_some() {
                    break;
                }
            }

            state.previous = std::mem::take(&mut state.current);
            if state.finished.is_some() {
                state.machine.finish();
            } else {
                state.machine.advance();
            }
            self.checkpoint(&state.session);
        };

        self.checkpoint(&state.session);
        if let Some(mut logger) = state.logger.take() {
            logger.log(
                "outcome",
                json!({ "outcome": outcome.label(), "detail": outcome.text() }),
            );
            logger.close(state.session.turn);
        }
        let _ = self.observer.record_event("session_end", &state.session.id);
        self.observer.verbose_log(&format!(
            "session {} finished: {} after {} turns",
            state.session.id,
            outcome.label(),
            state.session.turn
        ));

        Ok(SessionReport {
            session_id: state.session.id,
            turns: state.session.turn,
            outcome,
        })
    }

    fn checkpoint(&mut self, session: &Session) {
        if let Err(err) = self.store.save_checkpoint(session) {
            self.observer.warn_log(&format!("checkpoint failed: {err}"));
        }
    }

    fn handle_command(&mut self, cmd: &Command, state: &mut LoopState) {
        if let Some(action) = EditAction::from_command_name(&cmd.name) {
            self.handle_edit(cmd, action, state);
            return;
        }
        match cmd.name.as_str() {
            "note" => {
                let content = cmd.args.trim();
                if !content.is_empty() {
                    state
                        .session
                        .working_memory
                        .push(MemoryItem::note(new_memory_id(), content));
                }
            }
            "keep" => {
                for idx in parse_keep(&cmd.args, state.previous.len()) {
                    let item = MemoryItem::kept_output(new_memory_id(), &state.previous[idx - 1]);
                    state.session.working_memory.push(item);
                }
            }
            "forget" => {
                let mut indices = parse_indices(&cmd.args, state.session.working_memory.len());
                indices.sort_unstable();
                indices.dedup();
                for idx in indices.into_iter().rev() {
                    state.session.working_memory.remove(idx - 1);
                }
            }
            "memorize" => {
                if let Err(err) = self.store.memorize(&cmd.args) {
                    self.observer.warn_log(&format!("memorize failed: {err}"));
                }
            }
            "progress" => {
                state.session.progress = cmd.args.trim().to_string();
            }
            "question" => {
                let question = cmd.args.trim();
                if !question.is_empty() {
                    if !state.session.open_questions.is_empty() {
                        state.session.open_questions.push('\n');
                    }
                    state.session.open_questions.push_str(question);
                }
            }
            "ask" => {
                let reply = self
                    .ask_handler
                    .as_mut()
                    .and_then(|handler| handler(&cmd.args));
                if let Some(logger) = state.logger.as_mut() {
                    logger.log(
                        "ask",
                        json!({ "question": cmd.args, "answered": reply.is_some() }),
                    );
                }
                state.notes.push(match reply {
                    Some(answer) => format!("The user replied: {answer}"),
                    None => "The user is unavailable right now; continue with your best judgment."
                        .to_string(),
                });
            }
            "answer" | "done" => {
                let text = cmd.args.trim().to_string();
                let blocked = state
                    .error_state
                    .as_ref()
                    .is_some_and(|err| err.rolled_back);
                state.finished = Some(if blocked {
                    AgentOutcome::Blocked(text)
                } else {
                    AgentOutcome::Answered(text)
                });
            }
            _ => self.handle_host_command(cmd, state),
        }
    }

    fn handle_edit(&mut self, cmd: &Command, action: EditAction, state: &mut LoopState) {
        let edit = ProposedEdit::from_command(action, &cmd.args);
        let assessment = self.policy.assess(&edit);
        let approved =
            spelunk_policy::should_auto_approve(assessment.level, self.cfg.agent.auto_approve)
                || self
                    .approver
                    .as_mut()
                    .is_some_and(|approve| approve(&edit, &assessment));

        if let Some(logger) = state.logger.as_mut() {
            logger.log(
                "edit",
                json!({
                    "action": action.as_str(),
                    "target": edit.target,
                    "risk": assessment.level.as_str(),
                    "reason": assessment.reason,
                    "approved": approved,
                }),
            );
        }
        if !approved {
            self.observer.verbose_log(&format!(
                "edit declined: {} {} (risk {})",
                action.as_str(),
                edit.target,
                assessment.level
            ));
            state.current.push(TurnOutput::failed(
                &cmd.full,
                format!(
                    "edit not approved (risk {}: {})",
                    assessment.level, assessment.reason
                ),
            ));
            return;
        }
        self.handle_host_command(cmd, state);
    }

    fn handle_host_command(&mut self, cmd: &Command, state: &mut LoopState) {
        let output = self.host.execute(cmd);
        if let Some(logger) = state.logger.as_mut() {
            logger.log(
                "command",
                json!({ "cmd": output.cmd, "success": output.success }),
            );
        }

        if output.success {
            recovery::on_success(&mut state.error_state, &output.cmd);
            state.current.push(output);
            return;
        }

        let failed_cmd = output.cmd.clone();
        let action = recovery::on_failure(&mut state.error_state, &output.cmd, &output.content);
        state.current.push(output);
        match action {
            RecoveryAction::Retry(count) => {
                self.observer
                    .verbose_log(&format!("command failed ({count}/3): {failed_cmd}"));
            }
            RecoveryAction::RollBack => {
                self.observer
                    .warn_log(&format!("retries exhausted for '{failed_cmd}'; rolling back"));
                let rollback = self.host.rollback();
                if let Some(logger) = state.logger.as_mut() {
                    logger.log(
                        "rollback",
                        json!({ "cmd": failed_cmd, "success": rollback.success }),
                    );
                }
                state.current.push(rollback);
            }
            RecoveryAction::Stuck => {
                state.finished = Some(AgentOutcome::Blocked(format!(
                    "'{failed_cmd}' keeps failing even after a rollback; stopping here."
                )));
            }
        }
    }
}

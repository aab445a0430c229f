//! Process-wide session lifecycle
//!
//! Holds at most one active session and a bounded history of completed
//! ones. Archived records are never handed out mutably again.

use std::collections::VecDeque;

use tracing::debug;

use super::graph::{check_text, GraphLimits, ThoughtGraph};
use super::types::{AgentLens, Session, SessionSnapshot};
use crate::config::EnsembleConfig;
use crate::error::{EngineResult, EnsembleError};

/// A session together with its graph
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session: Session,
    pub graph: ThoughtGraph,
}

impl SessionRecord {
    /// Fail with `agent_not_in_session` unless `lens` was enrolled
    pub fn require_participant(&self, lens: AgentLens) -> EngineResult<()> {
        if self.session.has_lens(lens) {
            Ok(())
        } else {
            Err(EnsembleError::AgentNotInSession {
                lens: lens.to_string(),
            })
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.session.clone(),
            thoughts: self.graph.thoughts().to_vec(),
            integrations: self.graph.integrations().to_vec(),
            total_endorsements: self.graph.endorsement_count(),
        }
    }
}

/// Result of starting a session
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub session: Session,
    /// Session that was active before and is now in history
    pub archived: Option<Session>,
}

/// Owner of the active session and the archive
#[derive(Debug)]
pub struct SessionStore {
    limits: GraphLimits,
    max_history: usize,
    active: Option<SessionRecord>,
    history: VecDeque<SessionRecord>,
}

impl SessionStore {
    pub fn new(config: &EnsembleConfig) -> Self {
        Self {
            limits: GraphLimits::from(config),
            max_history: config.max_session_history,
            active: None,
            history: VecDeque::new(),
        }
    }

    /// Open a new session, archiving the current one
    pub fn start_session(
        &mut self,
        problem: &str,
        agent_lenses: Vec<AgentLens>,
    ) -> EngineResult<StartOutcome> {
        check_text(
            "problem",
            problem,
            "max_problem_length",
            self.limits.text.max_problem_length,
        )?;
        if agent_lenses.is_empty() {
            return Err(EnsembleError::invalid_argument(
                "agentLenses",
                "at least one agent lens is required",
            ));
        }
        for (i, lens) in agent_lenses.iter().enumerate() {
            if agent_lenses[..i].contains(lens) {
                return Err(EnsembleError::invalid_argument(
                    "agentLenses",
                    format!("duplicate agent lens '{}'", lens),
                ));
            }
        }

        let archived = self.archive_active();
        let session = Session::new(problem.trim().to_string(), agent_lenses);
        self.active = Some(SessionRecord {
            session: session.clone(),
            graph: ThoughtGraph::new(self.limits.clone()),
        });
        Ok(StartOutcome { session, archived })
    }

    fn archive_active(&mut self) -> Option<Session> {
        let mut record = self.active.take()?;
        record.session.complete();
        let session = record.session.clone();

        if self.max_history == 0 {
            return Some(session);
        }
        while self.history.len() >= self.max_history {
            if let Some(evicted) = self.history.pop_front() {
                debug!(session_id = %evicted.session.id, "Evicting session from history");
            }
        }
        self.history.push_back(record);
        Some(session)
    }

    /// The active session, optionally checked against `session_id`
    pub fn active(&self, session_id: Option<&str>) -> EngineResult<&SessionRecord> {
        let record = self.active.as_ref().ok_or(EnsembleError::NoActiveSession)?;
        match session_id {
            Some(requested) if requested != record.session.id => {
                Err(EnsembleError::SessionMismatch {
                    requested: requested.to_string(),
                    active: record.session.id.clone(),
                })
            }
            _ => Ok(record),
        }
    }

    /// Mutable access to the active session named `session_id`
    pub fn active_mut(&mut self, session_id: &str) -> EngineResult<&mut SessionRecord> {
        let record = self.active.as_mut().ok_or(EnsembleError::NoActiveSession)?;
        if record.session.id != session_id {
            return Err(EnsembleError::SessionMismatch {
                requested: session_id.to_string(),
                active: record.session.id.clone(),
            });
        }
        Ok(record)
    }

    /// Archived sessions, oldest first
    pub fn history(&self) -> impl Iterator<Item = &SessionRecord> {
        self.history.iter()
    }
}

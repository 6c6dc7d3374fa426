//! In-memory session store.
//!
//! [`SessionStore`] maps session ids to [`Session`] state behind a single
//! async mutex. Every mutation goes through [`SessionStore::update`], which
//! refuses to touch unknown or terminal sessions, so a late or duplicate
//! stage result can never resurrect or rewrite a finished run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use declutter_types::error::{DeclutterError, Result};
use declutter_types::message::Job;
use declutter_types::session::{Session, SessionStage, SessionSummary};

/// Reason recorded on sessions failed by the sweeper.
pub const STALLED_REASON: &str = "stalled";

/// Result of [`SessionStore::create`].
#[derive(Debug, Clone)]
pub enum Created {
    New(Session),
    /// The id was already tracked; the existing session is returned as-is.
    Existing(Session),
}

impl Created {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }

    pub fn session(&self) -> &Session {
        match self {
            Self::New(s) | Self::Existing(s) => s,
        }
    }
}

/// What a sweep did.
#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    /// Sessions transitioned to FAILED ("stalled") by this sweep.
    pub stalled: Vec<Session>,
    /// Ids of terminal sessions removed after the grace window.
    pub removed: Vec<String>,
}

/// Session id -> session state.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for `job`. Idempotent per id.
    pub async fn create(&self, job: Job) -> Created {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&job.session_id) {
            debug!(session_id = %job.session_id, "session already exists");
            return Created::Existing(existing.clone());
        }
        let session = Session::new(job);
        sessions.insert(session.id.clone(), session.clone());
        debug!(session_id = %session.id, "session created");
        Created::New(session)
    }

    pub async fn get(&self, id: &str) -> Result<Session> {
        self.sessions
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DeclutterError::SessionNotFound(id.to_string()))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.lock().await.contains_key(id)
    }

    /// Apply `mutator` to a live session under the store lock.
    ///
    /// Returns `None` (and logs a warning) when the session is unknown or
    /// already terminal; the mutator is not called in that case.
    pub async fn update<R>(&self, id: &str, mutator: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(id) else {
            warn!(session_id = %id, "update for unknown session dropped");
            return None;
        };
        if session.is_terminal() {
            warn!(
                session_id = %id,
                stage = %session.stage,
                "update for terminal session dropped"
            );
            return None;
        }
        Some(mutator(session))
    }

    /// Fail stalled sessions and reclaim finished ones.
    ///
    /// A non-terminal session created more than `stalled_after` before
    /// `now` becomes FAILED with reason [`STALLED_REASON`]. A terminal
    /// session that finished more than `completed_grace` before `now` is
    /// removed. A session failed by this sweep is kept until a later one.
    pub async fn sweep(
        &self,
        now: DateTime<Utc>,
        stalled_after: Duration,
        completed_grace: Duration,
    ) -> SweepReport {
        let stalled_after = to_chrono(stalled_after);
        let completed_grace = to_chrono(completed_grace);
        let mut report = SweepReport::default();
        let mut sessions = self.sessions.lock().await;

        sessions.retain(|id, session| {
            if session.is_terminal() {
                let finished = session.finished_at.unwrap_or(session.created_at);
                if now - finished > completed_grace {
                    report.removed.push(id.clone());
                    return false;
                }
                return true;
            }
            if now - session.created_at > stalled_after {
                session.stage = SessionStage::Failed;
                session.error = Some(STALLED_REASON.to_string());
                session.finished_at = Some(now);
                report.stalled.push(session.clone());
            }
            true
        });

        if !report.stalled.is_empty() || !report.removed.is_empty() {
            debug!(
                stalled = report.stalled.len(),
                removed = report.removed.len(),
                remaining = sessions.len(),
                "session sweep"
            );
        }
        report
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = self
            .sessions
            .lock()
            .await
            .values()
            .map(Session::summary)
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Number of sessions that are not yet terminal.
    pub async fn active(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| !s.is_terminal())
            .count()
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

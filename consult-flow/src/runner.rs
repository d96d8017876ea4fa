//! SessionRunner – loads a session, applies exactly **one** action, and persists the updated
//! session back to storage.
//!
//! Each HTTP request maps to one `run` call. Calls for the same session are serialized by a
//! per-session lock, so two requests can never interleave their load and save. Calls for
//! different sessions never wait on each other. A lock only lives while some call holds it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    conversation::Patient,
    error::{ConsultError, Result},
    handlers::{Action, Consultation, Outcome},
    services::SpeechClip,
    storage::{Session, SessionStorage},
};

/// High-level helper that orchestrates the _load → dispatch → save_ pattern.
#[derive(Clone)]
pub struct SessionRunner {
    consultation: Consultation,
    storage: Arc<dyn SessionStorage>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SessionRunner {
    pub fn new(consultation: Consultation, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            consultation,
            storage,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn SessionStorage> {
        &self.storage
    }

    /// Create and persist a new session seeded with the greeting
    pub async fn start(&self, patient: Option<Patient>) -> Result<(Session, Option<SpeechClip>)> {
        let (state, audio) = self.consultation.start(patient).await;
        let session = Session::new(state);
        self.storage.save(session.clone()).await?;
        info!(session_id = %session.id, "Session started");
        Ok((session, audio))
    }

    /// Apply one action to the session and persist the result.
    ///
    /// The session is saved only when the action succeeds, so a rejected
    /// action leaves the stored state untouched.
    pub async fn run(&self, session_id: &str, action: Action) -> Result<(Session, Outcome)> {
        let lock = self.lock_for(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.run_locked(session_id, action).await
        };
        self.release_lock(session_id, lock);
        result
    }

    async fn run_locked(&self, session_id: &str, action: Action) -> Result<(Session, Outcome)> {
        // 1. Load session
        let mut session = self
            .storage
            .get(session_id)
            .await?
            .ok_or_else(|| ConsultError::SessionNotFound(session_id.to_string()))?;

        // 2. Apply the action
        let action_name = action.name();
        let outcome = self.consultation.dispatch(&mut session.state, action).await?;

        // 3. Persist new state so the next call starts where we left off
        session.touch();
        self.storage.save(session.clone()).await?;

        info!(
            session_id = %session_id,
            action = action_name,
            phase = ?session.state.phase(),
            "Action applied"
        );

        Ok((session, outcome))
    }

    /// Discard a session. Returns `false` if it did not exist.
    pub async fn end_session(&self, session_id: &str) -> Result<bool> {
        let lock = self.lock_for(session_id);
        let removed = {
            let _guard = lock.lock().await;
            self.storage.delete(session_id).await
        };
        self.release_lock(session_id, lock);
        let removed = removed?;
        info!(session_id = %session_id, removed, "Session discarded");
        Ok(removed)
    }

    /// Discard sessions with no action applied within `max_idle`
    pub async fn expire_idle(&self, max_idle: Duration) -> Result<usize> {
        let max_idle = chrono::Duration::from_std(max_idle)
            .map_err(|e| ConsultError::StorageError(format!("invalid idle timeout: {}", e)))?;
        let removed = self.storage.remove_idle(Utc::now() - max_idle).await?;
        if removed > 0 {
            info!(removed, "Expired idle sessions");
        }
        Ok(removed)
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry once nobody else holds or waits on the lock
    fn release_lock(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{conversation::ConversationState, error::Result};

/// Session information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub state: ConversationState,
    pub created_at: DateTime<Utc>,
    /// Last time an action was applied
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(state: ConversationState) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            state,
            created_at: now,
            last_active: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_active <= cutoff
    }
}

/// Trait for storing and retrieving sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: Session) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Session>>;
    /// Returns `true` if a session was removed
    async fn delete(&self, id: &str) -> Result<bool>;
    /// Drop sessions with no activity after `cutoff`, returning how many went
    async fn remove_idle(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// In-memory implementation of SessionStorage
#[derive(Clone, Default)]
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, Session>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: Session) -> Result<()> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.sessions.remove(id).is_some())
    }

    async fn remove_idle(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        self.sessions.retain(|_, session| {
            let idle = session.is_idle_since(cutoff);
            if idle {
                removed += 1;
            }
            !idle
        });
        Ok(removed)
    }
}

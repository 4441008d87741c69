use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use aipal_agent_management::AgentId;

type Threads = HashMap<String, (AgentId, String)>;

/// Last known continuity identifier per conversation, tagged with the agent
/// that issued it.
#[derive(Debug, Default)]
pub struct ThreadStateStore {
    threads: RwLock<Threads>,
}

impl ThreadStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Threads> {
        self.threads.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Threads> {
        self.threads.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The stored thread, whichever agent it belongs to.
    pub fn get(&self, conversation_id: &str) -> Option<String> {
        self.read().get(conversation_id).map(|(_, thread_id)| thread_id.clone())
    }

    /// The stored thread, only if `agent` issued it.
    pub fn get_for(&self, conversation_id: &str, agent: AgentId) -> Option<String> {
        self.read()
            .get(conversation_id)
            .filter(|(owner, _)| *owner == agent)
            .map(|(_, thread_id)| thread_id.clone())
    }

    /// Records `thread_id` when present; `None` leaves the previous value.
    pub fn update(&self, conversation_id: &str, agent: AgentId, thread_id: Option<&str>) {
        let Some(thread_id) = thread_id.filter(|id| !id.trim().is_empty()) else {
            return;
        };
        self.write()
            .insert(conversation_id.to_string(), (agent, thread_id.to_string()));
    }

    /// Forgets the conversation's thread. Returns whether one was stored.
    pub fn clear(&self, conversation_id: &str) -> bool {
        self.write().remove(conversation_id).is_some()
    }
}

//! Session Agent Registry - one long-lived agent per session key
//!
//! - DashMap for concurrent session_id -> slot lookup; the map lock is held
//!   only for lookup/insert
//! - A per-session tokio Mutex held for a whole turn, so turns on one session
//!   queue behind each other while different sessions run in parallel
//! - Eviction takes the same lock, so it waits for the running turn, and the
//!   slot stays registered until the eviction is dropped. No second agent can
//!   exist for a session while either is in progress.
//! - Model swaps replace only the binding; the conversation survives

use dashmap::DashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};

use super::{AgentHandle, ModelBinding};
use crate::models::ModelFactory;
use crate::persistence::SessionStore;
use crate::tools::ToolRegistry;

/// Empty until the first turn creates the agent; emptied by eviction.
pub type AgentSlot = Arc<Mutex<Option<AgentHandle>>>;

/// Exclusive access to a session's agent for the duration of one turn.
pub struct SessionLease {
    guard: OwnedMappedMutexGuard<Option<AgentHandle>, AgentHandle>,
}

impl Deref for SessionLease {
    type Target = AgentHandle;

    fn deref(&self) -> &AgentHandle {
        &self.guard
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut AgentHandle {
        &mut self.guard
    }
}

/// Holds an evicted session's slot locked. Turns for the session wait until
/// this is dropped, then start on a fresh agent.
pub struct Eviction<'a> {
    agents: &'a DashMap<String, AgentSlot>,
    session_id: String,
    slot: AgentSlot,
    evicted: bool,
    _guard: OwnedMutexGuard<Option<AgentHandle>>,
}

impl Eviction<'_> {
    /// Whether an agent was actually removed.
    pub fn evicted(&self) -> bool {
        self.evicted
    }
}

impl Drop for Eviction<'_> {
    fn drop(&mut self) {
        // Unregister before the guard releases so waiters see the eviction.
        self.agents
            .remove_if(&self.session_id, |_, current| Arc::ptr_eq(current, &self.slot));
    }
}

pub struct SessionAgentRegistry {
    agents: DashMap<String, AgentSlot>,
    factory: Arc<dyn ModelFactory>,
    store: SessionStore,
    tools: RwLock<Arc<ToolRegistry>>,
}

impl SessionAgentRegistry {
    pub fn new(factory: Arc<dyn ModelFactory>, store: SessionStore, tools: Arc<ToolRegistry>) -> Self {
        Self {
            agents: DashMap::new(),
            factory,
            store,
            tools: RwLock::new(tools),
        }
    }

    fn binding(&self, model_id: &str) -> ModelBinding {
        ModelBinding {
            model_id: model_id.to_string(),
            client: self.factory.build(model_id),
        }
    }

    /// Tool set given to handles created from now on.
    pub fn tools(&self) -> Arc<ToolRegistry> {
        match self.tools.read() {
            Ok(tools) => tools.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_tools(&self, tools: Arc<ToolRegistry>) {
        match self.tools.write() {
            Ok(mut guard) => *guard = tools,
            Err(poisoned) => *poisoned.into_inner() = tools,
        }
    }

    fn slot(&self, session_id: &str) -> AgentSlot {
        self.agents.entry(session_id.to_string()).or_default().clone()
    }

    fn is_registered(&self, session_id: &str, slot: &AgentSlot) -> bool {
        self.agents
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    /// Locks the session's registered slot, creating it if absent. A slot that
    /// was unregistered while waiting is skipped.
    async fn lock_slot(&self, session_id: &str) -> (AgentSlot, OwnedMutexGuard<Option<AgentHandle>>) {
        loop {
            let slot = self.slot(session_id);
            let guard = slot.clone().lock_owned().await;
            if self.is_registered(session_id, &slot) {
                return (slot, guard);
            }
            tracing::debug!(session_id = %session_id, "Session slot evicted while waiting; retrying");
        }
    }

    /// Returns the session's agent bound to `model_id`, creating it if absent.
    ///
    /// Waits while another turn or an eviction holds the session.
    pub async fn resolve(&self, session_id: &str, model_id: &str) -> SessionLease {
        let (_, mut guard) = self.lock_slot(session_id).await;

        let handle = match guard.take() {
            Some(mut handle) => {
                if handle.model_id() != model_id {
                    tracing::info!(
                        session_id = %session_id,
                        from = %handle.model_id(),
                        to = %model_id,
                        "Swapping session model"
                    );
                    handle.bind_model(self.binding(model_id));
                }
                handle
            }
            None => {
                tracing::info!(session_id = %session_id, model = %model_id, "Creating session agent");
                AgentHandle::new(
                    session_id,
                    self.store.clone(),
                    self.binding(model_id),
                    self.tools(),
                )
            }
        };

        let guard = OwnedMutexGuard::map(guard, |slot| slot.insert(handle));
        SessionLease { guard }
    }

    /// Rebinds an existing session's model in place. False when the session has no agent.
    pub async fn swap_model(&self, session_id: &str, model_id: &str) -> bool {
        let Some(slot) = self.agents.get(session_id).map(|entry| entry.value().clone()) else {
            return false;
        };
        let mut guard = slot.lock().await;
        let Some(handle) = guard.as_mut() else {
            return false;
        };
        if handle.model_id() != model_id {
            handle.bind_model(self.binding(model_id));
        }
        true
    }

    /// Waits for any in-flight turn, then drops the session's agent. New turns
    /// for the session wait until the returned [`Eviction`] is dropped.
    pub async fn evict(&self, session_id: &str) -> Eviction<'_> {
        let (slot, mut guard) = self.lock_slot(session_id).await;
        let evicted = guard.take().is_some();
        if evicted {
            tracing::info!(session_id = %session_id, "Evicted session agent");
        }
        Eviction {
            agents: &self.agents,
            session_id: session_id.to_string(),
            slot,
            evicted,
            _guard: guard,
        }
    }

    /// Evicts every agent, one session at a time, and returns the session ids
    /// that had one.
    pub async fn evict_all(&self) -> Vec<String> {
        let mut evicted = Vec::new();
        for id in self.session_ids() {
            if self.evict(&id).await.evicted() {
                evicted.push(id);
            }
        }
        evicted
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.agents.contains_key(session_id)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.agents.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mock::ScriptedModelFactory;
    use std::time::Duration;

    fn registry(dir: &tempfile::TempDir) -> (SessionAgentRegistry, ScriptedModelFactory) {
        let factory = ScriptedModelFactory::new();
        let registry = SessionAgentRegistry::new(
            Arc::new(factory.clone()),
            SessionStore::new(dir.path()),
            Arc::new(ToolRegistry::new()),
        );
        (registry, factory)
    }

    #[tokio::test]
    async fn test_resolve_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, factory) = registry(&dir);

        let first = registry.resolve("s1", "m1").await.conversation();
        let second = registry.resolve("s1", "m1").await.conversation();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.built_models(), vec!["m1"]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_model_swap_preserves_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir);

        let original = registry.resolve("s1", "m1").await.conversation();
        for model in ["m2", "m3", "m1", "m2"] {
            let lease = registry.resolve("s1", model).await;
            assert_eq!(lease.model_id(), model);
            assert!(Arc::ptr_eq(&original, &lease.conversation()));
        }

        assert!(registry.swap_model("s1", "m9").await);
        let lease = registry.resolve("s1", "m9").await;
        assert!(Arc::ptr_eq(&original, &lease.conversation()));
        assert!(!registry.swap_model("other", "m1").await);
    }

    #[tokio::test]
    async fn test_evict_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir);

        let original = registry.resolve("s1", "m1").await.conversation();
        assert!(registry.evict("s1").await.evicted());
        assert!(!registry.evict("s1").await.evicted());
        assert!(!registry.contains("s1"));

        let fresh = registry.resolve("s1", "m1").await.conversation();
        assert!(!Arc::ptr_eq(&original, &fresh));
    }

    #[tokio::test]
    async fn test_same_session_turns_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir);
        let registry = Arc::new(registry);

        let lease = registry.resolve("s1", "m1").await;
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.resolve("s1", "m2").await.model_id().to_string() })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // Other sessions are not blocked.
        let other = registry.resolve("s2", "m1").await;
        assert_eq!(other.model_id(), "m1");

        drop(lease);
        assert_eq!(waiter.await.unwrap(), "m2");
    }

    #[tokio::test]
    async fn test_evict_waits_for_running_turn() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir);
        let registry = Arc::new(registry);

        let lease = registry.resolve("s1", "m1").await;
        let original = lease.conversation();
        let evictor = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.evict("s1").await.evicted() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!evictor.is_finished());

        drop(lease);
        assert!(evictor.await.unwrap());

        let fresh = registry.resolve("s1", "m1").await.conversation();
        assert!(!Arc::ptr_eq(&original, &fresh));
    }

    #[tokio::test]
    async fn test_no_new_agent_while_eviction_held() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, factory) = registry(&dir);
        let registry = Arc::new(registry);

        let original = registry.resolve("s1", "m1").await.conversation();
        let eviction = registry.evict("s1").await;
        assert!(eviction.evicted());

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.resolve("s1", "m1").await.conversation() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert_eq!(factory.built_models().len(), 1);

        drop(eviction);
        let conversation = waiter.await.unwrap();
        assert!(!Arc::ptr_eq(&original, &conversation));
        assert!(registry.contains("s1"));
    }

    #[tokio::test]
    async fn test_evicting_unknown_session_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir);

        let eviction = registry.evict("ghost").await;
        assert!(!eviction.evicted());
        drop(eviction);
        assert!(registry.is_empty());
        assert!(!registry.swap_model("ghost", "m1").await);
    }

    #[tokio::test]
    async fn test_evict_all() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir);
        drop(registry.resolve("a", "m1").await);
        drop(registry.resolve("b", "m1").await);

        let mut evicted = registry.evict_all().await;
        evicted.sort();
        assert_eq!(evicted, vec!["a", "b"]);
        assert!(registry.is_empty());
    }
}

//! Application state: content store, generation adapter, builder sessions and
//! in-flight generation tokens.
//!
//! Sessions are replaced whole under the write lock; nothing is held across
//! a generation or commit await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::builder::BuilderSession;
use crate::config::{load_app_config_from_env, AppConfig};
use crate::error::BuilderError;
use crate::generation::GenerationAdapter;
use crate::store::{ContentStore, MemoryStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn ContentStore>,
    pub adapter: GenerationAdapter,
    pub sessions: Arc<RwLock<HashMap<Uuid, BuilderSession>>>,
    /// Builder session id -> (run id, token) of its running generation.
    pub active_generations: Arc<Mutex<HashMap<Uuid, (Uuid, CancellationToken)>>>,
}

impl AppState {
    /// Build state from env: load config, pick the generator, start an empty store.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let config = load_app_config_from_env().unwrap_or_default();
        let adapter = GenerationAdapter::from_config(&config);
        info!(
            target: "quizforge_backend",
            live = adapter.is_live(),
            counter_policy = ?config.persistence.counter_policy,
            max_order_retries = config.persistence.max_order_retries,
            "Application state ready"
        );
        Self::with_parts(config, Arc::new(MemoryStore::new()), adapter)
    }

    pub fn with_parts(config: AppConfig, store: Arc<dyn ContentStore>, adapter: GenerationAdapter) -> Self {
        Self {
            config: Arc::new(config),
            store,
            adapter,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            active_generations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn insert_session(&self, session: BuilderSession) {
        self.sessions.write().await.insert(session.id, session);
    }

    pub async fn session(&self, id: Uuid) -> Result<BuilderSession, BuilderError> {
        self.sessions.read().await.get(&id).cloned().ok_or(BuilderError::UnknownSession(id))
    }

    pub async fn remove_session(&self, id: Uuid) -> Option<BuilderSession> {
        self.sessions.write().await.remove(&id)
    }

    /// Apply one transition to the stored session. On error the stored value is untouched.
    pub async fn update_session<F>(&self, id: Uuid, f: F) -> Result<BuilderSession, BuilderError>
    where
        F: FnOnce(&BuilderSession) -> Result<BuilderSession, BuilderError>,
    {
        let mut sessions = self.sessions.write().await;
        let current = sessions.get(&id).ok_or(BuilderError::UnknownSession(id))?;
        let next = f(current)?;
        sessions.insert(id, next.clone());
        Ok(next)
    }

    fn tokens(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, (Uuid, CancellationToken)>> {
        self.active_generations.lock().unwrap_or_else(|poisoned| {
            warn!(target: "quizforge_backend", "Generation token map poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Register the token for generation `run` of session `id`. Checked under
    /// the session lock: if the session is no longer generating that run
    /// (cancelled, closed or regenerated), the token comes back cancelled.
    pub async fn register_generation(&self, id: Uuid, run: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        let sessions = self.sessions.read().await;
        if sessions.get(&id).and_then(|s| s.generating_run()) != Some(run) {
            debug!(target: "builder", session = %id, run = %run, "Generation superseded before it started");
            token.cancel();
            return token;
        }
        if let Some((_, previous)) = self.tokens().insert(id, (run, token.clone())) {
            previous.cancel();
        }
        debug!(target: "builder", session = %id, run = %run, "Generation registered");
        token
    }

    /// Signal the running generation, if any. Returns whether one was running.
    pub fn cancel_generation(&self, id: Uuid) -> bool {
        match self.tokens().remove(&id) {
            Some((run, token)) => {
                token.cancel();
                info!(target: "builder", session = %id, run = %run, "Generation cancelled");
                true
            }
            None => false,
        }
    }

    /// Drop the token once `run` has finished, without cancelling. A newer
    /// run's entry is left alone.
    pub fn finish_generation(&self, id: Uuid, run: Uuid) {
        let mut tokens = self.tokens();
        if tokens.get(&id).is_some_and(|(current, _)| *current == run) {
            tokens.remove(&id);
        }
    }
}

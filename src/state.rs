//! Application state: in-memory session store and the AI gateway.
//!
//! This module owns:
//!   - the session map (id -> session behind its own async mutex, plus when it was last used)
//!   - the gateway (OpenAI when a key is configured, a disabled stub otherwise)
//!   - the idle sweep that forgets sessions nobody has touched for `SESSION_TTL_SECS`
//!
//! Sessions are never persisted; restarting the process forgets all of them.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::load_exam_config_from_env;
use crate::error::ExamError;
use crate::gateway::{DisabledGateway, ExamGateway};
use crate::openai::OpenAI;
use crate::workflow::Session;

pub type SessionHandle = Arc<Mutex<Session>>;

/// Idle sessions are forgotten after this long unless `SESSION_TTL_SECS` says otherwise.
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

struct Entry {
    handle: SessionHandle,
    last_seen: Mutex<Instant>,
}

#[derive(Clone)]
pub struct AppState {
    sessions: Arc<RwLock<HashMap<String, Entry>>>,
    pub gateway: Arc<dyn ExamGateway>,
}

/// `SESSION_TTL_SECS`; `0` disables the idle sweep.
pub fn session_ttl_from_env() -> Option<Duration> {
    let ttl = std::env::var("SESSION_TTL_SECS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_SESSION_TTL);
    (!ttl.is_zero()).then_some(ttl)
}

/// Periodically drop sessions idle for longer than `ttl`.
pub fn spawn_session_sweeper(state: Arc<AppState>, ttl: Duration) -> tokio::task::JoinHandle<()> {
    let period = (ttl / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        loop {
            tick.tick().await;
            let evicted = state.evict_idle(ttl).await;
            if evicted > 0 {
                info!(target: "ielts_mock", evicted, "Idle sessions evicted");
            }
        }
    })
}

impl AppState {
    /// Build state from env: load prompt config, init OpenAI if a key is present.
    #[instrument(level = "info", skip_all)]
    pub fn from_env() -> Self {
        let prompts = load_exam_config_from_env()
            .map(|c| c.prompts)
            .unwrap_or_default();

        let gateway: Arc<dyn ExamGateway> = match OpenAI::from_env(prompts) {
            Some(oa) => {
                info!(target: "ielts_mock", base_url = %oa.base_url, text_model = %oa.text_model, image_model = %oa.image_model, "OpenAI enabled.");
                Arc::new(oa)
            }
            None => {
                warn!(target: "ielts_mock", "OpenAI disabled (no OPENAI_API_KEY). Test generation will fail until a key is configured.");
                Arc::new(DisabledGateway)
            }
        };

        Self::with_gateway(gateway)
    }

    pub fn with_gateway(gateway: Arc<dyn ExamGateway>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            gateway,
        }
    }

    /// Create a fresh session on the welcome screen.
    #[instrument(level = "debug", skip(self))]
    pub async fn create_session(&self) -> (String, SessionHandle) {
        let id = Uuid::new_v4().to_string();
        let handle = Arc::new(Mutex::new(Session::new(id.clone())));
        let entry = Entry { handle: handle.clone(), last_seen: Mutex::new(Instant::now()) };
        self.sessions.write().await.insert(id.clone(), entry);
        info!(target: "ielts_mock", session = %id, "Session created");
        (id, handle)
    }

    #[instrument(level = "debug", skip(self), fields(%id))]
    pub async fn session(&self, id: &str) -> Result<SessionHandle, ExamError> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(id)
            .ok_or_else(|| ExamError::NotFound(format!("session {id}")))?;
        *entry.last_seen.lock().await = Instant::now();
        Ok(entry.handle.clone())
    }

    /// Drop a session entirely. Returns whether it existed.
    #[instrument(level = "debug", skip(self), fields(%id))]
    pub async fn remove_session(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            info!(target: "ielts_mock", session = %id, "Session removed");
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Remove sessions unused for at least `ttl`. Sessions waiting on a gateway call are kept.
    #[instrument(level = "debug", skip(self))]
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut stale = Vec::new();
        for (id, entry) in sessions.iter() {
            if entry.last_seen.lock().await.elapsed() < ttl {
                continue;
            }
            // A locked session is in use right now.
            let busy = entry.handle.try_lock().map(|s| s.is_busy()).unwrap_or(true);
            if !busy {
                stale.push(id.clone());
            }
        }
        for id in &stale {
            sessions.remove(id);
            debug!(target: "ielts_mock", session = %id, "Idle session evicted");
        }
        stale.len()
    }
}

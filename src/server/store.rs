//! Token -> session map with idle expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::session::Session;
use super::shutdown::ShutdownManager;

pub type SharedSession = Arc<Mutex<Session>>;

/// Sessions are independent; this map is the only state shared between
/// them, and it is only held long enough to look a session up.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, SharedSession>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub fn get(&self, token: &str) -> Option<SharedSession> {
        self.sessions.lock().get(token).cloned()
    }

    /// Bind `session` to its token, disposing any session previously bound.
    pub fn insert(&self, session: Session) -> SharedSession {
        let token = session.token().to_string();
        let shared = Arc::new(Mutex::new(session));
        if self
            .sessions
            .lock()
            .insert(token.clone(), shared.clone())
            .is_some()
        {
            tracing::info!(session = %token, "Replaced existing session");
        }
        shared
    }

    pub fn remove(&self, token: &str) -> bool {
        let removed = self.sessions.lock().remove(token).is_some();
        if removed {
            tracing::info!(session = %token, "Session disposed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sessions idle for longer than the TTL as of `now`.
    pub fn expire_idle(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|token, session| {
            // A session busy in an exchange is by definition not idle.
            let Some(session) = session.try_lock() else {
                return true;
            };
            let keep = now.saturating_duration_since(session.last_seen()) < self.ttl;
            if !keep {
                tracing::info!(session = %token, "Session expired");
            }
            keep
        });
        before - sessions.len()
    }

    /// Periodically expire idle sessions until shutdown.
    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        shutdown: Arc<ShutdownManager>,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let expired = store.expire_idle(Instant::now());
                        if expired > 0 {
                            tracing::debug!(expired, remaining = store.len(), "Session sweep");
                        }
                    }
                    _ = shutdown.notified() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ComponentId;
    use crate::scheduler::{LogErrorSink, ManualClock};
    use crate::server::context::{Application, UiContext};
    use crate::server::session::SessionSettings;
    use crate::tree::ClassRegistry;

    struct Empty;

    impl Application for Empty {
        fn register_classes(&self, _: &mut ClassRegistry) {}

        fn start(&self, _: &mut UiContext, _: ComponentId) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn session(token: &str) -> Session {
        let settings = SessionSettings {
            clock: Arc::new(ManualClock::new()),
            polling_timeout: Duration::from_millis(500),
            error_sink: Arc::new(LogErrorSink),
        };
        Session::start(
            token.to_string(),
            Arc::new(ClassRegistry::new()),
            Arc::new(Empty),
            &settings,
        )
        .unwrap()
        .0
    }

    #[test]
    fn insert_replaces_prior_session() {
        let store = SessionStore::new(Duration::from_secs(60));
        let first = store.insert(session("a"));
        let second = store.insert(session("a"));
        assert_eq!(store.len(), 1);
        assert!(Arc::ptr_eq(&store.get("a").unwrap(), &second));
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn idle_sessions_expire() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.insert(session("a"));
        assert_eq!(store.expire_idle(Instant::now()), 0);
        assert_eq!(
            store.expire_idle(Instant::now() + Duration::from_secs(61)),
            1
        );
        assert!(store.is_empty());
    }

    #[test]
    fn remove_reports_presence() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.insert(session("a"));
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
    }
}

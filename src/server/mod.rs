//! Session transport: per-client sessions behind one HTTP endpoint.

mod context;
mod error;
mod router;
mod session;
mod shutdown;
mod store;

pub use context::{Application, Handler, UiContext};
pub use error::{ErrorResponse, ServerError};
pub use router::{build_router, EndpointState, HealthStatus};
pub use session::{Session, SessionError, SessionSettings};
pub use shutdown::{ExchangeGuard, ShutdownManager};
pub use store::{SessionStore, SharedSession};

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use axum::Router;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::scheduler::{LogErrorSink, SystemClock};
use crate::tree::ClassRegistry;

pub struct UiServer {
    pub addr: SocketAddr,
    /// The bound listener, kept alive to prevent port race conditions.
    /// Populated by try_bind(), consumed by run().
    listener: Option<TcpListener>,
    state: EndpointState,
    endpoint: String,
    sweep_interval: Duration,
    shutdown_grace: Duration,
}

impl UiServer {
    pub fn new(config: &Config, app: Arc<dyn Application>) -> Self {
        let mut classes = ClassRegistry::new();
        app.register_classes(&mut classes);

        let state = EndpointState {
            sessions: SessionStore::new(config.server.session_ttl()),
            app,
            classes: Arc::new(classes),
            settings: SessionSettings {
                clock: Arc::new(SystemClock),
                polling_timeout: config.scheduler.polling_timeout(),
                error_sink: Arc::new(LogErrorSink),
            },
            shutdown: Arc::new(ShutdownManager::new()),
            cookie_name: Arc::from(config.server.session_cookie.as_str()),
        };

        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            listener: None,
            state,
            endpoint: config.server.endpoint.clone(),
            sweep_interval: config.server.sweep_interval(),
            shutdown_grace: config.server.shutdown_grace(),
        }
    }

    /// The axum router, for serving or for driving in-process.
    pub fn router(&self) -> Router {
        build_router(self.state.clone(), &self.endpoint)
    }

    pub fn sessions(&self) -> SessionStore {
        self.state.sessions.clone()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.state.shutdown.clone(),
        }
    }

    /// Try to bind to `bind_addr`, falling back to incremental ports if busy.
    ///
    /// The listener is kept alive so no other process can claim the port
    /// between try_bind() and run().
    pub async fn try_bind(&mut self, bind_addr: &str) -> anyhow::Result<SocketAddr> {
        let bind_addr: SocketAddr = bind_addr
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", bind_addr))?;

        let start_port = bind_addr.port();
        let host = bind_addr.ip();

        // Port 0 asks the OS for any free port; no fallback needed.
        let last_port = if start_port == 0 {
            0
        } else {
            start_port.saturating_add(100)
        };

        for port in start_port..=last_port {
            let try_addr = SocketAddr::new(host, port);
            match TcpListener::bind(try_addr).await {
                Ok(listener) => {
                    let actual_addr = listener.local_addr()?;
                    self.addr = actual_addr;
                    self.listener = Some(listener);
                    tracing::info!("UI server bound to {}{}", actual_addr, self.endpoint);
                    return Ok(actual_addr);
                }
                Err(e) => {
                    tracing::debug!("Port {} busy: {}", port, e);
                    continue;
                }
            }
        }

        Err(anyhow!(
            "Could not find available port in range {}-{}",
            start_port,
            last_port
        ))
    }

    /// Run the server until shutdown is signalled.
    ///
    /// Consumes self to take ownership of the pre-bound listener.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = self
            .listener
            .ok_or_else(|| anyhow!("try_bind() must be called before run()"))?;

        tracing::info!("Starting UI server on {}", self.addr);

        let shutdown = self.state.shutdown.clone();
        let sweeper = self
            .state
            .sessions
            .spawn_sweeper(self.sweep_interval, shutdown.clone());

        let app = build_router(self.state.clone(), &self.endpoint);
        let signal = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                if let Err(e) = signal.wait_for_shutdown().await {
                    tracing::warn!("Shutdown signal listener failed: {}", e);
                }
            })
            .into_future()
            .await
            .context("UI server failed")?;

        shutdown.drain(self.shutdown_grace).await;
        sweeper.abort();
        tracing::info!(
            sessions = self.state.sessions.len(),
            "Shutting down gracefully"
        );

        Ok(())
    }
}

#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<ShutdownManager>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        self.shutdown.signal_shutdown();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }
}

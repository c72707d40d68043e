//! Shared test utilities: small applications and an in-process transport.

#![allow(dead_code, unused_imports)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use lightwire::client::{Transport, TransportError, TransportOutcome};
use lightwire::config::Config;
use lightwire::protocol::{
    ClientMessage, ComponentId, EventKind, PropertyChange, PropertyValue, RenderEvent,
    ServerMessage, ValueShape, WireUiEvent,
};
use lightwire::scheduler::{LogErrorSink, ManualClock};
use lightwire::server::{Application, SessionSettings, UiContext, UiServer};
use lightwire::tree::{ClassRegistry, ClassSpec};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Root with one button labelled "Hi" and no handlers.
pub struct StaticButton;

impl Application for StaticButton {
    fn register_classes(&self, registry: &mut ClassRegistry) {
        registry.register(ClassSpec::new("Button").property("label", ValueShape::String));
    }

    fn start(&self, ctx: &mut UiContext, root: ComponentId) -> anyhow::Result<()> {
        let button = ctx.add(root, "Button")?;
        ctx.set(button, "label", PropertyValue::text("Hi"))?;
        Ok(())
    }
}

/// Root (0), a button (1) relabelled on SELECT, and a text field (2)
/// mirroring TEXT input.
pub struct ClickAndType;

pub const BUTTON: ComponentId = ComponentId(1);
pub const FIELD: ComponentId = ComponentId(2);

impl Application for ClickAndType {
    fn register_classes(&self, registry: &mut ClassRegistry) {
        registry.register(ClassSpec::new("Button").property("label", ValueShape::String));
        registry.register(ClassSpec::new("TextField").property("text", ValueShape::String));
    }

    fn start(&self, ctx: &mut UiContext, root: ComponentId) -> anyhow::Result<()> {
        let button = ctx.add(root, "Button")?;
        ctx.set(button, "label", PropertyValue::text("Hi"))?;
        let clicks = Arc::new(AtomicUsize::new(0));
        ctx.on(button, EventKind::Select, move |ctx, _| {
            let n = clicks.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.set(button, "label", PropertyValue::text(format!("Clicked {n}")))?;
            Ok(())
        })?;

        let field = ctx.add(root, "TextField")?;
        ctx.on(field, EventKind::Text, move |ctx, event| {
            let text = event.content.clone().unwrap_or_default();
            ctx.set(field, "text", PropertyValue::text(text))?;
            Ok(())
        })?;
        Ok(())
    }
}

pub fn classes_for(app: &dyn Application) -> Arc<ClassRegistry> {
    let mut registry = ClassRegistry::new();
    app.register_classes(&mut registry);
    Arc::new(registry)
}

pub fn manual_settings(clock: Arc<ManualClock>) -> SessionSettings {
    SessionSettings {
        clock,
        polling_timeout: Duration::from_millis(1000),
        error_sink: Arc::new(LogErrorSink),
    }
}

pub fn test_server(app: Arc<dyn Application>) -> UiServer {
    UiServer::new(&Config::default(), app)
}

/// Response parts the tests look at.
pub struct Reply {
    pub status: StatusCode,
    pub set_cookie: Option<String>,
    pub body: serde_json::Value,
}

impl Reply {
    /// `name=value` from the `Set-Cookie` header.
    pub fn cookie_pair(&self) -> Option<String> {
        self.set_cookie
            .as_deref()
            .and_then(|value| value.split(';').next())
            .map(|pair| pair.trim().to_string())
    }

    pub fn message(&self) -> ServerMessage {
        serde_json::from_value(self.body.clone()).expect("body is a server message")
    }

    pub fn error_type(&self) -> Option<&str> {
        self.body["error"]["type"].as_str()
    }
}

/// Drive one request through the router.
pub async fn call(router: &Router, method: &str, path: &str, cookie: Option<&str>, body: &str) -> Reply {
    use tower::ServiceExt;

    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let set_cookie = response
        .headers()
        .get(SET_COOKIE)
        .map(|value| value.to_str().unwrap().to_string());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply {
        status,
        set_cookie,
        body,
    }
}

/// Transport that hands every exchange straight to an in-process router,
/// recording what was sent and how many exchanges overlapped.
pub struct RouterTransport {
    router: Router,
    endpoint: String,
    latency: Duration,
    cookie: Mutex<Option<String>>,
    sent: Mutex<Vec<ClientMessage>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RouterTransport {
    pub fn new(server: &UiServer, latency: Duration) -> Self {
        Self {
            router: server.router(),
            endpoint: server.endpoint().to_string(),
            latency,
            cookie: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    pub fn cookie(&self) -> Option<String> {
        self.cookie.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    async fn round_trip(&self, message: &ClientMessage) -> Result<ServerMessage, TransportError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let body = serde_json::to_string(message).unwrap();
        let cookie = self.cookie();
        let reply = call(&self.router, "POST", &self.endpoint, cookie.as_deref(), &body).await;
        if let Some(pair) = reply.cookie_pair() {
            *self.cookie.lock() = Some(pair);
        }
        if !reply.status.is_success() {
            return Err(TransportError::Status {
                status: reply.status.as_u16(),
                error_type: reply.error_type().unwrap_or("unknown").to_string(),
            });
        }
        Ok(reply.message())
    }
}

#[async_trait]
impl Transport for RouterTransport {
    async fn exchange(&self, message: ClientMessage, cancel: CancellationToken) -> TransportOutcome {
        self.sent.lock().push(message.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => TransportOutcome::Canceled,
            result = self.round_trip(&message) => match result {
                Ok(reply) => TransportOutcome::Success(reply),
                Err(e) => TransportOutcome::Error(e),
            },
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// A deviation the [`ScriptedTransport`] applies to one exchange.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Report a timeout without the request ever reaching the server.
    Timeout,
    /// Deliver the real reply with an extra property update for `id`.
    StrayUpdate(ComponentId),
}

/// [`RouterTransport`] that applies queued faults to the next exchanges.
pub struct ScriptedTransport {
    inner: RouterTransport,
    faults: Mutex<VecDeque<Fault>>,
    dropped: Mutex<Vec<ClientMessage>>,
}

impl ScriptedTransport {
    pub fn new(server: &UiServer) -> Self {
        Self {
            inner: RouterTransport::new(server, Duration::ZERO),
            faults: Mutex::new(VecDeque::new()),
            dropped: Mutex::new(Vec::new()),
        }
    }

    pub fn push_fault(&self, fault: Fault) {
        self.faults.lock().push_back(fault);
    }

    /// Messages that reached the server.
    pub fn delivered(&self) -> Vec<ClientMessage> {
        self.inner.sent()
    }

    /// Messages swallowed by a [`Fault::Timeout`].
    pub fn dropped(&self) -> Vec<ClientMessage> {
        self.dropped.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn exchange(&self, message: ClientMessage, cancel: CancellationToken) -> TransportOutcome {
        let fault = self.faults.lock().pop_front();
        match fault {
            None => self.inner.exchange(message, cancel).await,
            Some(Fault::Timeout) => {
                self.dropped.lock().push(message);
                TransportOutcome::Timeout(Duration::from_secs(30))
            }
            Some(Fault::StrayUpdate(id)) => match self.inner.exchange(message, cancel).await {
                TransportOutcome::Success(mut reply) => {
                    let stray = RenderEvent::PropertyChanged {
                        id,
                        change: PropertyChange {
                            name: "label".to_string(),
                            shape: ValueShape::String,
                            old_value: "n:".to_string(),
                            new_value: "s:stray".to_string(),
                        },
                    };
                    reply.ui_events.push(WireUiEvent::from(&stray));
                    TransportOutcome::Success(reply)
                }
                other => other,
            },
        }
    }
}

/// Poll `check` on the (possibly paused) tokio clock until it holds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

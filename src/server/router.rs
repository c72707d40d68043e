//! The single exchange endpoint and the health check.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::tree::ClassRegistry;

use super::context::Application;
use super::error::{ErrorResponse, ServerError};
use super::session::{Session, SessionSettings};
use super::shutdown::ShutdownManager;
use super::store::SessionStore;

/// Shared state behind every request.
#[derive(Clone)]
pub struct EndpointState {
    pub sessions: SessionStore,
    pub app: Arc<dyn Application>,
    pub classes: Arc<ClassRegistry>,
    pub settings: SessionSettings,
    pub shutdown: Arc<ShutdownManager>,
    pub cookie_name: Arc<str>,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub sessions: usize,
}

/// `endpoint` answers POST (exchange), GET (body-less exchange) and
/// DELETE (teardown); `/health` reports liveness.
pub fn build_router(state: EndpointState, endpoint: &str) -> Router {
    Router::new()
        .route(
            endpoint,
            get(exchange_get).post(exchange_post).delete(teardown),
        )
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<EndpointState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy".to_string(),
        service: "lightwire".to_string(),
        sessions: state.sessions.len(),
    })
}

async fn exchange_get(State(state): State<EndpointState>, headers: HeaderMap) -> Response {
    respond(state, &headers, ClientMessage::default()).await
}

async fn exchange_post(
    State(state): State<EndpointState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message = if body.iter().all(u8::is_ascii_whitespace) {
        ClientMessage::default()
    } else {
        match serde_json::from_slice::<ClientMessage>(&body) {
            Ok(message) => message,
            Err(e) => {
                let err = ServerError::InvalidRequest(e.to_string());
                return error_response(&err, &new_request_id());
            }
        }
    };
    respond(state, &headers, message).await
}

async fn teardown(State(state): State<EndpointState>, headers: HeaderMap) -> Response {
    match session_token(&headers, &state.cookie_name) {
        Some(token) if state.sessions.remove(&token) => StatusCode::NO_CONTENT.into_response(),
        Some(token) => error_response(
            &ServerError::SessionExpired { token },
            &new_request_id(),
        ),
        None => error_response(
            &ServerError::InvalidRequest("no session cookie".to_string()),
            &new_request_id(),
        ),
    }
}

/// Outcome of one exchange, before it is turned into HTTP.
struct Exchanged {
    token: String,
    message: ServerMessage,
    started: bool,
}

async fn respond(state: EndpointState, headers: &HeaderMap, message: ClientMessage) -> Response {
    let request_id = new_request_id();
    if state.shutdown.is_shutting_down() {
        return error_response(&ServerError::ShuttingDown, &request_id);
    }

    let _guard = state.shutdown.track_exchange();
    let token = session_token(headers, &state.cookie_name);
    let cookie_name = state.cookie_name.clone();

    // Session work is synchronous and holds the session lock throughout.
    let outcome = tokio::task::spawn_blocking(move || run_exchange(&state, token, message))
        .await
        .unwrap_or_else(|e| Err(ServerError::Internal(e.to_string())));

    match outcome {
        Ok(exchanged) => {
            let mut response = Json(exchanged.message).into_response();
            if exchanged.started {
                let cookie = format!(
                    "{}={}; Path=/; HttpOnly; SameSite=Strict",
                    cookie_name, exchanged.token
                );
                if let Ok(value) = HeaderValue::from_str(&cookie) {
                    response.headers_mut().insert(SET_COOKIE, value);
                }
            }
            response
        }
        Err(err) => error_response(&err, &request_id),
    }
}

/// RECEIVE: pick or create the session, then let it run its exchange.
fn run_exchange(
    state: &EndpointState,
    token: Option<String>,
    message: ClientMessage,
) -> Result<Exchanged, ServerError> {
    let existing = token.as_deref().and_then(|t| state.sessions.get(t));

    let session = match (existing, message.start_session) {
        (Some(session), false) => session,
        (None, false) if token.is_some() => {
            return Err(ServerError::SessionExpired {
                token: token.unwrap_or_default(),
            });
        }
        _ => {
            if !message.events.is_empty() {
                tracing::warn!(
                    dropped = message.events.len(),
                    "Input events in a start-session request are ignored"
                );
            }
            if let Some(previous) = token.as_deref() {
                if state.sessions.remove(previous) {
                    tracing::debug!(session = %previous, "Restarting session");
                }
            }
            let token = new_session_token();
            let (session, message) = Session::start(
                token.clone(),
                state.classes.clone(),
                state.app.clone(),
                &state.settings,
            )
            .map_err(|err| {
                tracing::error!(session = %token, error = %err, "Session failed to start");
                ServerError::from(err)
            })?;
            state.sessions.insert(session);
            return Ok(Exchanged {
                token,
                message,
                started: true,
            });
        }
    };

    let mut guard = session.lock();
    let token = guard.token().to_string();
    match guard.exchange(message.events) {
        Ok(message) => Ok(Exchanged {
            token,
            message,
            started: false,
        }),
        Err(err) => {
            drop(guard);
            state.sessions.remove(&token);
            tracing::error!(session = %token, error = %err, "Session desynchronized, discarded");
            Err(err.into())
        }
    }
}

fn error_response(err: &ServerError, request_id: &str) -> Response {
    match err {
        ServerError::Desync(_) => {}
        ServerError::InvalidRequest(_) => {
            tracing::warn!(request_id, error = %err, "Rejected request")
        }
        ServerError::SessionExpired { .. } | ServerError::ShuttingDown => {
            tracing::info!(request_id, error = %err, "Rejected request")
        }
        ServerError::Internal(_) => {
            tracing::error!(request_id, error = %err, "Exchange failed")
        }
    }
    ErrorResponse::from_error(err, request_id)
}

/// Tokens are always minted here, never taken from the client.
fn new_session_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Extract the session token from the `Cookie` header(s).
fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, token)| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_session_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; LWSESSION=abc123"));
        assert_eq!(
            session_token(&headers, "LWSESSION").as_deref(),
            Some("abc123")
        );
        assert_eq!(session_token(&headers, "OTHER"), None);
    }

    #[test]
    fn empty_cookie_value_is_no_token() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("LWSESSION="));
        assert_eq!(session_token(&headers, "LWSESSION"), None);
    }

    #[test]
    fn session_tokens_are_fresh_and_opaque() {
        let first = new_session_token();
        let second = new_session_token();
        assert_ne!(first, second);
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

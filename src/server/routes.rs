//! HTTP route handlers for the chat relay.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use tower_http::services::ServeDir;

use crate::domain::errors::RelayError;
use crate::session::{ResolvedSession, token_from_cookie_header};

use super::state::AppState;

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let static_dir = ServeDir::new(&state.config.server.static_dir);
    Router::new()
        .route("/", get(transcript_page))
        .route("/chat", post(chat))
        .route("/health", get(health_check))
        .nest_service("/static", static_dir)
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chat-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.store().len(),
    }))
}

/// Submitted chat form.
#[derive(Debug, Deserialize)]
pub struct ChatForm {
    /// The user's prompt.
    #[serde(default)]
    pub prompt: String,
}

/// Render the transcript for the caller's session.
async fn transcript_page(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let session = resolve_session(&state, &headers);
    let history = state.store().get(&session.id);
    let page = state
        .page
        .render(&history)
        .map(Html)
        .map_err(ApiError::from);
    with_session_cookie(&state, &session, page.into_response())
}

/// Run one chat exchange, then redirect back to the transcript.
async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<ChatForm>,
) -> Response {
    let session = resolve_session(&state, &headers);
    let outcome = state
        .orchestrator
        .run_turn(&session.id, &form.prompt)
        .await
        .map(|_| Redirect::to("/"))
        .map_err(ApiError::from);
    with_session_cookie(&state, &session, outcome.into_response())
}

fn resolve_session(state: &AppState, headers: &HeaderMap) -> ResolvedSession {
    let token = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(token_from_cookie_header);
    state.resolver.resolve(token)
}

fn with_session_cookie(state: &AppState, session: &ResolvedSession, mut response: Response) -> Response {
    if session.is_new {
        match HeaderValue::from_str(&state.resolver.issue_cookie(&session.id)) {
            Ok(cookie) => {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
            Err(err) => tracing::warn!(error = %err, "Session cookie is not a valid header value"),
        }
    }
    response
}

/// Handler error mapped to a generic failure page.
#[derive(Debug)]
pub struct ApiError(RelayError);

impl From<RelayError> for ApiError {
    fn from(value: RelayError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            RelayError::InvalidPrompt(_) => (StatusCode::BAD_REQUEST, "Prompt must not be empty"),
            err if err.is_backend() => (StatusCode::BAD_GATEWAY, "Error communicating with the model backend"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, "Request rejected");
        }
        (status, message).into_response()
    }
}

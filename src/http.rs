//! HTTP surface: thin request-handling glue around the poll service.
//!
//! This layer owns everything the core is not allowed to touch: cookies,
//! headers, status codes, and the SSE framing of the live view stream.

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use ulid::Ulid;

use crate::error::PollError;
use crate::identity;
use crate::service::PollService;

/// Cookie pinning a device token to a browsing context.
pub const DEVICE_COOKIE: &str = "device_id";
const DEVICE_COOKIE_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 365;

const SSE_KEEPALIVE: Duration = Duration::from_secs(25);

pub fn router(service: Arc<PollService>) -> Router {
    Router::new()
        .route("/api/polls", post(create_poll))
        .route("/api/polls/{code}", get(get_poll))
        .route("/api/polls/{code}/vote", post(vote))
        .route("/api/polls/{code}/events", get(events))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
struct CreatePollRequest {
    #[serde(default)]
    question: String,
    #[serde(default)]
    options: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteRequest {
    #[serde(default)]
    option_id: Option<String>,
}

async fn create_poll(
    State(service): State<Arc<PollService>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CreatePollRequest>,
) -> Response {
    let source = identity::source_address(&headers, Some(peer));
    match service
        .create_poll(&body.question, &body.options, &source)
        .await
    {
        Ok(code) => (
            StatusCode::CREATED,
            Json(json!({ "data": { "code": code } })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

async fn get_poll(
    State(service): State<Arc<PollService>>,
    Path(code): Path<String>,
) -> Response {
    match service.get_poll(&code).await {
        Ok(view) => Json(json!({ "data": view })).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn vote(
    State(service): State<Arc<PollService>>,
    Path(code): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<VoteRequest>,
) -> Response {
    let Some(option_id) = body.option_id else {
        return PollError::Validation("optionId is required.".to_string()).into_response();
    };

    let source = identity::source_address(&headers, Some(peer));

    // Issue a device token on first contact; echo the cookie thereafter.
    let (device_token, freshly_issued) = match device_token_from(&headers) {
        Some(token) => (token, false),
        None => (Ulid::new().to_string(), true),
    };

    match service.vote(&code, &option_id, &device_token, &source).await {
        Ok(outcome) => {
            let body = json!({
                "data": {
                    "ok": true,
                    "selectedOptionId": outcome.option_id,
                    "poll": outcome.view,
                }
            });
            let mut response = (StatusCode::CREATED, Json(body)).into_response();
            if freshly_issued {
                if let Ok(value) = HeaderValue::from_str(&device_cookie(&device_token)) {
                    response.headers_mut().insert(header::SET_COOKIE, value);
                }
            }
            response
        }
        Err(err) => err.into_response(),
    }
}

async fn events(
    State(service): State<Arc<PollService>>,
    Path(code): Path<String>,
) -> Response {
    match service.watch(&code).await {
        Ok(stream) => {
            let stream = stream.filter_map(|view| async move {
                match Event::default().json_data(&view) {
                    Ok(event) => Some(Ok::<_, Infallible>(event)),
                    Err(err) => {
                        tracing::warn!(%err, "failed to encode tally event");
                        None
                    }
                }
            });
            Sse::new(stream)
                .keep_alive(KeepAlive::new().interval(SSE_KEEPALIVE).text("ping"))
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}

fn device_cookie(token: &str) -> String {
    format!(
        "{DEVICE_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={DEVICE_COOKIE_MAX_AGE_SECS}"
    )
}

/// Pull the device token out of the Cookie header, if present.
fn device_token_from(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        if let Some((name, value)) = pair.trim().split_once('=') {
            if name == DEVICE_COOKIE && !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

impl PollError {
    fn status(&self) -> StatusCode {
        match self {
            PollError::Validation(_) | PollError::InvalidOption => StatusCode::BAD_REQUEST,
            PollError::NotFound => StatusCode::NOT_FOUND,
            PollError::PollClosed
            | PollError::DuplicateNetworkRecent
            | PollError::AlreadyVoted => StatusCode::CONFLICT,
            PollError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            PollError::RoomCodeCollision | PollError::Config(_) | PollError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        // Expected rejections go back to the caller as-is; storage failures
        // are logged for operators and surfaced generically.
        let message = match &self {
            PollError::Storage(cause) => {
                tracing::error!(%cause, "storage failure");
                "Unexpected server error.".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({ "error": message, "code": self.reason_code() });
        let mut response = (self.status(), Json(body)).into_response();

        if let PollError::RateLimited {
            retry_after_seconds,
        } = self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

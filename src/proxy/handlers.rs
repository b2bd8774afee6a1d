//! HTTP request handlers.

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Extension, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::normalize::{normalize, parse_chat_request};
use super::relay::Relay;
use super::server::{AppState, RequestId};
use crate::error::Error;

/// Handle POST /api/proxy
pub async fn proxy_default(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, Error> {
    relay_request(&state, None, request_id, body).await
}

/// Handle POST /api/proxy/:provider
pub async fn proxy_named(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(provider): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, Error> {
    relay_request(&state, Some(&provider), request_id, body).await
}

fn body_rejection(rejection: BytesRejection) -> Error {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge(rejection.body_text())
    } else {
        Error::BadRequest(rejection.body_text())
    }
}

/// Select, authenticate, normalize, open, relay.
///
/// Every failure here happens before the first byte is written, so each one
/// becomes a structured error response.
async fn relay_request(
    state: &AppState,
    provider: Option<&str>,
    request_id: RequestId,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, Error> {
    let request_id = request_id.0.to_string();

    let selected = state.registry.select(provider)?;
    let credentials = state.credentials.resolve(&selected.name)?;

    let request = body
        .map_err(body_rejection)
        .and_then(|body| parse_chat_request(&body))
        .inspect_err(|e| {
            tracing::info!(request_id = %request_id, error = %e, "Rejected client request");
        })?;
    let payload = normalize(request, &selected.policy)?;

    tracing::info!(
        request_id = %request_id,
        provider = %selected.name,
        kind = %selected.kind,
        model = %payload.model(),
        "Relaying request"
    );

    let relay = Relay::new(selected.name.as_str(), request_id.as_str());
    match relay
        .open(selected.adapter.as_ref(), &payload, &credentials)
        .await
    {
        Ok(relay) => Ok(relay.into_response()),
        Err((_, e)) => {
            tracing::warn!(
                request_id = %request_id,
                provider = %selected.name,
                kind = e.kind(),
                status = e.status_code().as_u16(),
                "Upstream could not be opened"
            );
            Err(e)
        }
    }
}

/// Any non-POST method on the relay routes.
pub async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(serde_json::json!({ "error": "Method Not Allowed" })),
    )
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chatrelay"
    }))
}

/// Handle GET /providers
///
/// Reports whether each provider has a key, never the key itself.
pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    let providers: Vec<serde_json::Value> = state
        .registry
        .providers()
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name,
                "kind": p.kind,
                "schema": p.schema,
                "key_configured": state.credentials.is_configured(&p.name),
            })
        })
        .collect();

    Json(serde_json::json!({
        "default_provider": state.registry.default_provider(),
        "providers": providers
    }))
}

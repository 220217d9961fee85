use std::time::SystemTime;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chat_store::{
    ChatStore, ChatStoreError, MessageInput, TenantHandle, ThreadInput, parse_cursor,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

pub mod api_envelope;
pub mod config;

use crate::api_envelope::{
    ApiErrorCode, ApiErrorTuple, data_with_status, error_response, not_found_error, ok_data,
    validation_error,
};
use crate::config::Config;

const SERVICE_NAME: &str = "chat-persistence-service";
const HEADER_USER_ID: &str = "x-user-id";

#[derive(Clone)]
struct AppState {
    store: ChatStore,
    started_at: SystemTime,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    tenants: usize,
}

/// Thread descriptor as sent by clients. Flags and timestamps arrive loosely typed.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertThreadRequest {
    #[serde(default)]
    id: Value,
    name: Option<String>,
    avatar_url: Option<String>,
    #[serde(default)]
    online: Value,
    #[serde(default)]
    last_message: Value,
    unread_count: Option<u64>,
    #[serde(default)]
    updated_at: Value,
    #[serde(default)]
    muted: Value,
    #[serde(default)]
    archived: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendMessageRequest {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    from_me: Value,
    #[serde(default)]
    text: Value,
}

#[derive(Debug, Default, Deserialize)]
struct ListMessagesQuery {
    after: Option<String>,
}

pub fn build_router(store: ChatStore) -> Router {
    let state = AppState {
        store,
        started_at: SystemTime::now(),
    };

    Router::new()
        .route("/healthz", get(health))
        .route("/api/threads", get(list_threads).post(upsert_thread))
        .route(
            "/api/threads/:thread_id/messages",
            get(list_messages).post(append_message),
        )
        .route("/api/threads/:thread_id/read", post(mark_read))
        .fallback(route_not_found)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured filter when set.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = match state.started_at.elapsed() {
        Ok(duration) => duration.as_secs(),
        Err(_) => 0,
    };

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        tenants: state.store.tenant_count().await,
    })
}

async fn list_threads(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let tenant = resolve_tenant(&state, &headers).await?;
    let threads = state.store.list_threads(&tenant).await;

    Ok(ok_data(serde_json::json!({ "threads": threads })))
}

async fn upsert_thread(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpsertThreadRequest>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let tenant = resolve_tenant(&state, &headers).await?;
    let input = thread_input(payload)?;
    let thread = state
        .store
        .upsert_thread(&tenant, input)
        .await
        .map_err(map_chat_store_error)?;

    Ok(ok_data(serde_json::json!({
        "ok": true,
        "thread": thread,
    })))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let tenant = resolve_tenant(&state, &headers).await?;
    let thread_id = normalize_thread_id(&thread_id)?;
    let after = query
        .after
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(parse_cursor)
        .transpose()
        .map_err(map_chat_store_error)?;

    let messages = state.store.list_messages(&tenant, &thread_id, after).await;

    Ok(ok_data(serde_json::json!({
        "threadId": thread_id,
        "messages": messages,
    })))
}

async fn append_message(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<AppendMessageRequest>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let tenant = resolve_tenant(&state, &headers).await?;
    let thread_id = normalize_thread_id(&thread_id)?;
    let input = MessageInput {
        id: optional_text(payload.id),
        from_me: coerce_flag(&payload.from_me),
        text: Some(coerce_text(payload.text)),
    };

    let outcome = state.store.append_message(&tenant, &thread_id, input).await;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok(data_with_status(
        status,
        serde_json::json!({
            "ok": true,
            "id": outcome.id,
            "at": outcome.at,
            "created": outcome.created,
        }),
    ))
}

async fn mark_read(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let tenant = resolve_tenant(&state, &headers).await?;
    let thread_id = normalize_thread_id(&thread_id)?;
    let thread = state.store.mark_read(&tenant, &thread_id).await;

    Ok(ok_data(serde_json::json!({
        "ok": true,
        "thread": thread,
    })))
}

async fn route_not_found() -> ApiErrorTuple {
    not_found_error("Route not found.")
}

async fn resolve_tenant(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<TenantHandle, ApiErrorTuple> {
    let user_key = headers
        .get(HEADER_USER_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| validation_error(HEADER_USER_ID, "User id header is required."))?;

    Ok(state.store.resolve_tenant(user_key).await)
}

/// Thread ids are opaque: kept verbatim, only a blank id is rejected.
fn normalize_thread_id(raw: &str) -> Result<String, ApiErrorTuple> {
    if raw.trim().is_empty() {
        return Err(validation_error("thread_id", "Thread id is required."));
    }
    Ok(raw.to_string())
}

fn thread_input(payload: UpsertThreadRequest) -> Result<ThreadInput, ApiErrorTuple> {
    let updated_at = parse_timestamp_value(&payload.updated_at)
        .map_err(|message| validation_error("updatedAt", &message))?;

    Ok(ThreadInput {
        id: optional_text(payload.id).unwrap_or_default(),
        name: payload.name,
        avatar_url: payload.avatar_url,
        online: optional_flag(&payload.online),
        last_message: optional_text(payload.last_message),
        unread_count: payload.unread_count,
        updated_at,
        muted: optional_flag(&payload.muted),
        archived: optional_flag(&payload.archived),
    })
}

/// Stringifies any JSON value; `null` becomes the empty string.
fn coerce_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    }
}

fn optional_text(value: Value) -> Option<String> {
    if value.is_null() {
        None
    } else {
        Some(coerce_text(value))
    }
}

/// Loose truthiness: `false`, `0`, `""` and `null` are false, everything else true.
fn coerce_flag(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn optional_flag(value: &Value) -> Option<bool> {
    if value.is_null() {
        None
    } else {
        Some(coerce_flag(value))
    }
}

/// RFC 3339 strings or epoch milliseconds (number or numeric string).
fn parse_timestamp_value(value: &Value) -> Result<Option<DateTime<Utc>>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) if text.trim().is_empty() => Ok(None),
        Value::String(text) => parse_cursor(text)
            .map(Some)
            .map_err(|_| format!("Invalid timestamp '{text}'.")),
        Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(Some)
            .ok_or_else(|| format!("Invalid timestamp {number}.")),
        other => Err(format!("Invalid timestamp {other}.")),
    }
}

fn map_chat_store_error(error: ChatStoreError) -> ApiErrorTuple {
    match error {
        ChatStoreError::Validation { field, message } => validation_error(field, &message),
        ChatStoreError::Persistence { message } => {
            error_response(ApiErrorCode::ServiceUnavailable, message)
        }
    }
}

// src/server/handlers.rs

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::AppState;
use super::error::ApiError;
use crate::core::cache::CachedReport;
use crate::core::report::AssessmentReport;

// --- Client Identity ---

/// Rate-limit identity: the peer IP, else `"unknown"`. The first
/// `X-Forwarded-For` hop is used instead only when the service is configured
/// to trust it.
pub struct ClientKey(pub String);

impl FromRequestParts<AppState> for ClientKey {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if state.settings.trust_forwarded_for {
            let forwarded = parts
                .headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(client) = forwarded {
                return Ok(ClientKey(client.to_string()));
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(ClientKey(peer.unwrap_or_else(|| "unknown".to_string())))
    }
}

fn admit(state: &AppState, client: &str) -> Result<(), ApiError> {
    if state.limiter.allow(client) {
        return Ok(());
    }
    Err(ApiError::RateLimited { retry_after: state.limiter.retry_after(client) })
}

// --- Handlers ---

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn check_domain(
    State(state): State<AppState>,
    ClientKey(client): ClientKey,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let domain = state.normalizer.normalize(&raw)?;
    admit(&state, &client)?;
    info!(target = %domain, client = %client, "Domain check requested.");

    let cached = state.report_for(&domain).await?;
    Ok(report_response(&state, cached, &headers))
}

/// 200 with the report, or 304 when the client already holds this fingerprint.
fn report_response(state: &AppState, cached: CachedReport, request_headers: &HeaderMap) -> Response {
    let etag = format!("\"{}\"", cached.report.fingerprint);
    let not_modified = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|candidates| etag_matches(candidates, &cached.report.fingerprint));

    let mut response = if not_modified {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        Json(cached.report.clone()).into_response()
    };

    let headers = response.headers_mut();
    let cache_control = format!("public, max-age={}", state.settings.http_max_age_secs);
    if let Ok(value) = HeaderValue::from_str(&cache_control) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }
    if !cached.age.is_zero() {
        headers.insert(header::AGE, HeaderValue::from(cached.age.as_secs()));
    }
    response
}

/// `If-None-Match` semantics: `*`, or any listed tag (weak or strong, quoted
/// or bare) equal to the fingerprint.
fn etag_matches(candidates: &str, fingerprint: &str) -> bool {
    candidates.split(',').map(str::trim).any(|tag| {
        tag == "*" || tag.trim_start_matches("W/").trim_matches('"') == fingerprint
    })
}

// --- Batch ---

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub domains: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Report(Arc<AssessmentReport>),
    Error { domain: String, error: String },
}

pub async fn check_domains(
    State(state): State<AppState>,
    ClientKey(client): ClientKey,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<Vec<BatchItem>>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    if request.domains.len() > state.settings.max_batch_size {
        return Err(ApiError::BadRequest(format!(
            "too many domains: {} (maximum {})",
            request.domains.len(),
            state.settings.max_batch_size
        )));
    }
    admit(&state, &client)?;
    info!(client = %client, count = request.domains.len(), "Batch check requested.");

    let permits = Arc::new(Semaphore::new(state.settings.batch_concurrency.max(1)));
    let mut set = JoinSet::new();
    for (index, raw) in request.domains.iter().cloned().enumerate() {
        let state = state.clone();
        let permits = permits.clone();
        set.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            (index, assess_item(&state, raw).await)
        });
    }

    let mut items: Vec<Option<BatchItem>> = request.domains.iter().map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, item)) => items[index] = Some(item),
            Err(e) => error!(error = %e, "Batch item task crashed."),
        }
    }

    let items = items
        .into_iter()
        .zip(request.domains)
        .map(|(item, domain)| {
            item.unwrap_or_else(|| BatchItem::Error { domain, error: "internal error".to_string() })
        })
        .collect();
    Ok(Json(items))
}

/// One batch element. Failures stay local to the element.
async fn assess_item(state: &AppState, raw: String) -> BatchItem {
    let domain = match state.normalizer.normalize(&raw) {
        Ok(domain) => domain,
        Err(e) => {
            warn!(input = %raw, error = %e, "Rejected batch domain.");
            return BatchItem::Error { domain: raw, error: e.to_string() };
        }
    };
    match state.report_for(&domain).await {
        Ok(cached) => BatchItem::Report(cached.report),
        Err(e) => BatchItem::Error { domain: raw, error: e.to_string() },
    }
}

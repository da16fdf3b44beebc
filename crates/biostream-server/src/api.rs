//! REST API endpoints for biostream
//!
//! All endpoints are under /api/v1/ and return JSON. Endpoints that change
//! shared state or reveal sessions require `Authorization: Bearer <token>`.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use biostream_core::dsp::filter::{FilterConfig, InsufficientDataWarning};
use biostream_core::dsp::spectrum::PulseEstimate;
use biostream_core::dsp::Sample;
use biostream_core::session::SessionInfo;
use biostream_core::stats::{QualityOverview, QualityReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// Login request
#[derive(Deserialize)]
pub struct AuthRequest {
    pub password: String,
}

/// Login response
#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct RevokeResponse {
    pub revoked: bool,
}

/// Filter update request
#[derive(Debug, Deserialize)]
pub struct FilterUpdate {
    pub lowcut: f64,
    pub highcut: f64,
    pub order: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Batch filter request
#[derive(Deserialize)]
pub struct ApplyRequest {
    pub data: Vec<f64>,
}

#[derive(Serialize)]
pub struct ApplyResponse {
    pub filtered: Vec<f64>,
    pub warning: Option<InsufficientDataWarning>,
}

/// Pushed sensor reading
#[derive(Deserialize)]
pub struct DataPoint {
    pub timestamp: f64,
    pub value: f64,
}

#[derive(Serialize)]
pub struct PushResponse {
    pub seq: u64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Seconds back from the newest sample
    pub window: Option<f64>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub count: usize,
    pub samples: Vec<Sample>,
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub cleared: bool,
}

#[derive(Serialize)]
pub struct PulseResponse {
    pub window_secs: f64,
    pub estimate: Option<PulseEstimate>,
}

/// Remote URL response
#[derive(Serialize)]
pub struct RemoteUrlResponse {
    pub url: String,
    pub ws_url: String,
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve and check the caller's bearer token
async fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::MissingToken)?;
    state.coordinator.check_token(token.to_string()).await??;
    Ok(token.to_string())
}

/// POST /api/v1/auth
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<AuthRequest>,
) -> ApiResult<AuthResponse> {
    let token = state
        .coordinator
        .authenticate(req.password)
        .await
        .map_err(ApiError::from)?
        .map_err(ApiError::from)?;

    Ok(Json(AuthResponse {
        token: token.value,
        issued_at: token.issued_at,
        expires_at: token.expires_at,
    }))
}

/// DELETE /api/v1/auth
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<RevokeResponse> {
    let token = require_auth(&state, &headers).await?;
    let revoked = state
        .coordinator
        .revoke_token(token)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(RevokeResponse { revoked }))
}

/// GET /api/v1/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<SessionInfo>> {
    require_auth(&state, &headers).await?;
    let sessions = state
        .coordinator
        .list_sessions()
        .await
        .map_err(ApiError::from)?;
    Ok(Json(sessions))
}

/// GET /api/v1/filter
pub async fn get_filter(State(state): State<AppState>) -> ApiResult<FilterConfig> {
    let config = state
        .coordinator
        .filter_config()
        .await
        .map_err(ApiError::from)?;
    Ok(Json(config))
}

/// POST /api/v1/filter
pub async fn set_filter(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<FilterUpdate>,
) -> ApiResult<FilterConfig> {
    require_auth(&state, &headers).await?;
    let config = state
        .coordinator
        .configure_filter(update.lowcut, update.highcut, update.order, update.enabled)
        .await
        .map_err(ApiError::from)?
        .map_err(ApiError::from)?;
    Ok(Json(config))
}

/// POST /api/v1/filter/apply
pub async fn apply_filter(
    State(state): State<AppState>,
    Json(req): Json<ApplyRequest>,
) -> ApiResult<ApplyResponse> {
    let output = state
        .coordinator
        .apply_filter_to_array(req.data)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(ApplyResponse {
        filtered: output.values,
        warning: output.warning,
    }))
}

/// POST /api/v1/data/push
pub async fn push_data(
    State(state): State<AppState>,
    Json(point): Json<DataPoint>,
) -> ApiResult<PushResponse> {
    if !(point.timestamp.is_finite() && point.value.is_finite()) {
        return Err(ApiError::BadRequest("timestamp and value must be finite".into()).into());
    }
    let seq = state
        .coordinator
        .ingest(point.timestamp, point.value)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(PushResponse { seq }))
}

/// GET /api/v1/history?window=S
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<HistoryResponse> {
    if let Some(window) = query.window {
        if !(window.is_finite() && window >= 0.0) {
            return Err(ApiError::BadRequest(format!("invalid window: {}", window)).into());
        }
    }
    let samples = state
        .coordinator
        .history(query.window)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(HistoryResponse {
        count: samples.len(),
        samples,
    }))
}

/// POST /api/v1/history/clear
///
/// Clears the sample history and restarts the filter.
pub async fn clear_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<ClearResponse> {
    require_auth(&state, &headers).await?;
    state
        .coordinator
        .clear_history()
        .await
        .map_err(ApiError::from)?;
    Ok(Json(ClearResponse { cleared: true }))
}

/// GET /api/v1/quality
pub async fn get_quality(State(state): State<AppState>) -> ApiResult<QualityOverview> {
    let overview = state
        .coordinator
        .quality_overview()
        .await
        .map_err(ApiError::from)?;
    Ok(Json(overview))
}

/// GET /api/v1/quality/{client_id}
pub async fn get_client_quality(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> ApiResult<QualityReport> {
    let report = state
        .coordinator
        .quality_report(client_id.clone())
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::ClientNotFound(client_id))?;
    Ok(Json(report))
}

/// GET /api/v1/status
pub async fn get_status(
    State(state): State<AppState>,
) -> ApiResult<crate::coordinator::StreamStatus> {
    let status = state.coordinator.status().await.map_err(ApiError::from)?;
    Ok(Json(status))
}

/// GET /api/v1/pulse
pub async fn get_pulse(State(state): State<AppState>) -> ApiResult<PulseResponse> {
    let estimate = state.coordinator.pulse().await.map_err(ApiError::from)?;
    Ok(Json(PulseResponse {
        window_secs: crate::coordinator::PULSE_WINDOW_SECS,
        estimate,
    }))
}

/// GET /api/v1/remote-url
///
/// Returns the address remote viewers on the LAN should use.
pub async fn get_remote_url(State(state): State<AppState>) -> Json<RemoteUrlResponse> {
    let ip = local_ip_address::local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| "localhost".to_string());
    let host = format!("{}:{}", ip, state.config.port);
    Json(RemoteUrlResponse {
        url: format!("http://{}", host),
        ws_url: format!("ws://{}/api/v1/ws", host),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_filter_update_defaults_enabled() {
        let json = r#"{"lowcut": 0.5, "highcut": 8.0, "order": 2}"#;
        let update: FilterUpdate = serde_json::from_str(json).unwrap();
        assert!(update.enabled);
        assert_eq!(update.order, 2);
    }

    #[test]
    fn test_filter_update_disabled() {
        let json = r#"{"lowcut": 0.5, "highcut": 8.0, "order": 2, "enabled": false}"#;
        let update: FilterUpdate = serde_json::from_str(json).unwrap();
        assert!(!update.enabled);
    }

    #[test]
    fn test_apply_response_serializes_warning() {
        let resp = ApplyResponse {
            filtered: vec![1.0, 2.0],
            warning: Some(InsufficientDataWarning {
                required: 12,
                actual: 2,
            }),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["warning"]["required"], 12);
        assert_eq!(json["warning"]["actual"], 2);
        assert_eq!(json["filtered"][1], 2.0);
    }

    #[test]
    fn test_history_query_optional_window() {
        let q: HistoryQuery = serde_json::from_str("{}").unwrap();
        assert!(q.window.is_none());
        let q: HistoryQuery = serde_json::from_str(r#"{"window": 2.5}"#).unwrap();
        assert_eq!(q.window, Some(2.5));
    }

    #[test]
    fn test_remote_url_response_serializes() {
        let resp = RemoteUrlResponse {
            url: "http://10.0.0.2:8765".to_string(),
            ws_url: "ws://10.0.0.2:8765/api/v1/ws".to_string(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"url\":\"http://10.0.0.2:8765\""));
        assert!(json.contains("/api/v1/ws"));
    }
}

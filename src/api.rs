//! ==============================================================================
//! api.rs - http router: rest query surface + /ws
//! ==============================================================================
//!
//! routes:
//!     GET /health                                     liveness
//!     GET /api/sensor-readings/:device_id?limit=N     recent readings
//!     GET /api/sensor-readings/:device_id/range       ?startTime=ISO&endTime=ISO
//!     GET /api/mqtt/status                            {"connected": bool}
//!     GET /ws                                         viewer websocket (gateway.rs)
//!
//! every route is read-only. polling clients use these instead of /ws.
//!
//! ==============================================================================

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::bridge::TelemetryBridge;
use crate::config::HistoryConfig;
use crate::domain::Reading;
use crate::error::ApiError;
use crate::gateway;
use crate::store::ReadingStore;

// ==============================================================================
// shared state
// ==============================================================================
// one store and one bridge per process, built in main.rs and handed to every
// handler as cheap Arc clones.

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ReadingStore>,
    pub bridge: Arc<TelemetryBridge>,
    pub default_limit: usize,
}

impl AppState {
    pub fn new(store: Arc<ReadingStore>, bridge: Arc<TelemetryBridge>, history: &HistoryConfig) -> Self {
        Self {
            store,
            bridge,
            default_limit: history.default_limit,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sensor-readings/:device_id", get(recent_readings))
        .route("/api/sensor-readings/:device_id/range", get(range_readings))
        .route("/api/mqtt/status", get(mqtt_status))
        .route("/ws", get(gateway::ws_handler))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                tracing::info_span!("http", method = %req.method(), uri = %req.uri())
            }),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

#[derive(Debug, Default, Deserialize)]
pub struct RecentParams {
    /// kept as text: anything that is not a positive integer means "default"
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeParams {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

async fn recent_readings(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<Reading>>, ApiError> {
    let limit = params
        .limit
        .as_deref()
        .and_then(|l| l.trim().parse::<usize>().ok())
        .filter(|&l| l > 0)
        .unwrap_or(state.default_limit);

    Ok(Json(state.store.recent(&device_id, limit)?))
}

async fn range_readings(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<Reading>>, ApiError> {
    let (start, end) = params.bounds()?;
    Ok(Json(state.store.by_time_range(&device_id, start, end)?))
}

async fn mqtt_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "connected": state.bridge.connection_status() }))
}

impl RangeParams {
    /// both bounds present and parseable, checked before touching the store
    pub fn bounds(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
        match (present(&self.start_time), present(&self.end_time)) {
            (Some(start), Some(end)) => {
                let start = parse_instant(start).ok_or(ApiError::InvalidRange)?;
                let end = parse_instant(end).ok_or(ApiError::InvalidRange)?;
                Ok((start, end))
            }
            _ => Err(ApiError::MissingRange),
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// rfc 3339, or a naive date-time / plain date taken as utc
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(start: Option<&str>, end: Option<&str>) -> RangeParams {
        RangeParams {
            start_time: start.map(String::from),
            end_time: end.map(String::from),
        }
    }

    #[test]
    fn missing_or_blank_bound_is_missing_range() {
        for p in [
            params(Some("2025-01-01T00:00:00Z"), None),
            params(None, Some("2025-01-01T00:00:00Z")),
            params(Some("  "), Some("2025-01-01T00:00:00Z")),
            params(None, None),
        ] {
            assert!(matches!(p.bounds(), Err(ApiError::MissingRange)));
        }
    }

    #[test]
    fn unparseable_bound_is_invalid_range() {
        let p = params(Some("yesterday"), Some("2025-01-01T00:00:00Z"));
        assert!(matches!(p.bounds(), Err(ApiError::InvalidRange)));
    }

    #[test]
    fn accepts_common_iso_forms() {
        let expected: DateTime<Utc> = "2025-01-01T10:00:00Z".parse().unwrap();
        assert_eq!(parse_instant("2025-01-01T10:00:00Z"), Some(expected));
        assert_eq!(parse_instant("2025-01-01T12:00:00+02:00"), Some(expected));
        assert_eq!(parse_instant("2025-01-01T10:00:00.000"), Some(expected));
        assert_eq!(
            parse_instant("2025-01-01"),
            Some("2025-01-01T00:00:00Z".parse().unwrap())
        );
    }
}

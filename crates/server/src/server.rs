//! Control API HTTP server.
//!
//! Maps the governor's method-level contract onto axum routes. The global
//! halt endpoint requires no authentication: in an emergency, speed is
//! more important than access control. Resumes carry an operator id and
//! are audited as USER actions.
//!
//! ## Endpoints
//!
//! - `POST /orders/check` — admission gate (mutating; call per order attempt)
//! - `GET  /units/{id}/allowed` — read-only admission check
//! - `POST /units/{id}/halt` / `POST /units/{id}/resume` — per-unit scope
//! - `POST /halt` / `POST /resume` — global scope
//! - `GET  /status` — full control-plane status
//! - `GET  /violations?limit=N` — most recent violations (default 50)
//! - `GET  /health` — liveness check

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use fg_control::{AdmissionDecision, GovernorStatus, RiskGovernor, Violation};
use fg_core::types::{OrderSide, UnitId};

/// Default number of violations returned by `/violations`.
const DEFAULT_VIOLATIONS_LIMIT: usize = 50;

/// Body of the `POST /orders/check` request.
#[derive(Debug, Deserialize)]
struct CheckOrderRequest {
    unit_id: UnitId,
    instrument: String,
    side: OrderSide,
}

/// Body of halt requests.
#[derive(Debug, Deserialize)]
struct HaltRequest {
    reason: String,
}

/// Body of resume requests.
#[derive(Debug, Deserialize)]
struct ResumeRequest {
    operator_id: String,
}

/// Query parameters for `GET /violations`.
#[derive(Debug, Deserialize)]
struct ViolationsQuery {
    limit: Option<usize>,
}

/// Acknowledgment for state-changing endpoints.
#[derive(Debug, Serialize)]
struct AckResponse {
    status: &'static str,
}

/// JSON response for the `/health` endpoint.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Build the control API router.
pub fn control_router(governor: Arc<RiskGovernor>) -> Router {
    Router::new()
        .route("/orders/check", post(check_order_handler))
        .route("/units/:id/allowed", get(unit_allowed_handler))
        .route("/units/:id/halt", post(halt_unit_handler))
        .route("/units/:id/resume", post(resume_unit_handler))
        .route("/halt", post(global_halt_handler))
        .route("/resume", post(global_resume_handler))
        .route("/status", get(status_handler))
        .route("/violations", get(violations_handler))
        .route("/health", get(health_handler))
        .with_state(governor)
}

/// Run the control API until cancelled.
pub async fn run_server(
    governor: Arc<RiskGovernor>,
    bind_addr: &str,
    cancel: CancellationToken,
) -> Result<()> {
    let app = control_router(governor);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind control API to {}", bind_addr))?;
    tracing::info!(addr = bind_addr, "control API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("control API server failed")?;
    Ok(())
}

/// `POST /orders/check` — the admission gate.
async fn check_order_handler(
    State(governor): State<Arc<RiskGovernor>>,
    Json(req): Json<CheckOrderRequest>,
) -> Json<AdmissionDecision> {
    Json(governor.record_order(&req.unit_id, &req.instrument, req.side))
}

/// `GET /units/{id}/allowed` — read-only admission check.
async fn unit_allowed_handler(
    State(governor): State<Arc<RiskGovernor>>,
    Path(id): Path<String>,
) -> Json<AdmissionDecision> {
    Json(governor.is_unit_allowed(&UnitId::new(id)))
}

/// `POST /units/{id}/halt` — halt one unit.
async fn halt_unit_handler(
    State(governor): State<Arc<RiskGovernor>>,
    Path(id): Path<String>,
    Json(req): Json<HaltRequest>,
) -> Result<Json<AckResponse>, StatusCode> {
    governor
        .halt_unit(&UnitId::new(id), &req.reason)
        .map_err(internal_error)?;
    Ok(Json(AckResponse { status: "ok" }))
}

/// `POST /units/{id}/resume` — resume one unit, attributed to an operator.
async fn resume_unit_handler(
    State(governor): State<Arc<RiskGovernor>>,
    Path(id): Path<String>,
    Json(req): Json<ResumeRequest>,
) -> Result<Json<AckResponse>, StatusCode> {
    governor
        .resume_unit(&UnitId::new(id), &req.operator_id)
        .map_err(internal_error)?;
    Ok(Json(AckResponse { status: "ok" }))
}

/// `POST /halt` — halt the whole fleet. No auth required.
async fn global_halt_handler(
    State(governor): State<Arc<RiskGovernor>>,
    Json(req): Json<HaltRequest>,
) -> Result<Json<AckResponse>, StatusCode> {
    governor
        .trigger_global_halt(&req.reason)
        .map_err(internal_error)?;
    Ok(Json(AckResponse { status: "ok" }))
}

/// `POST /resume` — resume the whole fleet, attributed to an operator.
async fn global_resume_handler(
    State(governor): State<Arc<RiskGovernor>>,
    Json(req): Json<ResumeRequest>,
) -> Result<Json<AckResponse>, StatusCode> {
    governor
        .resume_global(&req.operator_id)
        .map_err(internal_error)?;
    Ok(Json(AckResponse { status: "ok" }))
}

/// `GET /status` — full control-plane status.
async fn status_handler(
    State(governor): State<Arc<RiskGovernor>>,
) -> Result<Json<GovernorStatus>, StatusCode> {
    governor.status().map(Json).map_err(internal_error)
}

/// `GET /violations?limit=N` — most recent violations, newest first.
async fn violations_handler(
    State(governor): State<Arc<RiskGovernor>>,
    Query(query): Query<ViolationsQuery>,
) -> Result<Json<Vec<Violation>>, StatusCode> {
    let limit = query.limit.unwrap_or(DEFAULT_VIOLATIONS_LIMIT);
    governor
        .recent_violations(limit)
        .map(Json)
        .map_err(internal_error)
}

/// `GET /health` — simple liveness check.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

fn internal_error(err: anyhow::Error) -> StatusCode {
    tracing::error!(error = %err, "control API request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{DateTime, Utc};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use fg_control::{
        GlobalLimits, MemoryAuditSink, PerUnitLimits, StaticUnitRegistry, TradeLedger,
    };

    struct ZeroLedger;

    #[async_trait::async_trait]
    impl TradeLedger for ZeroLedger {
        async fn realized_pnl_since(
            &self,
            _since: DateTime<Utc>,
            _unit: Option<&UnitId>,
        ) -> anyhow::Result<f64> {
            Ok(0.0)
        }
    }

    fn make_governor() -> Arc<RiskGovernor> {
        Arc::new(RiskGovernor::new(
            GlobalLimits::default(),
            PerUnitLimits::default(),
            100_000.0,
            Arc::new(ZeroLedger),
            Arc::new(StaticUnitRegistry::new(vec![UnitId::new("U1")])),
            Arc::new(MemoryAuditSink::new()),
        ))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = control_router(make_governor());
        let resp = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_initially_active() {
        let app = control_router(make_governor());
        let resp = app.oneshot(get("/status")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["global_halt"], false);
        assert_eq!(json["halt_reason"], serde_json::Value::Null);
        assert_eq!(json["halted_units"], serde_json::json!([]));
        assert_eq!(json["is_running"], false);
    }

    #[tokio::test]
    async fn test_check_order_allowed() {
        let app = control_router(make_governor());
        let resp = app
            .oneshot(post_json(
                "/orders/check",
                serde_json::json!({
                    "unit_id": "U1",
                    "instrument": "ESU5",
                    "side": "buy",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["allowed"], true);
    }

    #[tokio::test]
    async fn test_global_halt_denies_orders() {
        let governor = make_governor();
        let app = control_router(governor.clone());

        let resp = app
            .clone()
            .oneshot(post_json(
                "/halt",
                serde_json::json!({ "reason": "market anomaly" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(post_json(
                "/orders/check",
                serde_json::json!({
                    "unit_id": "U1",
                    "instrument": "ESU5",
                    "side": "sell",
                }),
            ))
            .await
            .unwrap();
        let json = body_json(resp).await;
        assert_eq!(json["allowed"], false);
        let reason = json["reason"].as_str().unwrap();
        assert!(reason.contains("Global halt"));
        assert!(reason.contains("market anomaly"));
    }

    #[tokio::test]
    async fn test_unit_halt_and_resume_flow() {
        let app = control_router(make_governor());

        let resp = app
            .clone()
            .oneshot(post_json(
                "/units/U1/halt",
                serde_json::json!({ "reason": "manual inspection" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.clone().oneshot(get("/units/U1/allowed")).await.unwrap();
        let json = body_json(resp).await;
        assert_eq!(json["allowed"], false);
        assert!(json["reason"].as_str().unwrap().contains("Unit halted"));

        let resp = app
            .clone()
            .oneshot(post_json(
                "/units/U1/resume",
                serde_json::json!({ "operator_id": "user-42" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.oneshot(get("/units/U1/allowed")).await.unwrap();
        let json = body_json(resp).await;
        assert_eq!(json["allowed"], true);
    }

    #[tokio::test]
    async fn test_resume_when_active_is_ok() {
        let app = control_router(make_governor());
        let resp = app
            .oneshot(post_json(
                "/resume",
                serde_json::json!({ "operator_id": "user-1" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_violations_endpoint_reports_breaches() {
        let governor = make_governor();
        let unit = UnitId::new("U1");
        // Breach the minute rate: default limit is 10.
        for _ in 0..11 {
            governor.record_order(&unit, "ESU5", OrderSide::Buy);
        }

        let app = control_router(governor);
        let resp = app.oneshot(get("/violations?limit=5")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        let violations = json.as_array().unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0]["type"], "ORDER_VELOCITY");
        assert_eq!(violations[0]["severity"], "WARNING");
    }

    #[tokio::test]
    async fn test_status_reflects_halted_unit() {
        let governor = make_governor();
        governor.halt_unit(&UnitId::new("U1"), "test").unwrap();

        let app = control_router(governor);
        let json = body_json(app.oneshot(get("/status")).await.unwrap()).await;
        assert_eq!(json["halted_units"], serde_json::json!(["U1"]));
    }
}

//! HTTP surface ของ termsync — operator endpoints, downstream read boundary
//! และ alert stream

pub mod accounts;
pub mod monitor;
pub mod ops;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{require_api_key, HEALTH_PATH};
use crate::state::SharedState;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Operator ──────────────────────────────────────────────────────────
        .route(HEALTH_PATH,                   get(ops::get_health))
        .route("/api/cycles",                 get(ops::list_cycles))
        .route("/api/cycles/last",            get(ops::get_last_cycle))
        .route("/api/ops/cycle",              post(ops::force_cycle))
        .route("/api/ops/reset",              post(ops::reset_counters))
        .route("/api/remediation",            get(ops::get_remediation))
        // ── Downstream read boundary ──────────────────────────────────────────
        .route("/api/accounts",               get(accounts::list_accounts))
        .route("/api/accounts/:number",       get(accounts::get_account))
        .route("/api/accounts/:number/deals", get(accounts::get_account_deals))
        // ── Alerts ────────────────────────────────────────────────────────────
        .route("/api/alerts",                 get(monitor::list_alerts))
        .route("/ws/alerts",                  get(monitor::ws_alerts))
        // ── Middleware ────────────────────────────────────────────────────────
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::{rig, rig_with};
    use crate::terminal::mock::MockBehavior;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::time::Duration;
    use tower::ServiceExt;

    async fn call(app: Router, method: &str, uri: &str, api_key: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(key) = api_key {
            req = req.header("X-API-Key", key);
        }
        let resp = app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health_starts_unknown() {
        let rig = rig(&["1001"]);
        let (status, body) = call(router(rig.state.clone()), "GET", "/api/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["health"]["status"], "UNKNOWN");
        assert_eq!(body["phase"], "IDLE");
    }

    #[tokio::test]
    async fn test_force_cycle_then_read_accounts() {
        let rig = rig(&["1001", "1002"]);
        let app = router(rig.state.clone());

        let (status, body) = call(app.clone(), "POST", "/api/ops/cycle", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cycle"]["succeeded"], 2);
        assert_eq!(body["health"]["status"], "HEALTHY");

        let (_, body) = call(app.clone(), "GET", "/api/accounts", None).await;
        assert_eq!(body["count"], 2);

        let (status, body) = call(app.clone(), "GET", "/api/accounts/1001", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["account"]["accountNumber"], "1001");
        assert_eq!(body["account"]["freshness"], "fresh");

        let (_, body) = call(app.clone(), "GET", "/api/accounts/1001/deals", None).await;
        assert_eq!(body["count"], 3);

        let (status, _) = call(app.clone(), "GET", "/api/accounts/9999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call(app.clone(), "GET", "/api/cycles/last", None).await;
        assert_eq!(body["cycle"]["attempted"], 2);

        let (_, body) = call(app, "GET", "/api/alerts", None).await;
        assert_eq!(body["alerts"][0]["type"], "recovered");
    }

    #[tokio::test]
    async fn test_no_cycle_yet_is_not_found() {
        let rig = rig(&[]);
        let (status, body) = call(router(rig.state.clone()), "GET", "/api/cycles/last", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_force_cycle_conflicts_with_running_cycle() {
        let rig = rig(&["1001"]);
        rig.terminal.script("1001", MockBehavior::HangOnFetch);
        let app = router(rig.state.clone());

        let running = tokio::spawn(call(app.clone(), "POST", "/api/ops/cycle", None));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (status, _) = call(app, "POST", "/api/ops/cycle", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(running.await.unwrap().0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_key_required_except_health() {
        let rig = rig_with(&["1001"], |c| c.api_key = Some("s3cret".into()));
        let app = router(rig.state.clone());

        let (status, _) = call(app.clone(), "GET", "/api/cycles", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(app.clone(), "GET", "/api/cycles", Some("s3cret")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reset_and_remediation_status() {
        let rig = rig(&["1001"]);
        let app = router(rig.state.clone());

        let (status, body) = call(app.clone(), "POST", "/api/ops/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["health"]["consecutiveFailedCycles"], 0);

        let (_, body) = call(app, "GET", "/api/remediation", None).await;
        assert_eq!(body["remediation"]["exhausted"], false);
        assert_eq!(body["remediation"]["instanceId"], "test-instance");
    }

    #[tokio::test]
    async fn test_store_outage_is_service_unavailable() {
        let rig = rig(&["1001"]);
        rig.store.set_available(false);
        let (status, _) = call(router(rig.state.clone()), "GET", "/api/accounts", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}

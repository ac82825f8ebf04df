//! # routes::ops
//!
//! Operator surface — health, cycle history และปุ่มฉุกเฉิน
//!
//! | Method | Path                | Description                              |
//! |--------|---------------------|------------------------------------------|
//! | GET    | `/api/health`       | HealthState + orchestrator phase (no auth) |
//! | GET    | `/api/cycles/last`  | CycleResult ล่าสุด                         |
//! | GET    | `/api/cycles`       | CycleResult ย้อนหลัง (ใหม่สุดก่อน)          |
//! | POST   | `/api/ops/cycle`    | Force sync cycle ทันที (409 ถ้ากำลังรัน)    |
//! | POST   | `/api/ops/reset`    | Reset failure counters + remediation window |
//! | GET    | `/api/remediation`  | Attempt log + exhausted flag             |

use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;

use crate::error::AppError;
use crate::models::CycleResult;
use crate::state::SharedState;

/// GET /api/health
pub async fn get_health(State(state): State<SharedState>) -> impl IntoResponse {
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0);
    Json(json!({
        "ok":         true,
        "health":     state.health_state(),
        "phase":      state.orchestrator.phase(),
        "uptimeSecs": uptime,
    }))
}

/// GET /api/cycles/last
pub async fn get_last_cycle(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    let cycle = state
        .last_cycle_result()
        .ok_or_else(|| AppError::NotFound("no sync cycle has completed yet".into()))?;
    Ok(Json(json!({ "ok": true, "cycle": &*cycle })))
}

/// GET /api/cycles
pub async fn list_cycles(State(state): State<SharedState>) -> impl IntoResponse {
    let recent = state.orchestrator.history().recent();
    let cycles: Vec<&CycleResult> = recent.iter().rev().map(|c| &**c).collect();
    Json(json!({
        "ok":     true,
        "count":  cycles.len(),
        "cycles": cycles,
    }))
}

/// POST /api/ops/cycle — รอจน cycle จบแล้วตอบผล
pub async fn force_cycle(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    let cycle = state.force_cycle_now().await?;
    Ok(Json(json!({
        "ok":     true,
        "cycle":  &*cycle,
        "health": state.health_state(),
    })))
}

/// POST /api/ops/reset
pub async fn reset_counters(State(state): State<SharedState>) -> impl IntoResponse {
    state.reset_failure_counters().await;
    Json(json!({
        "ok":      true,
        "message": "Failure counters and remediation window reset",
        "health":  state.health_state(),
    }))
}

/// GET /api/remediation
pub async fn get_remediation(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "ok":          true,
        "remediation": state.remediation.status_at(Utc::now()),
    }))
}

//! # routes::accounts
//!
//! Read boundary สำหรับ downstream consumer (dashboard / report) — ทุก
//! snapshot แนบ `ageSecs` + `freshness` ให้ consumer ตัดสินเองว่าจะเชื่อแค่ไหน

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;

use crate::error::AppError;
use crate::state::SharedState;
use crate::store::SnapshotView;

/// GET /api/accounts
pub async fn list_accounts(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let threshold = state.config.health.freshness_threshold;
    let accounts: Vec<SnapshotView> = state
        .store
        .snapshots()
        .await?
        .into_iter()
        .map(|s| SnapshotView::new(s, now, threshold))
        .collect();

    Ok(Json(json!({
        "ok":       true,
        "count":    accounts.len(),
        "accounts": accounts,
    })))
}

/// GET /api/accounts/:number
pub async fn get_account(
    State(state): State<SharedState>,
    Path(number): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = state
        .store
        .snapshot(&number)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("account {number} has never been synced")))?;

    let view = SnapshotView::new(snapshot, Utc::now(), state.config.health.freshness_threshold);
    Ok(Json(json!({ "ok": true, "account": view })))
}

/// GET /api/accounts/:number/deals
pub async fn get_account_deals(
    State(state): State<SharedState>,
    Path(number): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let deals = state.store.deals(&number).await?;
    if deals.is_empty() && state.store.snapshot(&number).await?.is_none() {
        return Err(AppError::NotFound(format!("account {number} has never been synced")));
    }

    Ok(Json(json!({
        "ok":      true,
        "account": number,
        "count":   deals.len(),
        "deals":   deals,
    })))
}

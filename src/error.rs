//! # error
//!
//! Error taxonomy ของ pipeline แบ่งเป็น 2 ชั้น:
//!
//! * [`SyncError`] — error ระดับบัญชี / collaborator ที่เกิดระหว่าง sync cycle.
//!   ไม่เคยหลุดออกไปข้างนอก — ถูกรวมเป็น `CycleResult.per_account_errors`
//!   และ log พร้อม account / phase context
//! * [`AppError`] — error ของ HTTP surface; Axum `IntoResponse` แปลงเป็น
//!   JSON body ให้ operator tooling อ่านได้เสมอ

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

// ─── SyncError ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Account record ไม่ครบ — ข้ามบัญชีนี้ ไม่ fatal
    #[error("Config error: {0}")]
    Config(String),

    /// Credential ผิด หรือ server ไม่ตรง
    #[error("Auth error: {0}")]
    Auth(String),

    /// Terminal ไม่ตอบภายในเวลาที่กำหนด
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Terminal ตอบกลับมาแต่ parse ไม่ได้ / ไม่ตรง contract
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Persistence backend ใช้งานไม่ได้
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Remote remediation execute ไม่สำเร็จ
    #[error("Remediation error: {0}")]
    Remediation(String),

    /// Shutdown ระหว่างทำงาน
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

/// Serialisable discriminant of [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Auth,
    Timeout,
    Protocol,
    Persistence,
    Remediation,
    Cancelled,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Config(_)      => ErrorKind::Config,
            SyncError::Auth(_)        => ErrorKind::Auth,
            SyncError::Timeout(_)     => ErrorKind::Timeout,
            SyncError::Protocol(_)    => ErrorKind::Protocol,
            SyncError::Persistence(_) => ErrorKind::Persistence,
            SyncError::Remediation(_) => ErrorKind::Remediation,
            SyncError::Cancelled(_)   => ErrorKind::Cancelled,
        }
    }
}

impl ErrorKind {
    /// Auth / Config เป็นปัญหาของบัญชีเดียว ไม่ใช่สุขภาพของ pipeline
    pub fn counts_toward_degradation(self) -> bool {
        !matches!(self, ErrorKind::Auth | ErrorKind::Config)
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

// ─── AppError ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// เช่น force cycle ตอนที่มี cycle กำลังรันอยู่
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Catch-all for unexpected failures.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg)   => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg)   => (StatusCode::CONFLICT, msg.clone()),
            AppError::Store(err)      => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            AppError::Internal(err)   => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {err}"),
            ),
        };

        let body = Json(json!({
            "ok":    false,
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degradation_classification() {
        assert!(!SyncError::Auth("bad password".into()).kind().counts_toward_degradation());
        assert!(!SyncError::Config("no server".into()).kind().counts_toward_degradation());
        assert!(SyncError::Timeout("login".into()).kind().counts_toward_degradation());
        assert!(SyncError::Protocol("bad json".into()).kind().counts_toward_degradation());
        assert!(SyncError::Persistence("down".into()).kind().counts_toward_degradation());
    }

    #[test]
    fn test_store_error_maps_to_persistence() {
        let err: SyncError = StoreError::Unavailable("connection refused".into()).into();
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }

    #[test]
    fn test_conflict_status_code() {
        let resp = AppError::Conflict("cycle running".into()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}

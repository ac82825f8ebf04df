//! # models::cycle
//!
//! [`CycleResult`] — ผลลัพธ์ของ sync cycle 1 รอบ. สร้างครั้งเดียวตอนจบ cycle
//! แล้วไม่มีใครแก้อีก (immutable) — Health Monitor อ่านผ่าน `Arc`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, SyncError};

// ─── Phase ────────────────────────────────────────────────────────────────────

/// ขั้นตอนของการ sync บัญชีเดียว — แนบไปกับทุก error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Config,
    Login,
    FetchAccount,
    FetchDeals,
    Persist,
    Logout,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncPhase::Config       => "config",
            SyncPhase::Login        => "login",
            SyncPhase::FetchAccount => "fetch_account",
            SyncPhase::FetchDeals   => "fetch_deals",
            SyncPhase::Persist      => "persist",
            SyncPhase::Logout       => "logout",
        };
        f.write_str(s)
    }
}

// ─── AccountError ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountError {
    pub account_number: String,
    pub phase:          SyncPhase,
    pub kind:           ErrorKind,
    pub message:        String,
}

impl AccountError {
    pub fn new(account_number: &str, phase: SyncPhase, err: &SyncError) -> Self {
        Self {
            account_number: account_number.to_string(),
            phase,
            kind:           err.kind(),
            message:        err.to_string(),
        }
    }
}

// ─── CycleResult ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    Completed,
    /// Cycle deadline หรือ shutdown ตัดจบก่อนครบทุกบัญชี
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleResult {
    pub cycle_id:           Uuid,
    pub started_at:         DateTime<Utc>,
    pub ended_at:           DateTime<Utc>,
    pub status:             CycleStatus,
    pub attempted:          u32,
    pub succeeded:          u32,
    pub failed:             u32,
    pub used_fallback:      bool,
    /// Account numbers ที่ถูก attempt ใน cycle นี้
    pub accounts:           Vec<String>,
    pub per_account_errors: Vec<AccountError>,
}

/// How the Health Monitor reads a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleVerdict {
    /// ไม่มีบัญชีให้ sync — ไม่นับ
    Empty,
    /// สำเร็จอย่างน้อย 1 บัญชี และไม่มี failure ที่ทำให้ degrade
    ///
    /// Auth/Config failure ของบางบัญชีไม่ทำให้หลุดจาก Clean (credential ผิด
    /// เป็นปัญหาของบัญชี ไม่ใช่ของ pipeline) แต่ยังนับใน `failed`
    Clean,
    /// สำเร็จบางส่วน มี failure ที่ทำให้ degrade
    Partial,
    /// `failed == attempted`
    TotalFailure,
}

impl CycleResult {
    pub fn verdict(&self) -> CycleVerdict {
        if self.attempted == 0 {
            return CycleVerdict::Empty;
        }
        if self.failed >= self.attempted {
            return CycleVerdict::TotalFailure;
        }
        let degrading = self
            .per_account_errors
            .iter()
            .any(|e| e.kind.counts_toward_degradation());

        if degrading { CycleVerdict::Partial } else { CycleVerdict::Clean }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(attempted: u32, failed: u32, kinds: &[ErrorKind]) -> CycleResult {
        let now = Utc::now();
        CycleResult {
            cycle_id:      Uuid::new_v4(),
            started_at:    now,
            ended_at:      now,
            status:        CycleStatus::Completed,
            attempted,
            succeeded:     attempted - failed,
            failed,
            used_fallback: false,
            accounts:      vec![],
            per_account_errors: kinds
                .iter()
                .map(|&kind| AccountError {
                    account_number: "1".into(),
                    phase:          SyncPhase::Login,
                    kind,
                    message:        String::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_verdicts() {
        assert_eq!(cycle(0, 0, &[]).verdict(), CycleVerdict::Empty);
        assert_eq!(cycle(3, 0, &[]).verdict(), CycleVerdict::Clean);
        assert_eq!(cycle(7, 1, &[ErrorKind::Auth]).verdict(), CycleVerdict::Clean);
        assert_eq!(cycle(7, 1, &[ErrorKind::Timeout]).verdict(), CycleVerdict::Partial);
        assert_eq!(cycle(2, 2, &[ErrorKind::Auth, ErrorKind::Auth]).verdict(), CycleVerdict::TotalFailure);
    }
}

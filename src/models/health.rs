//! # models::health
//!
//! [`HealthState`] และ [`RemediationAttempt`] — state ที่ Health Monitor
//! และ Remediation Controller เป็นเจ้าของ (คนอื่นอ่านได้อย่างเดียว)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── HealthStatus ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Unknown  => "UNKNOWN",
            HealthStatus::Healthy  => "HEALTHY",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

// ─── HealthState ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HealthState {
    pub status:                     HealthStatus,
    pub consecutive_failed_cycles:  u32,
    pub consecutive_healthy_cycles: u32,
    pub last_success_at:            Option<DateTime<Utc>>,
    pub last_transition_at:         Option<DateTime<Utc>>,
}

// ─── RemediationAttempt ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    /// กำลังทำ หรือ remote ไม่ตอบภายใน timeout (ไม่รู้ผล)
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationAttempt {
    pub triggered_at:             DateTime<Utc>,
    pub cooldown_until:           DateTime<Utc>,
    pub outcome:                  AttemptOutcome,
    /// 1-based ลำดับของ attempt ภายใน rolling window
    pub attempt_index_in_window:  u32,
}

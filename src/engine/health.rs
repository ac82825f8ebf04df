//! # engine::health
//!
//! **Health Monitor** — อ่าน CycleResult + freshness ของ snapshot แล้วเดิน
//! state machine ของ pipeline
//!
//! ```text
//!            clean                 partial / total-fail / stale
//!  UNKNOWN ─────────▶ HEALTHY ◀──────────────────────────────────┐
//!     │                  │  ▲                                     │
//!     │ partial/fail     │  │ M clean cycles                      │
//!     └────────────▶ DEGRADED ──── N total-fail cycles ───▶ CRITICAL
//!                        ▲                                     │
//!                        └─ (Critical ก็กลับ Healthy ได้ด้วย M clean cycles)
//! ```
//!
//! * ทุก cycle ถูกนับ **ครั้งเดียว** (ติดตามด้วย sequence ของ [`CycleHistory`])
//! * Cycle ที่ไม่มีบัญชี (attempted = 0) ไม่นับ
//! * Auth / Config failure ไม่ทำให้ degrade (ดู [`ErrorKind::counts_toward_degradation`])
//! * เข้า Critical หรือ total-failure ซ้ำขณะ Critical → เรียก Remediation Controller
//!
//! [`ErrorKind::counts_toward_degradation`]: crate::error::ErrorKind::counts_toward_degradation

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::orchestrator::CycleHistory;
use super::remediation::{RemediationController, TriggerOutcome};
use crate::config::HealthConfig;
use crate::events::{AlertBus, AlertEvent, AlertKind};
use crate::models::{CycleResult, CycleVerdict, Freshness, HealthState, HealthStatus};
use crate::store::Store;

// ─── Transition ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from:     HealthStatus,
    pub to:       HealthStatus,
    pub at:       DateTime<Utc>,
    pub reason:   String,
    pub cycle_id: Option<Uuid>,
}

impl Transition {
    fn to_alert(&self, state: &HealthState) -> Option<AlertEvent> {
        let kind = match self.to {
            HealthStatus::Degraded => AlertKind::Degraded,
            HealthStatus::Critical => AlertKind::Critical,
            HealthStatus::Healthy  => AlertKind::Recovered,
            HealthStatus::Unknown  => return None,
        };
        Some(AlertEvent::new(
            kind,
            json!({
                "from":                     self.from,
                "to":                       self.to,
                "reason":                   self.reason,
                "at":                       self.at,
                "cycleId":                  self.cycle_id,
                "consecutiveFailedCycles":  state.consecutive_failed_cycles,
                "consecutiveHealthyCycles": state.consecutive_healthy_cycles,
                "lastSuccessAt":            state.last_success_at,
            }),
        ))
    }
}

// ─── State machine (pure) ─────────────────────────────────────────────────────

fn transition(state: &mut HealthState, to: HealthStatus, at: DateTime<Utc>, reason: String, cycle_id: Option<Uuid>) -> Transition {
    let from = state.status;
    state.status = to;
    state.last_transition_at = Some(at);
    Transition { from, to, at, reason, cycle_id }
}

/// นับ cycle 1 รอบเข้า state. `stale` = มีบัญชีที่ snapshot เก่าเกิน threshold
fn apply_cycle(
    state:  &mut HealthState,
    cycle:  &CycleResult,
    stale:  bool,
    config: &HealthConfig,
    now:    DateTime<Utc>,
) -> Option<Transition> {
    let verdict = cycle.verdict();
    match verdict {
        CycleVerdict::Empty => return None,
        CycleVerdict::TotalFailure => {
            state.consecutive_failed_cycles += 1;
            state.consecutive_healthy_cycles = 0;
        }
        CycleVerdict::Partial => {
            state.consecutive_failed_cycles = 0;
            state.consecutive_healthy_cycles = 0;
        }
        CycleVerdict::Clean => {
            state.consecutive_failed_cycles = 0;
            state.consecutive_healthy_cycles += 1;
        }
    }
    if cycle.succeeded > 0 {
        state.last_success_at = Some(cycle.ended_at);
    }

    let failed  = state.consecutive_failed_cycles;
    let healthy = state.consecutive_healthy_cycles;
    let (to, reason) = match (state.status, verdict) {
        (status, CycleVerdict::TotalFailure) if status != HealthStatus::Critical && failed >= config.critical_after => {
            (HealthStatus::Critical, format!("{failed} consecutive cycles failed every account"))
        }
        (HealthStatus::Unknown | HealthStatus::Healthy, CycleVerdict::TotalFailure) => {
            (HealthStatus::Degraded, format!("all {} accounts failed", cycle.attempted))
        }
        (HealthStatus::Unknown | HealthStatus::Healthy, CycleVerdict::Partial) => {
            (HealthStatus::Degraded, format!("{} of {} accounts failed", cycle.failed, cycle.attempted))
        }
        (HealthStatus::Unknown, CycleVerdict::Clean) if !stale => {
            (HealthStatus::Healthy, "first clean cycle".to_string())
        }
        (HealthStatus::Degraded | HealthStatus::Critical, CycleVerdict::Clean) if healthy >= config.recover_after && !stale => {
            (HealthStatus::Healthy, format!("{healthy} consecutive clean cycles"))
        }
        _ => return None,
    };

    Some(transition(state, to, now, reason, Some(cycle.cycle_id)))
}

fn apply_staleness(state: &mut HealthState, stale: &[String], now: DateTime<Utc>) -> Option<Transition> {
    if stale.is_empty() || !matches!(state.status, HealthStatus::Unknown | HealthStatus::Healthy) {
        return None;
    }
    state.consecutive_healthy_cycles = 0;
    let reason = format!("stale snapshots: {}", stale.join(", "));
    Some(transition(state, HealthStatus::Degraded, now, reason, None))
}

// ─── Monitor ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MonitorInner {
    state:     HealthState,
    /// Sequence ของ cycle ล่าสุดที่นับไปแล้ว
    last_seen: u64,
}

pub struct HealthMonitor {
    config:      HealthConfig,
    history:     Arc<CycleHistory>,
    store:       Arc<dyn Store>,
    alerts:      AlertBus,
    remediation: Arc<RemediationController>,
    inner:       Mutex<MonitorInner>,
    published:   ArcSwap<HealthState>,
}

impl HealthMonitor {
    pub fn new(
        config:      HealthConfig,
        history:     Arc<CycleHistory>,
        store:       Arc<dyn Store>,
        alerts:      AlertBus,
        remediation: Arc<RemediationController>,
    ) -> Self {
        Self {
            config,
            history,
            store,
            alerts,
            remediation,
            inner: Mutex::new(MonitorInner::default()),
            published: ArcSwap::from_pointee(HealthState::default()),
        }
    }

    /// Lock-free read สำหรับ operator / API
    pub fn state(&self) -> HealthState {
        self.published.load().as_ref().clone()
    }

    pub async fn evaluate_now(&self) -> Vec<Transition> {
        self.evaluate_at(Utc::now()).await
    }

    pub async fn evaluate_at(&self, now: DateTime<Utc>) -> Vec<Transition> {
        let stale = self.stale_accounts(now).await;

        let mut inner = self.inner.lock().await;
        let mut transitions = Vec::new();
        let mut remediate = false;

        for (seq, cycle) in self.history.since(inner.last_seen) {
            inner.last_seen = seq;
            let sustained_failure =
                inner.state.status == HealthStatus::Critical && cycle.verdict() == CycleVerdict::TotalFailure;

            match apply_cycle(&mut inner.state, &cycle, !stale.is_empty(), &self.config, now) {
                Some(t) => {
                    remediate |= t.to == HealthStatus::Critical;
                    transitions.push(t);
                }
                None => remediate |= sustained_failure,
            }
            debug!(cycle_id = %cycle.cycle_id, verdict = ?cycle.verdict(), status = %inner.state.status, "Cycle evaluated");
        }

        if let Some(t) = apply_staleness(&mut inner.state, &stale, now) {
            transitions.push(t);
        }

        let snapshot = inner.state.clone();
        self.published.store(Arc::new(snapshot.clone()));
        drop(inner);

        for t in &transitions {
            info!(from = %t.from, to = %t.to, reason = %t.reason, "🩺 Health transition");
            if t.to == HealthStatus::Healthy {
                self.remediation.on_recovered();
            }
            if let Some(alert) = t.to_alert(&snapshot) {
                self.alerts.emit(alert).await;
            }
        }

        if remediate {
            match self.remediation.trigger_at(now).await {
                TriggerOutcome::Invoked { attempt, outcome } => {
                    debug!(attempt, ?outcome, "Remediation attempt finished")
                }
                TriggerOutcome::Suppressed(reason) => debug!(?reason, "Remediation gated"),
                TriggerOutcome::Exhausted => {}
            }
        }
        transitions
    }

    /// Operator reset: counter เป็น 0 แต่ status คงเดิม
    pub async fn reset_counters(&self) {
        let mut inner = self.inner.lock().await;
        inner.state.consecutive_failed_cycles = 0;
        inner.state.consecutive_healthy_cycles = 0;
        self.published.store(Arc::new(inner.state.clone()));
        info!(status = %inner.state.status, "🔄 Health counters reset by operator");
    }

    /// บัญชีใน cycle ล่าสุดที่ snapshot เก่าเกิน threshold. บัญชีที่ยังไม่เคย
    /// sync ไม่นับ
    async fn stale_accounts(&self, now: DateTime<Utc>) -> Vec<String> {
        let Some(latest) = self.history.latest() else {
            return Vec::new();
        };

        let mut stale = Vec::new();
        for account in &latest.accounts {
            match self.store.freshness_of(account, now).await {
                Ok(Some(age)) if Freshness::classify(age, self.config.freshness_threshold) == Freshness::Stale => {
                    stale.push(account.clone());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Freshness check skipped — store unavailable");
                    return Vec::new();
                }
            }
        }
        stale
    }
}

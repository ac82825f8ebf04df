//! # engine::remediation
//!
//! **Remediation Controller** — สั่ง restore pipeline instance จากภายนอก
//! เมื่อ Health Monitor เข้า Critical
//!
//! ## Guard (ตรวจตามลำดับ)
//! 1. มี remediation กำลังรันอยู่ → suppressed (`in_flight`)
//! 2. Latch `exhausted` ค้างอยู่ → suppressed (`exhausted`) — รอคน reset
//! 3. ครบ K ครั้งใน rolling window → emit `remediation_exhausted` + latch
//! 4. ยังอยู่ใน cooldown ของครั้งก่อน → suppressed (`cooldown`)
//! 5. ผ่านหมด → บันทึก attempt (PENDING) แล้วเรียก action
//!
//! Attempt ที่ remote ไม่ตอบภายใน timeout ยังค้างเป็น PENDING และถูก
//! resolve เป็น SUCCEEDED เมื่อ health กลับมา Healthy

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::{RemediationConfig, RemediationMode};
use crate::error::SyncError;
use crate::events::{AlertBus, AlertEvent, AlertKind};
use crate::models::{AttemptOutcome, RemediationAttempt};

/// Attempt log เก็บย้อนหลังได้สูงสุดเท่านี้
const MAX_LOGGED_ATTEMPTS: usize = 100;

// ─── Actions ──────────────────────────────────────────────────────────────────

#[async_trait]
pub trait RemediationAction: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// `Err(SyncError::Timeout)` = ไม่รู้ผล, error อื่น = ล้มเหลว
    async fn restore(&self, instance_id: &str, timeout: Duration) -> Result<(), SyncError>;
}

/// POST `{instanceId, action}` ไปยัง orchestration endpoint
pub struct HttpRemediation {
    client: reqwest::Client,
    url:    String,
}

impl HttpRemediation {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl RemediationAction for HttpRemediation {
    fn name(&self) -> &'static str { "http" }

    async fn restore(&self, instance_id: &str, timeout: Duration) -> Result<(), SyncError> {
        let resp = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .json(&json!({ "instanceId": instance_id, "action": "restart" }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::Timeout(format!("remediation endpoint: {e}"))
                } else {
                    SyncError::Remediation(format!("remediation endpoint: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Remediation(format!("HTTP {status}: {}", body.trim())));
        }
        Ok(())
    }
}

/// รัน command ภายนอก (เช่น `systemctl restart …`) — instance id ส่งผ่าน env
pub struct CommandRemediation {
    program: String,
    args:    Vec<String>,
}

impl CommandRemediation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

#[async_trait]
impl RemediationAction for CommandRemediation {
    fn name(&self) -> &'static str { "command" }

    async fn restore(&self, instance_id: &str, timeout: Duration) -> Result<(), SyncError> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .env("PIPELINE_INSTANCE_ID", instance_id)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| SyncError::Timeout(format!("'{}' still running after {timeout:?}", self.program)))?
            .map_err(|e| SyncError::Remediation(format!("spawn '{}': {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::Remediation(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockRestore {
    #[default]
    Succeed,
    Fail,
    Hang,
}

/// Dev / test — นับจำนวนครั้งที่ถูกเรียก
#[derive(Default)]
pub struct MockRemediation {
    behavior:    RwLock<MockRestore>,
    invocations: AtomicU32,
}

impl MockRemediation {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn set_behavior(&self, behavior: MockRestore) {
        if let Ok(mut guard) = self.behavior.write() {
            *guard = behavior;
        }
    }

    #[cfg(test)]
    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemediationAction for MockRemediation {
    fn name(&self) -> &'static str { "mock" }

    async fn restore(&self, instance_id: &str, _timeout: Duration) -> Result<(), SyncError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        info!(instance = %instance_id, "🎭 [MOCK] remediation restore requested");

        let behavior = self.behavior.read().map(|b| *b).unwrap_or_default();
        match behavior {
            MockRestore::Succeed => Ok(()),
            MockRestore::Fail => Err(SyncError::Remediation("mock restore rejected".into())),
            MockRestore::Hang => std::future::pending().await,
        }
    }
}

pub fn action_from_config(config: &RemediationConfig, http: reqwest::Client) -> Arc<dyn RemediationAction> {
    match &config.mode {
        RemediationMode::Mock => Arc::new(MockRemediation::new()),
        RemediationMode::Http { url } => Arc::new(HttpRemediation::new(http, url.clone())),
        RemediationMode::Command { program, args } => {
            Arc::new(CommandRemediation::new(program.clone(), args.clone()))
        }
    }
}

// ─── Controller ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SuppressReason {
    Cooldown { until: DateTime<Utc> },
    InFlight,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Invoked { attempt: u32, outcome: AttemptOutcome },
    Suppressed(SuppressReason),
    /// ครบ cap — ครั้งนี้เป็นครั้งที่ latch
    Exhausted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationStatus {
    pub instance_id:        String,
    pub action:             &'static str,
    pub exhausted:          bool,
    pub in_flight:          bool,
    pub attempts_in_window: u32,
    pub max_attempts:       u32,
    pub cooldown_until:     Option<DateTime<Utc>>,
    pub attempts:           Vec<RemediationAttempt>,
}

#[derive(Default)]
struct Ledger {
    attempts:  Vec<RemediationAttempt>,
    exhausted: bool,
    /// attempt ก่อนเวลานี้ไม่นับ cap / cooldown (operator reset)
    reset_at:  Option<DateTime<Utc>>,
}

impl Ledger {
    fn counted<'a>(&'a self, now: DateTime<Utc>, window: Duration) -> impl Iterator<Item = &'a RemediationAttempt> {
        let window_start = now - chrono::Duration::from_std(window).unwrap_or_default();
        let reset_at = self.reset_at;
        self.attempts
            .iter()
            .filter(move |a| a.triggered_at > window_start)
            .filter(move |a| reset_at.map_or(true, |r| a.triggered_at >= r))
    }

    fn cooldown_until(&self, now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
        self.counted(now, window).map(|a| a.cooldown_until).max()
    }
}

enum Decision {
    Run(RemediationAttempt),
    Suppress(SuppressReason),
    Exhaust(u32),
}

pub struct RemediationController {
    config:    RemediationConfig,
    action:    Arc<dyn RemediationAction>,
    alerts:    AlertBus,
    ledger:    Mutex<Ledger>,
    in_flight: tokio::sync::Mutex<()>,
}

impl RemediationController {
    pub fn new(config: RemediationConfig, action: Arc<dyn RemediationAction>, alerts: AlertBus) -> Self {
        Self {
            config,
            action,
            alerts,
            ledger: Mutex::new(Ledger::default()),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    /// Health เข้า (หรือยังค้างอยู่ใน) Critical
    pub async fn trigger_at(&self, now: DateTime<Utc>) -> TriggerOutcome {
        let Ok(_running) = self.in_flight.try_lock() else {
            return self.suppress(SuppressReason::InFlight).await;
        };

        let decision = match self.ledger.lock() {
            Ok(mut ledger) => self.decide(&mut ledger, now),
            Err(_) => {
                error!("Remediation ledger lock poisoned");
                return TriggerOutcome::Suppressed(SuppressReason::InFlight);
            }
        };

        let attempt = match decision {
            Decision::Run(attempt) => attempt,
            Decision::Suppress(reason) => return self.suppress(reason).await,
            Decision::Exhaust(in_window) => {
                error!(instance = %self.config.instance_id, attempts = in_window, "🛑 Remediation attempts exhausted — manual intervention required");
                self.alerts
                    .emit(AlertEvent::new(
                        AlertKind::RemediationExhausted,
                        json!({
                            "instanceId":       self.config.instance_id,
                            "attemptsInWindow": in_window,
                            "maxAttempts":      self.config.max_attempts,
                            "windowSecs":       self.config.window.as_secs(),
                        }),
                    ))
                    .await;
                return TriggerOutcome::Exhausted;
            }
        };

        let index = attempt.attempt_index_in_window;
        warn!(instance = %self.config.instance_id, action = self.action.name(), attempt = index, "🔧 Triggering remediation");
        self.alerts
            .emit(AlertEvent::new(
                AlertKind::RemediationTriggered,
                json!({
                    "instanceId":    self.config.instance_id,
                    "action":        self.action.name(),
                    "attempt":       index,
                    "cooldownUntil": attempt.cooldown_until,
                }),
            ))
            .await;

        let result = tokio::time::timeout(
            self.config.timeout,
            self.action.restore(&self.config.instance_id, self.config.timeout),
        )
        .await;

        let outcome = match result {
            Ok(Ok(())) => {
                info!(instance = %self.config.instance_id, attempt = index, "✅ Remediation accepted");
                AttemptOutcome::Succeeded
            }
            Ok(Err(SyncError::Timeout(msg))) => {
                warn!(instance = %self.config.instance_id, attempt = index, error = %msg, "Remediation outcome unknown");
                AttemptOutcome::Pending
            }
            Err(_) => {
                warn!(instance = %self.config.instance_id, attempt = index, timeout = ?self.config.timeout, "Remediation outcome unknown — no answer within timeout");
                AttemptOutcome::Pending
            }
            Ok(Err(e)) => {
                error!(instance = %self.config.instance_id, attempt = index, error = %e, "❌ Remediation failed");
                AttemptOutcome::Failed
            }
        };

        if let Ok(mut ledger) = self.ledger.lock() {
            if let Some(entry) = ledger.attempts.iter_mut().rev().find(|a| a.triggered_at == attempt.triggered_at) {
                entry.outcome = outcome;
            }
        }

        TriggerOutcome::Invoked { attempt: index, outcome }
    }

    fn decide(&self, ledger: &mut Ledger, now: DateTime<Utc>) -> Decision {
        if ledger.exhausted {
            return Decision::Suppress(SuppressReason::Exhausted);
        }

        let in_window = ledger.counted(now, self.config.window).count() as u32;
        if in_window >= self.config.max_attempts {
            ledger.exhausted = true;
            return Decision::Exhaust(in_window);
        }

        if let Some(until) = ledger.cooldown_until(now, self.config.window) {
            if until > now {
                return Decision::Suppress(SuppressReason::Cooldown { until });
            }
        }

        let attempt = RemediationAttempt {
            triggered_at:            now,
            cooldown_until:          now + chrono::Duration::from_std(self.config.cooldown).unwrap_or_default(),
            outcome:                 AttemptOutcome::Pending,
            attempt_index_in_window: in_window + 1,
        };
        ledger.attempts.push(attempt.clone());
        if ledger.attempts.len() > MAX_LOGGED_ATTEMPTS {
            let excess = ledger.attempts.len() - MAX_LOGGED_ATTEMPTS;
            ledger.attempts.drain(..excess);
        }
        Decision::Run(attempt)
    }

    async fn suppress(&self, reason: SuppressReason) -> TriggerOutcome {
        info!(instance = %self.config.instance_id, ?reason, "Remediation suppressed");

        let mut details = serde_json::to_value(reason).unwrap_or_else(|_| json!({}));
        if let Some(map) = details.as_object_mut() {
            map.insert("instanceId".into(), json!(self.config.instance_id));
        }
        self.alerts
            .emit(AlertEvent::new(AlertKind::RemediationSuppressed, details))
            .await;
        TriggerOutcome::Suppressed(reason)
    }

    /// Health กลับมา Healthy — attempt ที่ยังไม่รู้ผลถือว่าสำเร็จ
    pub fn on_recovered(&self) {
        if let Ok(mut ledger) = self.ledger.lock() {
            for attempt in ledger.attempts.iter_mut().filter(|a| a.outcome == AttemptOutcome::Pending) {
                attempt.outcome = AttemptOutcome::Succeeded;
            }
        }
    }

    /// Operator reset: ปลด latch + เริ่มนับ cap / cooldown ใหม่ (log ยังอยู่)
    pub fn reset_at(&self, now: DateTime<Utc>) {
        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.exhausted = false;
            ledger.reset_at = Some(now);
        }
        info!(instance = %self.config.instance_id, "🔄 Remediation window reset by operator");
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> RemediationStatus {
        let in_flight = self.in_flight.try_lock().is_err();
        let (exhausted, attempts_in_window, cooldown_until, attempts) = match self.ledger.lock() {
            Ok(ledger) => (
                ledger.exhausted,
                ledger.counted(now, self.config.window).count() as u32,
                ledger.cooldown_until(now, self.config.window).filter(|u| *u > now),
                ledger.attempts.clone(),
            ),
            Err(_) => (false, 0, None, Vec::new()),
        };

        RemediationStatus {
            instance_id: self.config.instance_id.clone(),
            action: self.action.name(),
            exhausted,
            in_flight,
            attempts_in_window,
            max_attempts: self.config.max_attempts,
            cooldown_until,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::events::RecentAlerts;

    fn controller(tweak: impl FnOnce(&mut RemediationConfig)) -> (Arc<RemediationController>, Arc<MockRemediation>, Arc<RecentAlerts>) {
        let mut config = test_config().remediation;
        tweak(&mut config);
        let mock = Arc::new(MockRemediation::new());
        let recent = Arc::new(RecentAlerts::new(50));
        let bus = AlertBus::new(Duration::from_secs(1)).with_sink(recent.clone());
        (Arc::new(RemediationController::new(config, mock.clone(), bus)), mock, recent)
    }

    fn minutes(m: i64) -> chrono::Duration {
        chrono::Duration::minutes(m)
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_second_trigger() {
        let (ctl, mock, recent) = controller(|_| {});
        let t0 = Utc::now();

        let first = ctl.trigger_at(t0).await;
        let second = ctl.trigger_at(t0 + minutes(2)).await;

        assert_eq!(first, TriggerOutcome::Invoked { attempt: 1, outcome: AttemptOutcome::Succeeded });
        assert!(matches!(second, TriggerOutcome::Suppressed(SuppressReason::Cooldown { .. })));
        assert_eq!(mock.invocations(), 1);
        assert_eq!(recent.kinds(), vec![AlertKind::RemediationTriggered, AlertKind::RemediationSuppressed]);
    }

    #[tokio::test]
    async fn test_cap_exhausts_then_latches() {
        let (ctl, mock, recent) = controller(|_| {});
        let t0 = Utc::now();

        for i in 0..3 {
            assert!(matches!(ctl.trigger_at(t0 + minutes(6 * i)).await, TriggerOutcome::Invoked { .. }));
        }
        assert_eq!(ctl.trigger_at(t0 + minutes(18)).await, TriggerOutcome::Exhausted);
        assert_eq!(
            ctl.trigger_at(t0 + minutes(24)).await,
            TriggerOutcome::Suppressed(SuppressReason::Exhausted)
        );

        assert_eq!(mock.invocations(), 3);
        assert_eq!(
            recent.kinds().iter().filter(|k| **k == AlertKind::RemediationExhausted).count(),
            1
        );
        assert!(ctl.status_at(t0 + minutes(24)).exhausted);
    }

    #[tokio::test]
    async fn test_failed_attempt_still_counts() {
        let (ctl, mock, _) = controller(|c| c.max_attempts = 1);
        mock.set_behavior(MockRestore::Fail);
        let t0 = Utc::now();

        assert_eq!(
            ctl.trigger_at(t0).await,
            TriggerOutcome::Invoked { attempt: 1, outcome: AttemptOutcome::Failed }
        );
        assert_eq!(ctl.trigger_at(t0 + minutes(10)).await, TriggerOutcome::Exhausted);
        assert_eq!(ctl.status_at(t0).attempts[0].outcome, AttemptOutcome::Failed);
    }

    #[tokio::test]
    async fn test_window_rolls_off_old_attempts() {
        let (ctl, mock, _) = controller(|c| c.max_attempts = 2);
        let t0 = Utc::now();

        ctl.trigger_at(t0).await;
        ctl.trigger_at(t0 + minutes(10)).await;
        let late = ctl.trigger_at(t0 + minutes(61)).await;

        assert_eq!(late, TriggerOutcome::Invoked { attempt: 2, outcome: AttemptOutcome::Succeeded });
        assert_eq!(mock.invocations(), 3);
    }

    #[tokio::test]
    async fn test_timeout_leaves_pending_until_recovery() {
        let (ctl, mock, _) = controller(|c| c.timeout = Duration::from_millis(50));
        mock.set_behavior(MockRestore::Hang);
        let t0 = Utc::now();

        assert_eq!(
            ctl.trigger_at(t0).await,
            TriggerOutcome::Invoked { attempt: 1, outcome: AttemptOutcome::Pending }
        );
        ctl.on_recovered();
        assert_eq!(ctl.status_at(t0).attempts[0].outcome, AttemptOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_in_flight() {
        let (ctl, mock, _) = controller(|c| c.timeout = Duration::from_millis(300));
        mock.set_behavior(MockRestore::Hang);
        let t0 = Utc::now();

        let running = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.trigger_at(t0).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(ctl.status_at(t0).in_flight);
        assert_eq!(ctl.trigger_at(t0).await, TriggerOutcome::Suppressed(SuppressReason::InFlight));
        running.await.unwrap();
        assert_eq!(mock.invocations(), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_latch_and_window() {
        let (ctl, mock, _) = controller(|c| c.max_attempts = 1);
        let t0 = Utc::now();

        ctl.trigger_at(t0).await;
        assert_eq!(ctl.trigger_at(t0 + minutes(6)).await, TriggerOutcome::Exhausted);

        ctl.reset_at(t0 + minutes(7));
        assert!(matches!(ctl.trigger_at(t0 + minutes(8)).await, TriggerOutcome::Invoked { .. }));
        assert_eq!(mock.invocations(), 2);
        assert_eq!(ctl.status_at(t0 + minutes(8)).attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_command_action_exit_codes() {
        let timeout = Duration::from_secs(5);
        assert!(CommandRemediation::new("true", vec![]).restore("i-1", timeout).await.is_ok());

        let err = CommandRemediation::new("false", vec![]).restore("i-1", timeout).await.unwrap_err();
        assert!(matches!(err, SyncError::Remediation(_)));
    }

    #[tokio::test]
    async fn test_command_action_timeout_is_unknown() {
        let action = CommandRemediation::new("sleep", vec!["5".into()]);
        let err = action.restore("i-1", Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
    }
}

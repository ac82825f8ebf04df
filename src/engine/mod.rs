//! # engine
//!
//! Background loops ของ pipeline
//!
//! | Loop    | Interval               | งาน                                      |
//! |---------|------------------------|------------------------------------------|
//! | Sync    | `SYNC_INTERVAL_SECS`   | [`orchestrator::SyncOrchestrator`] 1 cycle |
//! | Health  | `HEALTH_INTERVAL_SECS` | [`health::HealthMonitor::evaluate_now`]  |
//!
//! ทั้งสอง loop หยุดเมื่อ shutdown token ถูก cancel

pub mod health;
pub mod orchestrator;
pub mod remediation;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::state::SharedState;

/// Sync Loop — tick ที่มาระหว่าง cycle ยังรันอยู่จะถูก orchestrator ข้าม
pub fn spawn_sync_loop(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.sync.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut current: Option<JoinHandle<()>> = None;

        info!(interval = ?state.config.sync.interval, "🔁 Sync loop started");
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let orchestrator = state.orchestrator.clone();
                    let cancel = state.shutdown.clone();
                    let handle = tokio::spawn(async move {
                        orchestrator.try_run_cycle(&cancel).await;
                    });
                    // เก็บไว้เฉพาะ cycle ที่ยังรันอยู่ — ตอน shutdown รอให้ logout ครบ
                    if current.as_ref().map_or(true, |h| h.is_finished()) {
                        current = Some(handle);
                    }
                }
            }
        }

        if let Some(handle) = current {
            let _ = handle.await;
        }
        info!("🛑 Sync loop stopped");
    })
}

/// Health Loop — อ่านผล cycle ล่าสุดเป็นอิสระจาก Sync Loop
pub fn spawn_health_loop(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.health.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval = ?state.config.health.interval, "🩺 Health loop started");
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    state.monitor.evaluate_now().await;
                }
            }
        }
        info!("🛑 Health loop stopped");
    })
}

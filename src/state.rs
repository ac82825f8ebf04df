//! # state
//!
//! **Shared application state** — ทุก component ของ pipeline ถูกประกอบที่นี่
//! ครั้งเดียวตอน startup แล้ว inject เข้า Axum handler และ background loops
//! ผ่าน `Arc<AppState>`
//!
//! ```text
//!  ConfigProvider ─┐
//!  AdapterRegistry ┼─▶ SyncOrchestrator ─▶ CycleHistory ─▶ HealthMonitor ─▶ RemediationController
//!  Store ──────────┘          │                                 │                    │
//!                             └──────── writes ─▶ Store ◀── freshness               │
//!                                                             AlertBus ◀────────────┘
//! ```
//!
//! Operator surface: [`AppState::force_cycle_now`], [`AppState::reset_failure_counters`],
//! [`AppState::health_state`], [`AppState::last_cycle_result`]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::accounts::{AccountSource, ConfigProvider, FileAccountSource};
use crate::config::PipelineConfig;
use crate::engine::health::HealthMonitor;
use crate::engine::orchestrator::{CycleHistory, SyncOrchestrator};
use crate::engine::remediation::{action_from_config, RemediationAction, RemediationController};
use crate::error::AppError;
use crate::events::{AlertBus, BroadcastSink, RecentAlerts, TracingSink, WebhookSink};
use crate::models::{CycleResult, HealthState};
use crate::store::{memory::MemoryStore, Store};
use crate::terminal::AdapterRegistry;

const ALERT_SINK_TIMEOUT: Duration = Duration::from_secs(5);
const RECENT_ALERTS: usize = 200;

// ─── AppState ─────────────────────────────────────────────────────────────────

pub struct AppState {
    pub config:        PipelineConfig,
    pub store:         Arc<dyn Store>,
    pub orchestrator:  Arc<SyncOrchestrator>,
    pub monitor:       Arc<HealthMonitor>,
    pub remediation:   Arc<RemediationController>,
    pub recent_alerts: Arc<RecentAlerts>,
    /// Pre-serialized alert JSON → WebSocket clients
    pub broadcast_tx:  broadcast::Sender<String>,
    /// Root token — cancel ตอน Ctrl-C
    pub shutdown:      CancellationToken,
    pub started_at:    DateTime<Utc>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// รัน cycle ทันที (นอกรอบ). มี cycle รันอยู่แล้ว → Conflict
    pub async fn force_cycle_now(&self) -> Result<Arc<CycleResult>, AppError> {
        info!("⚡ Operator forced a sync cycle");
        let result = self
            .orchestrator
            .try_run_cycle(&self.shutdown)
            .await
            .ok_or_else(|| AppError::Conflict("a sync cycle is already running".into()))?;

        self.monitor.evaluate_now().await;
        Ok(result)
    }

    /// Zero health counters + เปิด remediation window ใหม่ (ปลด exhausted latch)
    pub async fn reset_failure_counters(&self) {
        self.monitor.reset_counters().await;
        self.remediation.reset_at(Utc::now());
    }

    pub fn health_state(&self) -> HealthState {
        self.monitor.state()
    }

    pub fn last_cycle_result(&self) -> Option<Arc<CycleResult>> {
        self.orchestrator.history().latest()
    }
}

// ─── Wiring ───────────────────────────────────────────────────────────────────

/// Collaborators ที่สลับได้ (production vs test)
pub struct Components {
    pub store:              Arc<dyn Store>,
    pub account_source:     Option<Arc<dyn AccountSource>>,
    pub adapters:           AdapterRegistry,
    pub remediation_action: Arc<dyn RemediationAction>,
    pub http:               reqwest::Client,
}

pub fn assemble(config: PipelineConfig, components: Components) -> SharedState {
    let (broadcast_tx, _) = broadcast::channel::<String>(256);
    let recent_alerts = Arc::new(RecentAlerts::new(RECENT_ALERTS));

    let mut alerts = AlertBus::new(ALERT_SINK_TIMEOUT)
        .with_sink(Arc::new(TracingSink))
        .with_sink(recent_alerts.clone())
        .with_sink(Arc::new(BroadcastSink::new(broadcast_tx.clone())));
    if let Some(url) = &config.alert_webhook_url {
        alerts = alerts.with_sink(Arc::new(WebhookSink::new(components.http.clone(), url.clone())));
    }

    let provider = Arc::new(ConfigProvider::new(
        components.account_source,
        config.fallback_accounts.clone(),
    ));
    let history = Arc::new(CycleHistory::new(config.sync.history_len));

    let orchestrator = Arc::new(SyncOrchestrator::new(
        config.sync.clone(),
        provider,
        components.adapters,
        components.store.clone(),
        history.clone(),
    ));
    let remediation = Arc::new(RemediationController::new(
        config.remediation.clone(),
        components.remediation_action,
        alerts.clone(),
    ));
    let monitor = Arc::new(HealthMonitor::new(
        config.health.clone(),
        history,
        components.store.clone(),
        alerts,
        remediation.clone(),
    ));

    Arc::new(AppState {
        config,
        store: components.store,
        orchestrator,
        monitor,
        remediation,
        recent_alerts,
        broadcast_tx,
        shutdown: CancellationToken::new(),
        started_at: Utc::now(),
    })
}

/// Production wiring จาก config
pub async fn build_state(config: PipelineConfig) -> anyhow::Result<SharedState> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("termsync/", env!("CARGO_PKG_VERSION")))
        .build()?;

    #[cfg(feature = "postgres")]
    let pool = match &config.database_url {
        Some(url) => Some(crate::store::postgres::init_pool(url).await?),
        None => None,
    };
    if cfg!(not(feature = "postgres")) && config.database_url.is_some() {
        warn!("DATABASE_URL is set but termsync was built without the `postgres` feature — using in-memory store");
    }

    // ── Store ─────────────────────────────────────────────────────────────────
    #[cfg(feature = "postgres")]
    let store: Arc<dyn Store> = match &pool {
        Some(pool) => Arc::new(crate::store::postgres::PgStore::new(pool.clone())),
        None => Arc::new(MemoryStore::new()),
    };
    #[cfg(not(feature = "postgres"))]
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    // ── Account source: file > database > fallback only ───────────────────────
    let file_source = config
        .accounts_file
        .as_ref()
        .map(|path| Arc::new(FileAccountSource::new(path)) as Arc<dyn AccountSource>);
    #[cfg(feature = "postgres")]
    let account_source = file_source.or_else(|| {
        pool.as_ref()
            .map(|pool| Arc::new(crate::accounts::PgAccountSource::new(pool.clone())) as Arc<dyn AccountSource>)
    });
    #[cfg(not(feature = "postgres"))]
    let account_source = file_source;

    match &account_source {
        Some(source) => info!(source = %source.describe(), "📒 Account source configured"),
        None => warn!(fallback = config.fallback_accounts.len(), "⚠️ No account source — every cycle runs on FALLBACK_ACCOUNTS"),
    }

    let adapters = AdapterRegistry::from_config(&config, http.clone());
    let remediation_action = action_from_config(&config.remediation, http.clone());
    info!(action = remediation_action.name(), instance = %config.remediation.instance_id, "🔧 Remediation action configured");

    Ok(assemble(
        config,
        Components { store, account_source, adapters, remediation_action, http },
    ))
}

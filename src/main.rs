//! # termsync — Trading-Terminal Account Sync Pipeline
//!
//! ```text
//!  ┌──────────────┐ every SYNC_INTERVAL   ┌────────────────────┐  login/fetch/logout  ┌─────────────┐
//!  │  Sync Loop   │ ────────────────────▶ │  SyncOrchestrator  │ ───────────────────▶ │ MT5 / MT4   │
//!  └──────────────┘                       │  (single-flight)   │                      │ terminals   │
//!                                         └─────────┬──────────┘                      └─────────────┘
//!                                 snapshots + deals │ CycleResult
//!                                                   ▼
//!  ┌──────────────┐ every HEALTH_INTERVAL ┌────────────────────┐  Critical   ┌───────────────────────┐
//!  │ Health Loop  │ ────────────────────▶ │   HealthMonitor    │ ──────────▶ │ RemediationController │
//!  └──────────────┘                       └─────────┬──────────┘             └───────────┬───────────┘
//!                                                   └──────── AlertBus ◀─────────────────┘
//!                                                   (log · /api/alerts · /ws/alerts · webhook)
//! ```

use std::net::SocketAddr;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod accounts;
mod auth;
mod config;
mod engine;
mod error;
mod events;
mod models;
mod routes;
mod state;
mod store;
mod terminal;

use config::PipelineConfig;
use engine::{spawn_health_loop, spawn_sync_loop};
use state::build_state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env ──────────────────────────────────────────────────────────
    dotenvy::dotenv().ok();

    // ── 2. Structured logging ─────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("termsync=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!(r#"

  ╔═══════════════════════════════════════════════════════╗
  ║          TERMSYNC — Terminal Account Sync             ║
  ║   Sync · Health · Remediation · Alerts                ║
  ╚═══════════════════════════════════════════════════════╝"#);

    // ── 3. Config + shared state ──────────────────────────────────────────────
    let config = PipelineConfig::from_env()?;
    info!(
        sync_every   = ?config.sync.interval,
        health_every = ?config.health.interval,
        concurrency  = config.sync.concurrency,
        mt5_bridge   = %config.mt5_bridge_url,
        mt4_bridge   = %config.mt4_bridge_url,
        "⚙️ Config loaded"
    );
    let state = build_state(config).await?;

    // ── 4. Background loops ───────────────────────────────────────────────────
    let sync_loop   = spawn_sync_loop(state.clone());
    let health_loop = spawn_health_loop(state.clone());

    // ── 5. Router ─────────────────────────────────────────────────────────────
    let app = routes::router(state.clone());

    // ── 6. Bind & Serve ───────────────────────────────────────────────────────
    let addr: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        .parse()?;

    info!(?addr, "🚀 termsync server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("🛑 Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    // in-flight cycle ถูก cancel แล้ว — รอให้ logout / loop ปิดครบ
    state.shutdown.cancel();
    let _ = tokio::join!(sync_loop, health_loop);
    info!("👋 termsync stopped");

    Ok(())
}

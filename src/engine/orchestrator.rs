//! # engine::orchestrator
//!
//! **Sync Orchestrator** — วน sync ทุกบัญชีเป็นรอบ (cycle)
//!
//! ## ลำดับต่อบัญชี
//! ```text
//! adapter(platform) ─▶ login ─▶ fetch_account_state ─▶ fetch_deals ─▶ logout (เสมอ)
//!                                                                   │
//!                                       upsert snapshot + deals ◀───┘  (เขียนทันที ไม่รอจบ cycle)
//! ```
//!
//! ## กติกา
//! * **Single-flight** — ถ้า cycle ก่อนหน้ายัง Running อยู่ tick ใหม่ถูกข้าม
//! * **Per-account isolation** — error ของบัญชีหนึ่งจบแค่บัญชีนั้น
//! * **Bounded concurrency** — `SYNC_CONCURRENCY` (default 1: terminal ส่วนใหญ่
//!   รองรับ session เดียว)
//! * **Cycle deadline** — เกินแล้วบัญชีที่ยังไม่เสร็จถือว่า timeout,
//!   ผลที่เขียนไปแล้วยังอยู่ครบ
//! * ทุก adapter call ถูกตัดได้ด้วย `CancellationToken` (shutdown)

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::ConfigProvider;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::{
    AccountConfig, AccountError, AccountSnapshot, CycleResult, CycleStatus, Deal, SyncPhase,
};
use crate::store::{Store, StoreError, UpsertOutcome};
use crate::terminal::{AdapterRegistry, Session, TerminalAdapter};

/// deal ที่ปิดย้อนหลังอาจมาช้า — ดึงซ้อนช่วงนี้ทุกรอบ
const DEAL_OVERLAP: Duration = Duration::from_secs(3600);
/// เวลาสูงสุดของ logout หลัง deadline / error
const LOGOUT_GRACE: Duration = Duration::from_secs(5);

// ─── Cycle History ────────────────────────────────────────────────────────────

/// Last-N CycleResults. Reader ได้ snapshot ทั้งก้อนผ่าน `ArcSwap` —
/// ไม่มีทางเห็น cycle ที่เขียนไม่เสร็จ
pub struct CycleHistory {
    capacity: usize,
    entries:  ArcSwap<Vec<(u64, Arc<CycleResult>)>>,
    next_seq: AtomicU64,
}

impl CycleHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries:  ArcSwap::from_pointee(Vec::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn push(&self, cycle: Arc<CycleResult>) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.entries.rcu(|current| {
            let mut next: Vec<_> = current.iter().cloned().collect();
            next.push((seq, cycle.clone()));
            if next.len() > self.capacity {
                let excess = next.len() - self.capacity;
                next.drain(..excess);
            }
            next
        });
        seq
    }

    pub fn latest(&self) -> Option<Arc<CycleResult>> {
        self.entries.load().last().map(|(_, c)| c.clone())
    }

    /// Cycles ที่ seq > `after` เรียงเก่า → ใหม่
    pub fn since(&self, after: u64) -> Vec<(u64, Arc<CycleResult>)> {
        self.entries
            .load()
            .iter()
            .filter(|(seq, _)| *seq > after)
            .cloned()
            .collect()
    }

    pub fn recent(&self) -> Vec<Arc<CycleResult>> {
        self.entries.load().iter().map(|(_, c)| c.clone()).collect()
    }
}

// ─── Phase ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorPhase {
    Idle,
    Running,
}

/// Reset `running` เมื่อ cycle จบ (รวมถึงตอน panic / future ถูก drop)
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ─── Per-account context ──────────────────────────────────────────────────────

#[derive(Clone)]
struct AccountCtx {
    cycle_id:       Uuid,
    cycle_deadline: Instant,
    cancel:         CancellationToken,
}

#[derive(Debug, Default)]
struct DealCounts {
    inserted:  u32,
    updated:   u32,
    unchanged: u32,
}

struct AccountRun {
    account_number: String,
    result:         Result<DealCounts, AccountError>,
}

// ─── Orchestrator ─────────────────────────────────────────────────────────────

pub struct SyncOrchestrator {
    config:   SyncConfig,
    provider: Arc<ConfigProvider>,
    adapters: AdapterRegistry,
    store:    Arc<dyn Store>,
    history:  Arc<CycleHistory>,
    running:  AtomicBool,
    /// เวลา deal ล่าสุดที่เห็นต่อบัญชี → `since` ของรอบถัดไป
    deal_cursors: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SyncOrchestrator {
    pub fn new(
        config:   SyncConfig,
        provider: Arc<ConfigProvider>,
        adapters: AdapterRegistry,
        store:    Arc<dyn Store>,
        history:  Arc<CycleHistory>,
    ) -> Self {
        Self {
            config,
            provider,
            adapters,
            store,
            history,
            running: AtomicBool::new(false),
            deal_cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn phase(&self) -> OrchestratorPhase {
        if self.running.load(Ordering::SeqCst) {
            OrchestratorPhase::Running
        } else {
            OrchestratorPhase::Idle
        }
    }

    pub fn history(&self) -> &Arc<CycleHistory> {
        &self.history
    }

    /// รัน 1 cycle ถ้าไม่มี cycle อื่นค้างอยู่. `None` = tick ถูกข้าม
    pub async fn try_run_cycle(&self, cancel: &CancellationToken) -> Option<Arc<CycleResult>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("⏭️ Previous sync cycle still running — skipping this tick");
            return None;
        }
        let _guard = RunningGuard(&self.running);

        let result = Arc::new(self.run_cycle(cancel).await);
        self.history.push(result.clone());
        Some(result)
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> CycleResult {
        let cycle_id   = Uuid::new_v4();
        let started_at = Utc::now();
        let ctx = AccountCtx {
            cycle_id,
            cycle_deadline: Instant::now() + self.config.cycle_deadline,
            cancel:         cancel.child_token(),
        };

        // ── 1. Hot-reload account list ────────────────────────────────────────
        let loaded = self.provider.load_active_accounts().await;
        if loaded.used_fallback {
            warn!(%cycle_id, accounts = loaded.accounts.len(), "⚠️ Sync cycle running on fallback account list");
        }
        let account_numbers: Vec<String> =
            loaded.accounts.iter().map(|a| a.account_number.clone()).collect();

        info!(%cycle_id, accounts = account_numbers.len(), concurrency = self.config.concurrency, "🔄 Sync cycle starting");

        // ── 2. Accounts (bounded concurrency, isolated) ───────────────────────
        let runs: Vec<AccountRun> = stream::iter(loaded.accounts)
            .map(|account| self.run_account(account, ctx.clone()))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        // ── 3. Aggregate ──────────────────────────────────────────────────────
        let mut by_account: HashMap<String, Result<DealCounts, AccountError>> =
            runs.into_iter().map(|r| (r.account_number, r.result)).collect();

        let mut per_account_errors = Vec::new();
        let mut succeeded = 0u32;
        for number in &account_numbers {
            match by_account.remove(number) {
                Some(Ok(_)) => succeeded += 1,
                Some(Err(e)) => per_account_errors.push(e),
                None => {}
            }
        }

        let attempted = account_numbers.len() as u32;
        let cut_short = ctx.cancel.is_cancelled() || Instant::now() >= ctx.cycle_deadline;
        let status = if cut_short && !per_account_errors.is_empty() {
            CycleStatus::Aborted
        } else {
            CycleStatus::Completed
        };

        let result = CycleResult {
            cycle_id,
            started_at,
            ended_at: Utc::now(),
            status,
            attempted,
            succeeded,
            failed: attempted - succeeded,
            used_fallback: loaded.used_fallback,
            accounts: account_numbers,
            per_account_errors,
        };

        info!(
            %cycle_id,
            status    = ?result.status,
            attempted = result.attempted,
            succeeded = result.succeeded,
            failed    = result.failed,
            "🏁 Sync cycle finished"
        );
        result
    }

    async fn run_account(&self, account: AccountConfig, ctx: AccountCtx) -> AccountRun {
        let account_number = account.account_number.clone();
        let result = self.sync_account(&account, &ctx).await;

        match &result {
            Ok(counts) => info!(
                cycle_id  = %ctx.cycle_id,
                account   = %account_number,
                inserted  = counts.inserted,
                updated   = counts.updated,
                unchanged = counts.unchanged,
                "✅ Account synced"
            ),
            Err(e) => warn!(
                cycle_id = %ctx.cycle_id,
                account  = %account_number,
                phase    = %e.phase,
                kind     = ?e.kind,
                error    = %e.message,
                "❌ Account sync failed"
            ),
        }

        AccountRun { account_number, result }
    }

    async fn sync_account(&self, account: &AccountConfig, ctx: &AccountCtx) -> Result<DealCounts, AccountError> {
        let number = account.account_number.as_str();
        let fail = |phase: SyncPhase| move |e: SyncError| AccountError::new(number, phase, &e);

        let deadline = ctx.cycle_deadline.min(Instant::now() + self.config.account_timeout);

        let adapter = self.adapters.get(account.platform).ok_or_else(|| {
            fail(SyncPhase::Config)(SyncError::Config(format!("no adapter for platform {}", account.platform)))
        })?;

        // ── Login ─────────────────────────────────────────────────────────────
        let session = self
            .bounded(adapter.login(account, self.config.call_timeout), deadline, ctx, "login")
            .await
            .map_err(fail(SyncPhase::Login))?;

        // ── Fetch (session ต้อง logout เสมอ ไม่ว่าผลจะเป็นอะไร) ────────────────
        let fetched = self.fetch(adapter.as_ref(), &session, deadline, ctx).await;
        self.logout(adapter.as_ref(), &session, ctx).await;
        let (snapshot, deals) = fetched?;

        // ── Persist ทันที ────────────────────────────────────────────────────
        self.persist(snapshot, deals, deadline, ctx)
            .await
            .map_err(fail(SyncPhase::Persist))
    }

    async fn fetch(
        &self,
        adapter:  &dyn TerminalAdapter,
        session:  &Session,
        deadline: Instant,
        ctx:      &AccountCtx,
    ) -> Result<(AccountSnapshot, Vec<Deal>), AccountError> {
        let number = session.account_number.as_str();
        let timeout = self.config.call_timeout;

        let mut snapshot = self
            .bounded(adapter.fetch_account_state(session, timeout), deadline, ctx, "fetch_account_state")
            .await
            .map_err(|e| AccountError::new(number, SyncPhase::FetchAccount, &e))?;
        snapshot.data_source = adapter.name().to_string();
        if snapshot.fund_class.is_none() {
            snapshot.fund_class = session.fund_class.clone();
        }

        let since = self.deals_since(number);
        let deals = self
            .bounded(adapter.fetch_deals(session, since, timeout), deadline, ctx, "fetch_deals")
            .await
            .map_err(|e| AccountError::new(number, SyncPhase::FetchDeals, &e))?;

        debug!(account = %number, %since, deals = deals.len(), "Deals fetched");
        Ok((snapshot, deals))
    }

    async fn logout(&self, adapter: &dyn TerminalAdapter, session: &Session, ctx: &AccountCtx) {
        let grace = self.config.call_timeout.min(LOGOUT_GRACE);
        match tokio::time::timeout(grace, adapter.logout(session, grace)).await {
            Ok(Ok(())) => debug!(
                account = %session.account_number,
                held_ms = (Utc::now() - session.opened_at).num_milliseconds(),
                "Session closed"
            ),
            Ok(Err(e)) => warn!(cycle_id = %ctx.cycle_id, account = %session.account_number, phase = %SyncPhase::Logout, error = %e, "Logout failed"),
            Err(_) => warn!(cycle_id = %ctx.cycle_id, account = %session.account_number, phase = %SyncPhase::Logout, "Logout timed out"),
        }
    }

    async fn persist(
        &self,
        snapshot: AccountSnapshot,
        deals:    Vec<Deal>,
        deadline: Instant,
        ctx:      &AccountCtx,
    ) -> Result<DealCounts, SyncError> {
        let number = snapshot.account_number.clone();

        self.bounded(
            self.with_retry("upsert_snapshot", || self.store.upsert_snapshot(snapshot.clone())),
            deadline,
            ctx,
            "upsert_snapshot",
        )
        .await?;

        let mut counts = DealCounts::default();
        let mut latest: Option<DateTime<Utc>> = None;
        let mut oldest_open: Option<DateTime<Utc>> = None;
        for deal in &deals {
            let outcome = self
                .bounded(self.with_retry("upsert_deal", || self.store.upsert_deal(deal)), deadline, ctx, "upsert_deal")
                .await?;
            match outcome {
                UpsertOutcome::Inserted  => counts.inserted += 1,
                UpsertOutcome::Updated   => counts.updated += 1,
                UpsertOutcome::Unchanged => counts.unchanged += 1,
            }
            latest = latest.max(Some(deal.last_activity()));
            if deal.close_time.is_none() {
                oldest_open = Some(oldest_open.map_or(deal.open_time, |t| t.min(deal.open_time)));
            }
        }

        // เลื่อน cursor หลังเขียน deal ครบเท่านั้น และห้ามเลย open_time ของ deal
        // ที่ยังเปิดอยู่ ไม่งั้นรอบหน้า bridge จะไม่ส่ง deal นั้นมาอีกตอนมันปิด
        if let Some(latest) = latest {
            if let Ok(mut cursors) = self.deal_cursors.lock() {
                let high = cursors.get(&number).copied().map_or(latest, |c| c.max(latest));
                let cursor = oldest_open.map_or(high, |open| high.min(open));
                cursors.insert(number, cursor);
            }
        }
        Ok(counts)
    }

    fn deals_since(&self, account_number: &str) -> DateTime<Utc> {
        let cursor = self
            .deal_cursors
            .lock()
            .ok()
            .and_then(|c| c.get(account_number).copied());

        match cursor {
            Some(latest) => latest - chrono::Duration::from_std(DEAL_OVERLAP).unwrap_or_default(),
            None => Utc::now() - chrono::Duration::from_std(self.config.deal_lookback).unwrap_or_default(),
        }
    }

    /// Persistence write: retry 1 ครั้งหลัง backoff แล้วยอมแพ้
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, SyncError>
    where
        F:   FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match op().await {
            Ok(v) => Ok(v),
            Err(first) => {
                warn!(call = what, error = %first, backoff = ?self.config.persist_retry_backoff, "Store write failed — retrying once");
                tokio::time::sleep(self.config.persist_retry_backoff).await;
                op().await.map_err(SyncError::from)
            }
        }
    }

    /// ครอบ call ด้วย call timeout + account/cycle deadline + shutdown
    async fn bounded<T, Fut>(
        &self,
        fut:      Fut,
        deadline: Instant,
        ctx:      &AccountCtx,
        what:     &str,
    ) -> Result<T, SyncError>
    where
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let call_timeout = self.config.call_timeout;
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(SyncError::Cancelled(format!("{what}: shutdown"))),
            _ = tokio::time::sleep_until(deadline) => {
                if deadline >= ctx.cycle_deadline {
                    Err(SyncError::Timeout(format!("{what}: cycle deadline exceeded")))
                } else {
                    Err(SyncError::Timeout(format!("{what}: account timeout exceeded")))
                }
            }
            res = tokio::time::timeout(call_timeout, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(SyncError::Timeout(format!("{what}: no response within {call_timeout:?}"))),
            },
        }
    }
}

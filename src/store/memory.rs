//! # store::memory
//!
//! In-process store — ใช้เป็น default ตอนไม่มี `DATABASE_URL` และใน test.
//! มี outage switch (`set_available`, test only) สำหรับจำลอง backend ล่ม

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{next_updated_at, Store, StoreError, UpsertOutcome};
use crate::models::{AccountSnapshot, Deal};

#[derive(Default)]
pub struct MemoryStore {
    snapshots: RwLock<HashMap<String, AccountSnapshot>>,
    /// Key = (account_number, ticket); BTreeMap เพื่อให้อ่านออกมาเรียงตาม ticket
    deals:     RwLock<BTreeMap<(String, u64), Deal>>,
    offline:   AtomicBool,
    /// จำนวนครั้งที่เขียน deal จริง (insert + update)
    deal_writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn deal_writes(&self) -> u64 {
        self.deal_writes.load(Ordering::Relaxed)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_snapshot(&self, mut snapshot: AccountSnapshot) -> Result<AccountSnapshot, StoreError> {
        self.check_online()?;
        let mut guard = self.snapshots.write().await;

        let previous = guard.get(&snapshot.account_number).map(|s| s.updated_at);
        snapshot.updated_at = next_updated_at(previous, Utc::now());

        guard.insert(snapshot.account_number.clone(), snapshot.clone());
        Ok(snapshot)
    }

    async fn upsert_deal(&self, deal: &Deal) -> Result<UpsertOutcome, StoreError> {
        self.check_online()?;
        let mut guard = self.deals.write().await;
        let (account, ticket) = deal.key();
        let key = (account.to_string(), ticket);

        let outcome = match guard.get(&key) {
            None => UpsertOutcome::Inserted,
            Some(existing) if existing.mutable_fields_differ(deal) => UpsertOutcome::Updated,
            Some(_) => return Ok(UpsertOutcome::Unchanged),
        };

        guard.insert(key, deal.clone());
        self.deal_writes.fetch_add(1, Ordering::Relaxed);
        debug!(account = %deal.account_number, ticket = deal.ticket, ?outcome, "deal written");
        Ok(outcome)
    }

    async fn snapshot(&self, account_number: &str) -> Result<Option<AccountSnapshot>, StoreError> {
        self.check_online()?;
        Ok(self.snapshots.read().await.get(account_number).cloned())
    }

    async fn snapshots(&self) -> Result<Vec<AccountSnapshot>, StoreError> {
        self.check_online()?;
        let mut all: Vec<_> = self.snapshots.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.account_number.cmp(&b.account_number));
        Ok(all)
    }

    async fn deals(&self, account_number: &str) -> Result<Vec<Deal>, StoreError> {
        self.check_online()?;
        Ok(self
            .deals
            .read()
            .await
            .iter()
            .filter(|((acc, _), _)| acc == account_number)
            .map(|(_, d)| d.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::DealSide;

    fn snapshot(account: &str, balance: f64) -> AccountSnapshot {
        AccountSnapshot {
            account_number: account.into(),
            balance,
            equity:      balance,
            margin:      0.0,
            free_margin: balance,
            profit:      0.0,
            currency:    "USD".into(),
            leverage:    500,
            fund_class:  Some("A".into()),
            data_source: "mock".into(),
            updated_at:  Utc::now() - chrono::Duration::days(1),
        }
    }

    fn deal(ticket: u64) -> Deal {
        Deal {
            account_number: "1001".into(),
            ticket,
            symbol:      "EURUSD".into(),
            side:        DealSide::Sell,
            volume:      1.0,
            open_time:   Utc::now(),
            close_time:  None,
            open_price:  1.0850,
            close_price: None,
            profit:      0.0,
            commission:  -3.5,
            swap:        0.0,
        }
    }

    #[tokio::test]
    async fn test_snapshot_overwrite_stamps_updated_at() {
        let store = MemoryStore::new();
        let first = store.upsert_snapshot(snapshot("1001", 1000.0)).await.unwrap();
        let second = store.upsert_snapshot(snapshot("1001", 1250.0)).await.unwrap();

        assert!(second.updated_at >= first.updated_at);
        let stored = store.snapshot("1001").await.unwrap().unwrap();
        assert_eq!(stored.balance, 1250.0);
        assert_eq!(store.snapshots().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deal_resync_is_idempotent() {
        let store = MemoryStore::new();
        let deals = vec![deal(1), deal(2)];

        for _ in 0..2 {
            for d in &deals {
                store.upsert_deal(d).await.unwrap();
            }
        }

        assert_eq!(store.deals("1001").await.unwrap().len(), 2);
        assert_eq!(store.deal_writes(), 2);
        assert_eq!(store.upsert_deal(&deals[0]).await.unwrap(), UpsertOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_deal_update_only_when_mutable_fields_change() {
        let store = MemoryStore::new();
        let mut d = deal(7);
        assert_eq!(store.upsert_deal(&d).await.unwrap(), UpsertOutcome::Inserted);

        d.close_time  = Some(d.open_time + chrono::Duration::hours(1));
        d.close_price = Some(1.0800);
        d.profit      = 50.0;
        assert_eq!(store.upsert_deal(&d).await.unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.deals("1001").await.unwrap()[0].profit, 50.0);
    }

    #[tokio::test]
    async fn test_freshness_classification() {
        let store = MemoryStore::new();
        let stored = store.upsert_snapshot(snapshot("1001", 1000.0)).await.unwrap();
        let threshold = Duration::from_secs(600);

        let at_9m = stored.updated_at + chrono::Duration::minutes(9);
        let at_11m = stored.updated_at + chrono::Duration::minutes(11);
        let age_9 = store.freshness_of("1001", at_9m).await.unwrap().unwrap();
        let age_11 = store.freshness_of("1001", at_11m).await.unwrap().unwrap();

        assert_eq!(crate::models::Freshness::classify(age_9, threshold), crate::models::Freshness::Fresh);
        assert_eq!(crate::models::Freshness::classify(age_11, threshold), crate::models::Freshness::Stale);
        assert!(store.freshness_of("9999", at_9m).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_outage_keeps_previous_records() {
        let store = MemoryStore::new();
        store.upsert_snapshot(snapshot("1001", 1000.0)).await.unwrap();

        store.set_available(false);
        let err = store.upsert_snapshot(snapshot("1001", 1.0)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_available(true);
        assert_eq!(store.snapshot("1001").await.unwrap().unwrap().balance, 1000.0);
    }
}

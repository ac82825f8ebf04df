//! # store — Persistence Store
//!
//! Durable upsert storage สำหรับ [`AccountSnapshot`] และ [`Deal`]
//!
//! ## Contract
//! * `upsert_snapshot` — overwrite ตาม account number และ stamp `updated_at`
//!   ใหม่ทุกครั้ง (ไม่ถอยหลังภายใน process เดียวกัน)
//! * `upsert_deal` — insert ถ้ายังไม่มี `(account_number, ticket)`;
//!   ถ้ามีแล้ว update เฉพาะเมื่อ mutable field เปลี่ยน
//! * backend ใช้ไม่ได้ → [`StoreError::Unavailable`] — record เดิมต้องไม่เสีย
//!
//! Backends: [`memory::MemoryStore`] (default) และ `postgres::PgStore`
//! (`--features postgres`)

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::{AccountSnapshot, Deal, Freshness};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backend unreachable (connection refused, pool timeout, ...)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Query ทำงานได้แต่ข้อมูลใช้ไม่ได้
    #[error("store query failed: {0}")]
    Query(String),
}

// ─── Upsert outcome ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// ข้อมูลเหมือนเดิม — ไม่มีการเขียน
    Unchanged,
}

// ─── Store trait ──────────────────────────────────────────────────────────────

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Overwrite snapshot ของบัญชี คืน record ที่เก็บจริง (พร้อม `updated_at`)
    async fn upsert_snapshot(&self, snapshot: AccountSnapshot) -> Result<AccountSnapshot, StoreError>;

    async fn upsert_deal(&self, deal: &Deal) -> Result<UpsertOutcome, StoreError>;

    async fn snapshot(&self, account_number: &str) -> Result<Option<AccountSnapshot>, StoreError>;

    async fn snapshots(&self) -> Result<Vec<AccountSnapshot>, StoreError>;

    /// Deals ของบัญชี เรียงตาม ticket
    async fn deals(&self, account_number: &str) -> Result<Vec<Deal>, StoreError>;

    /// อายุของ snapshot ณ `now`; `None` = ยังไม่เคย sync
    async fn freshness_of(
        &self,
        account_number: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Duration>, StoreError> {
        Ok(self.snapshot(account_number).await?.map(|s| s.age_at(now)))
    }
}

/// `updated_at` ใหม่ต้องไม่น้อยกว่าของเดิม (clock ถอยหลังได้)
pub(crate) fn next_updated_at(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if prev > now => prev,
        _ => now,
    }
}

// ─── Downstream read view ─────────────────────────────────────────────────────

/// Snapshot + freshness metadata สำหรับ consumer ภายนอก
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotView {
    #[serde(flatten)]
    pub snapshot:  AccountSnapshot,
    pub age_secs:  u64,
    pub freshness: Freshness,
}

impl SnapshotView {
    pub fn new(snapshot: AccountSnapshot, now: DateTime<Utc>, threshold: Duration) -> Self {
        let age = snapshot.age_at(now);
        Self {
            snapshot,
            age_secs:  age.as_secs(),
            freshness: Freshness::classify(age, threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updated_at_never_regresses() {
        let now  = Utc::now();
        let later = now + chrono::Duration::seconds(5);
        assert_eq!(next_updated_at(Some(later), now), later);
        assert_eq!(next_updated_at(Some(now), later), later);
        assert_eq!(next_updated_at(None, now), now);
    }
}

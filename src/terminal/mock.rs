//! # terminal::mock
//!
//! **MockTerminal** — terminal จำลองแบบ deterministic
//!
//! ใช้ตอน `MT5_BRIDGE_URL=mock` (dev โดยไม่ต้องมี MT5) และใน test
//! ตั้งพฤติกรรมรายบัญชีได้ผ่าน [`MockTerminal::script`]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use super::{Session, TerminalAdapter};
use crate::error::SyncError;
use crate::models::{AccountConfig, AccountSnapshot, Deal, DealSide};

/// พฤติกรรมของบัญชีใน MockTerminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockBehavior {
    #[default]
    Healthy,
    /// Login ไม่ผ่าน (credential ผิด)
    RejectLogin,
    /// Login ได้ แต่ fetch account ค้างไม่ตอบ
    HangOnFetch,
    /// ตอบข้อมูลที่ parse ไม่ได้
    Garbage,
}

#[derive(Default)]
pub struct MockTerminal {
    script:  RwLock<HashMap<String, MockBehavior>>,
    /// จำนวน deal ที่ "ปิดแล้ว" ต่อบัญชี — เพิ่มได้เพื่อจำลอง deal ใหม่
    deals:   RwLock<HashMap<String, u64>>,
    logins:  AtomicU64,
    logouts: AtomicU64,
}

impl MockTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn script(&self, account_number: &str, behavior: MockBehavior) {
        if let Ok(mut guard) = self.script.write() {
            guard.insert(account_number.to_string(), behavior);
        }
    }

    #[cfg(test)]
    pub fn set_deal_count(&self, account_number: &str, count: u64) {
        if let Ok(mut guard) = self.deals.write() {
            guard.insert(account_number.to_string(), count);
        }
    }

    #[cfg(test)]
    pub fn logins(&self) -> u64 {
        self.logins.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn logouts(&self) -> u64 {
        self.logouts.load(Ordering::SeqCst)
    }

    fn behavior(&self, account_number: &str) -> MockBehavior {
        self.script
            .read()
            .ok()
            .and_then(|g| g.get(account_number).copied())
            .unwrap_or_default()
    }

    fn deal_count(&self, account_number: &str) -> u64 {
        self.deals
            .read()
            .ok()
            .and_then(|g| g.get(account_number).copied())
            .unwrap_or(3)
    }
}

/// ตัวเลขคงที่จาก account number — balance ไม่สุ่ม ทดสอบซ้ำได้
fn seed(account_number: &str) -> f64 {
    account_number
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64)) as f64
        % 50_000.0
}

#[async_trait]
impl TerminalAdapter for MockTerminal {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn login(&self, account: &AccountConfig, _timeout: Duration) -> Result<Session, SyncError> {
        if self.behavior(&account.account_number) == MockBehavior::RejectLogin {
            return Err(SyncError::Auth(format!(
                "invalid credential for {} on {}",
                account.account_number, account.server
            )));
        }
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Session::new(format!("mock-{n}"), account))
    }

    async fn fetch_account_state(
        &self,
        session: &Session,
        _timeout: Duration,
    ) -> Result<AccountSnapshot, SyncError> {
        match self.behavior(&session.account_number) {
            MockBehavior::HangOnFetch => {
                info!(account = %session.account_number, "🎭 [MOCK] terminal hanging");
                return std::future::pending().await;
            }
            MockBehavior::Garbage => {
                return Err(SyncError::Protocol("mock terminal returned garbage".into()));
            }
            _ => {}
        }

        let balance = 10_000.0 + seed(&session.account_number);
        Ok(AccountSnapshot {
            account_number: session.account_number.clone(),
            balance,
            equity:         balance + 125.0,
            margin:         350.0,
            free_margin:    balance - 225.0,
            profit:         125.0,
            currency:       "USD".into(),
            leverage:       500,
            fund_class:     session.fund_class.clone(),
            data_source:    self.name().to_string(),
            updated_at:     Utc::now(),
        })
    }

    async fn fetch_deals(
        &self,
        session: &Session,
        _since: DateTime<Utc>,
        _timeout: Duration,
    ) -> Result<Vec<Deal>, SyncError> {
        let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default();
        let deals = (1..=self.deal_count(&session.account_number))
            .map(|i| {
                let open_time = base + chrono::Duration::hours(i as i64);
                Deal {
                    account_number: session.account_number.clone(),
                    ticket:         i,
                    symbol:         "XAUUSD".into(),
                    side:           if i % 2 == 0 { DealSide::Sell } else { DealSide::Buy },
                    volume:         0.1,
                    open_time,
                    close_time:     Some(open_time + chrono::Duration::minutes(30)),
                    open_price:     2000.0 + i as f64,
                    close_price:    Some(2001.0 + i as f64),
                    profit:         10.0,
                    commission:     -0.7,
                    swap:           0.0,
                }
            })
            .collect();
        Ok(deals)
    }

    async fn logout(&self, _session: &Session, _timeout: Duration) -> Result<(), SyncError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

//! # models::account
//!
//! Account-level records ที่ไหลผ่าน pipeline:
//!
//! * [`AccountConfig`]   — บัญชีที่ต้อง sync (อ่านอย่างเดียวจาก Config Provider)
//! * [`AccountSnapshot`] — balance / equity / margin ล่าสุดของบัญชี (1 record ต่อบัญชี)
//! * [`Deal`]            — ประวัติ deal จาก terminal, key = `(account_number, ticket)`

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Platform ─────────────────────────────────────────────────────────────────

/// Terminal protocol family — ใช้เลือก Terminal Adapter ที่จะคุยกับบัญชีนี้
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Mt5,
    Mt4,
    /// Deterministic in-process terminal (dev / tests)
    Mock,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Mt5  => write!(f, "mt5"),
            Platform::Mt4  => write!(f, "mt4"),
            Platform::Mock => write!(f, "mock"),
        }
    }
}

// ─── AccountConfig ────────────────────────────────────────────────────────────

/// One account the pipeline should synchronise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfig {
    #[serde(default)]
    pub id: Option<i64>,
    pub account_number: String,
    pub server: String,
    /// `env:NAME` → รหัสผ่านอยู่ใน environment variable `NAME`
    pub credential_ref: String,
    #[serde(default)]
    pub fund_class: Option<String>,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool { true }

// ─── AccountSnapshot ──────────────────────────────────────────────────────────

/// Point-in-time account state. Last write wins per `account_number`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub account_number: String,
    pub balance:        f64,
    pub equity:         f64,
    pub margin:         f64,
    pub free_margin:    f64,
    pub profit:         f64,
    pub currency:       String,
    pub leverage:       u32,
    pub fund_class:     Option<String>,
    /// Adapter ที่ดึงข้อมูลมา เช่น `"mt5-bridge"`
    pub data_source:    String,
    /// Store เป็นคนตั้งค่านี้ตอน upsert
    pub updated_at:     DateTime<Utc>,
}

impl AccountSnapshot {
    /// อายุของ snapshot ณ เวลา `now` (ไม่ติดลบ)
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.updated_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

// ─── Deal ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DealSide {
    Buy,
    Sell,
    /// Deposit / withdrawal / credit — non-trading balance operations
    Balance,
}

/// A single closed or open deal reported by the terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub account_number: String,
    pub ticket:         u64,
    pub symbol:         String,
    pub side:           DealSide,
    pub volume:         f64,
    pub open_time:      DateTime<Utc>,
    pub close_time:     Option<DateTime<Utc>>,
    pub open_price:     f64,
    pub close_price:    Option<f64>,
    pub profit:         f64,
    pub commission:     f64,
    pub swap:           f64,
}

impl Deal {
    /// Unique key ของ deal
    pub fn key(&self) -> (&str, u64) {
        (&self.account_number, self.ticket)
    }

    /// `true` ถ้า field ที่เปลี่ยนได้ (ตอนปิด / partial close) ต่างจาก `other`
    pub fn mutable_fields_differ(&self, other: &Deal) -> bool {
        self.close_time  != other.close_time
            || self.close_price != other.close_price
            || self.volume      != other.volume
            || self.profit      != other.profit
            || self.commission  != other.commission
            || self.swap        != other.swap
    }

    /// เวลาล่าสุดที่ deal นี้มีการเปลี่ยนแปลง — ใช้คำนวณ `since` รอบถัดไป
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.close_time.unwrap_or(self.open_time).max(self.open_time)
    }
}

// ─── Freshness ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
}

impl Freshness {
    /// อายุเท่ากับ threshold ยังนับว่า fresh
    pub fn classify(age: Duration, threshold: Duration) -> Self {
        if age > threshold { Freshness::Stale } else { Freshness::Fresh }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deal() -> Deal {
        Deal {
            account_number: "1001".into(),
            ticket:         42,
            symbol:         "XAUUSD".into(),
            side:           DealSide::Buy,
            volume:         0.10,
            open_time:      Utc::now(),
            close_time:     None,
            open_price:     2310.5,
            close_price:    None,
            profit:         0.0,
            commission:     -0.7,
            swap:           0.0,
        }
    }

    #[test]
    fn test_freshness_threshold() {
        let threshold = Duration::from_secs(10 * 60);
        assert_eq!(Freshness::classify(Duration::from_secs(9 * 60), threshold), Freshness::Fresh);
        assert_eq!(Freshness::classify(Duration::from_secs(11 * 60), threshold), Freshness::Stale);
        assert_eq!(Freshness::classify(threshold, threshold), Freshness::Fresh);
    }

    #[test]
    fn test_closing_a_deal_changes_mutable_fields() {
        let open = deal();
        let mut closed = open.clone();
        closed.close_time  = Some(open.open_time + chrono::Duration::minutes(5));
        closed.close_price = Some(2315.0);
        closed.profit      = 45.0;

        assert!(closed.mutable_fields_differ(&open));
        assert!(!open.mutable_fields_differ(&open.clone()));
    }

    #[test]
    fn test_snapshot_age_never_negative() {
        let snap = AccountSnapshot {
            account_number: "1001".into(),
            balance: 1000.0, equity: 1000.0, margin: 0.0, free_margin: 1000.0,
            profit: 0.0, currency: "USD".into(), leverage: 100,
            fund_class: None, data_source: "mock".into(),
            updated_at: Utc::now() + chrono::Duration::seconds(30),
        };
        assert_eq!(snap.age_at(Utc::now()), Duration::ZERO);
    }

    #[test]
    fn test_account_config_defaults() {
        let json = r#"{"accountNumber":"1001","server":"Broker-Live","credentialRef":"env:PW"}"#;
        let acc: AccountConfig = serde_json::from_str(json).unwrap();
        assert!(acc.active);
        assert_eq!(acc.platform, Platform::Mt5);
    }
}

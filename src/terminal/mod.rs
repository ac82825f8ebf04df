//! # terminal — Terminal Adapters
//!
//! Adapter 1 ตัวต่อ 1 protocol family ของ trading terminal. ทุกตัวมี
//! capability เดียวกัน: `login → fetch_account_state → fetch_deals → logout`
//!
//! ## กติกา
//! * ทุก call รับ `timeout` จาก caller — adapter ต้องไม่รอนานกว่านั้น
//! * Future ของทุก call ถูก drop กลางทางได้ (cancel-safe) — Orchestrator ใช้
//!   `tokio::select!` ตัดเมื่อ cycle deadline / shutdown
//! * **ไม่ retry เอง** — retry policy อยู่ที่ Orchestrator / Health layer
//!
//! | Platform | Adapter                    | Transport                      |
//! |----------|----------------------------|--------------------------------|
//! | `mt5`    | [`mt5::Mt5Bridge`]         | JSON HTTP bridge ข้าง terminal  |
//! | `mt4`    | [`mt4::Mt4Bridge`]         | legacy `/api/v1` HTTP bridge   |
//! | `mock`   | [`mock::MockTerminal`]     | in-process, deterministic      |

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::PipelineConfig;
use crate::error::SyncError;
use crate::models::{AccountConfig, AccountSnapshot, Deal, Platform};

pub mod bridge;
pub mod mock;
pub mod mt4;
pub mod mt5;

// ─── Session ──────────────────────────────────────────────────────────────────

/// Logged-in terminal session. ต้องส่งกลับไป `logout` เสมอ
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id:             String,
    pub account_number: String,
    pub server:         String,
    pub fund_class:     Option<String>,
    pub opened_at:      DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, account: &AccountConfig) -> Self {
        Self {
            id:             id.into(),
            account_number: account.account_number.clone(),
            server:         account.server.clone(),
            fund_class:     account.fund_class.clone(),
            opened_at:      Utc::now(),
        }
    }
}

// ─── Adapter trait ────────────────────────────────────────────────────────────

#[async_trait]
pub trait TerminalAdapter: Send + Sync + 'static {
    /// ชื่อที่ใช้เป็น `AccountSnapshot.data_source`
    fn name(&self) -> &'static str;

    async fn login(&self, account: &AccountConfig, timeout: Duration) -> Result<Session, SyncError>;

    async fn fetch_account_state(
        &self,
        session: &Session,
        timeout: Duration,
    ) -> Result<AccountSnapshot, SyncError>;

    async fn fetch_deals(
        &self,
        session: &Session,
        since: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<Deal>, SyncError>;

    async fn logout(&self, session: &Session, timeout: Duration) -> Result<(), SyncError>;
}

// ─── Credentials ──────────────────────────────────────────────────────────────

/// `env:NAME` → ค่าของ env var `NAME`. รูปแบบอื่น = AuthError
pub fn resolve_credential(credential_ref: &str) -> Result<String, SyncError> {
    let name = credential_ref
        .strip_prefix("env:")
        .ok_or_else(|| SyncError::Auth(format!("unsupported credential ref '{credential_ref}'")))?;

    match std::env::var(name) {
        Ok(secret) if !secret.is_empty() => Ok(secret),
        _ => Err(SyncError::Auth(format!("credential '{name}' is not set"))),
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

/// Platform → Adapter. เพิ่ม protocol ใหม่ = register adapter ใหม่ที่นี่
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn TerminalAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, platform: Platform, adapter: Arc<dyn TerminalAdapter>) -> Self {
        self.adapters.insert(platform, adapter);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn TerminalAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    /// Bridge URL = `"mock"` → ใช้ MockTerminal ตัวเดียวกันกับ platform `mock`
    pub fn from_config(config: &PipelineConfig, http: reqwest::Client) -> Self {
        let mock: Arc<dyn TerminalAdapter> = Arc::new(mock::MockTerminal::new());

        let mt5: Arc<dyn TerminalAdapter> = if config.mt5_bridge_url == "mock" {
            mock.clone()
        } else {
            Arc::new(mt5::Mt5Bridge::new(http.clone(), &config.mt5_bridge_url))
        };
        let mt4: Arc<dyn TerminalAdapter> = if config.mt4_bridge_url == "mock" {
            mock.clone()
        } else {
            Arc::new(mt4::Mt4Bridge::new(http, &config.mt4_bridge_url))
        };

        Self::new()
            .register(Platform::Mt5, mt5)
            .register(Platform::Mt4, mt4)
            .register(Platform::Mock, mock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_resolve_credential() {
        std::env::set_var("TERMSYNC_TEST_PW", "hunter2");
        assert_eq!(resolve_credential("env:TERMSYNC_TEST_PW").unwrap(), "hunter2");

        let err = resolve_credential("env:TERMSYNC_TEST_MISSING").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);

        let err = resolve_credential("hunter2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[test]
    fn test_registry_mock_mode() {
        let config = crate::config::test_config();
        let registry = AdapterRegistry::from_config(&config, reqwest::Client::new());
        assert_eq!(registry.get(Platform::Mt5).unwrap().name(), "mock");
        assert_eq!(registry.get(Platform::Mock).unwrap().name(), "mock");
    }

    #[test]
    fn test_registry_bridge_mode() {
        let mut config = crate::config::test_config();
        config.mt5_bridge_url = "http://127.0.0.1:8081".into();
        config.mt4_bridge_url = "http://127.0.0.1:8082".into();
        let registry = AdapterRegistry::from_config(&config, reqwest::Client::new());
        assert_eq!(registry.get(Platform::Mt5).unwrap().name(), "mt5-bridge");
        assert_eq!(registry.get(Platform::Mt4).unwrap().name(), "mt4-bridge");
    }
}

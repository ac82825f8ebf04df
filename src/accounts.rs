//! # accounts — Config Provider
//!
//! โหลดรายชื่อบัญชีที่ active ใหม่ทุกต้น cycle (hot-reload — เพิ่ม/ลบบัญชี
//! ไม่ต้อง restart)
//!
//! ```text
//! source.load() ──ok──▶ validate ──non-empty──▶ (accounts, used_fallback = false)
//!      │                    │
//!      └─ error ────────────┴─ empty ──▶ static fallback list ──▶ validate ──▶ (accounts, true)
//! ```
//!
//! Record ที่ไม่ครบ (account number / server / credential ref ว่าง) หรือ
//! account number ซ้ำ ถูกทิ้งทีละตัวพร้อม log `ConfigError` — ไม่ fatal

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::models::AccountConfig;

// ─── Source trait ─────────────────────────────────────────────────────────────

/// Durable configuration source (file, database, ...).
#[async_trait]
pub trait AccountSource: Send + Sync + 'static {
    async fn load(&self) -> anyhow::Result<Vec<AccountConfig>>;

    fn describe(&self) -> String;
}

/// JSON array ของ [`AccountConfig`] อ่านใหม่ทุกครั้งที่ `load`
pub struct FileAccountSource {
    path: PathBuf,
}

impl FileAccountSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AccountSource for FileAccountSource {
    async fn load(&self) -> anyhow::Result<Vec<AccountConfig>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read {}", self.path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse {}", self.path.display()))
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// `sync_accounts` table (see `migrations/001_init.sql`)
#[cfg(feature = "postgres")]
pub struct PgAccountSource {
    pool: sqlx::PgPool,
}

#[cfg(feature = "postgres")]
impl PgAccountSource {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl AccountSource for PgAccountSource {
    async fn load(&self) -> anyhow::Result<Vec<AccountConfig>> {
        use sqlx::Row;

        let rows = sqlx::query(
            r#"
            SELECT id, account_number, server, credential_ref, fund_class, platform, active
            FROM sync_accounts
            WHERE active
            ORDER BY account_number
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load sync_accounts failed")?;

        rows.iter()
            .map(|row| -> anyhow::Result<AccountConfig> {
                let platform: String = row.try_get("platform")?;
                Ok(AccountConfig {
                    id:             Some(row.try_get("id")?),
                    account_number: row.try_get("account_number")?,
                    server:         row.try_get("server")?,
                    credential_ref: row.try_get("credential_ref")?,
                    fund_class:     row.try_get("fund_class")?,
                    platform:       serde_json::from_value(serde_json::Value::String(platform))
                        .context("unknown platform in sync_accounts")?,
                    active:         row.try_get("active")?,
                })
            })
            .collect()
    }

    fn describe(&self) -> String {
        "postgres:sync_accounts".to_string()
    }
}

// ─── Provider ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedAccounts {
    pub accounts:      Vec<AccountConfig>,
    pub used_fallback: bool,
}

pub struct ConfigProvider {
    source:   Option<Arc<dyn AccountSource>>,
    fallback: Vec<AccountConfig>,
}

impl ConfigProvider {
    pub fn new(source: Option<Arc<dyn AccountSource>>, fallback: Vec<AccountConfig>) -> Self {
        Self { source, fallback }
    }

    pub async fn load_active_accounts(&self) -> LoadedAccounts {
        let loaded = match &self.source {
            Some(source) => match source.load().await {
                Ok(records) => {
                    let total = records.len();
                    let valid = validate(records);
                    if valid.is_empty() {
                        warn!(source = %source.describe(), records = total, "⚠️ Account source has no usable active records — using fallback list");
                        None
                    } else {
                        Some(valid)
                    }
                }
                Err(e) => {
                    warn!(source = %source.describe(), error = %format!("{e:#}"), "⚠️ Account source unreadable — using fallback list");
                    None
                }
            },
            None => None,
        };

        match loaded {
            Some(accounts) => LoadedAccounts { accounts, used_fallback: false },
            None => LoadedAccounts { accounts: validate(self.fallback.clone()), used_fallback: true },
        }
    }
}

/// เก็บเฉพาะ record ที่ active + ครบ + account number ไม่ซ้ำ
fn validate(records: Vec<AccountConfig>) -> Vec<AccountConfig> {
    let mut seen = HashSet::new();
    let mut valid = Vec::with_capacity(records.len());

    for record in records.into_iter().filter(|r| r.active) {
        if let Err(e) = check_record(&record) {
            warn!(account = %record.account_number, error = %e, "Dropping account record");
            continue;
        }
        if !seen.insert(record.account_number.clone()) {
            let e = SyncError::Config("duplicate account number".into());
            warn!(account = %record.account_number, error = %e, "Dropping account record");
            continue;
        }
        valid.push(record);
    }

    debug!(count = valid.len(), "Active accounts loaded");
    valid
}

fn check_record(record: &AccountConfig) -> Result<(), SyncError> {
    let missing = [
        ("account number", record.account_number.trim()),
        ("server", record.server.trim()),
        ("credential ref", record.credential_ref.trim()),
    ]
    .into_iter()
    .find(|(_, value)| value.is_empty());

    match missing {
        Some((field, _)) => Err(SyncError::Config(format!("missing {field}"))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;

    fn account(number: &str) -> AccountConfig {
        AccountConfig {
            id:             None,
            account_number: number.to_string(),
            server:         "Broker-Live".into(),
            credential_ref: format!("env:PW_{number}"),
            fund_class:     Some("A".into()),
            platform:       Platform::Mock,
            active:         true,
        }
    }

    struct StaticSource(anyhow::Result<Vec<AccountConfig>>);

    #[async_trait]
    impl AccountSource for StaticSource {
        async fn load(&self) -> anyhow::Result<Vec<AccountConfig>> {
            match &self.0 {
                Ok(v) => Ok(v.clone()),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }
        fn describe(&self) -> String { "static".into() }
    }

    fn provider(source: anyhow::Result<Vec<AccountConfig>>) -> ConfigProvider {
        ConfigProvider::new(Some(Arc::new(StaticSource(source))), vec![account("9001")])
    }

    #[tokio::test]
    async fn test_uses_source_when_available() {
        let loaded = provider(Ok(vec![account("1001"), account("1002")])).load_active_accounts().await;
        assert!(!loaded.used_fallback);
        assert_eq!(loaded.accounts.len(), 2);
    }

    #[tokio::test]
    async fn test_falls_back_on_error_or_empty() {
        let loaded = provider(Err(anyhow::anyhow!("db down"))).load_active_accounts().await;
        assert!(loaded.used_fallback);
        assert_eq!(loaded.accounts[0].account_number, "9001");

        let loaded = provider(Ok(vec![])).load_active_accounts().await;
        assert!(loaded.used_fallback);
    }

    #[tokio::test]
    async fn test_falls_back_when_nothing_usable_remains() {
        let mut inactive = account("1001");
        inactive.active = false;
        let loaded = provider(Ok(vec![inactive])).load_active_accounts().await;
        assert!(loaded.used_fallback);
        assert_eq!(loaded.accounts[0].account_number, "9001");

        let mut no_server = account("1002");
        no_server.server = String::new();
        let mut no_cred = account("1003");
        no_cred.credential_ref = " ".into();
        let loaded = provider(Ok(vec![no_server, no_cred])).load_active_accounts().await;
        assert!(loaded.used_fallback);
        assert_eq!(loaded.accounts.len(), 1);
    }

    #[tokio::test]
    async fn test_file_source_with_only_inactive_records_falls_back() {
        let mut inactive = account("1001");
        inactive.active = false;
        let path = std::env::temp_dir().join(format!("termsync-accounts-{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, serde_json::to_string(&vec![inactive]).unwrap()).await.unwrap();

        let provider = ConfigProvider::new(Some(Arc::new(FileAccountSource::new(&path))), vec![account("9001")]);
        let loaded = provider.load_active_accounts().await;
        assert!(loaded.used_fallback);
        assert_eq!(loaded.accounts[0].account_number, "9001");

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_invalid_records_dropped_individually() {
        let mut no_server = account("1002");
        no_server.server = "  ".into();
        let mut no_cred = account("1003");
        no_cred.credential_ref = String::new();
        let mut inactive = account("1004");
        inactive.active = false;

        let loaded = provider(Ok(vec![
            account("1001"), no_server, no_cred, inactive, account("1001"), account("1005"),
        ]))
        .load_active_accounts()
        .await;

        let numbers: Vec<_> = loaded.accounts.iter().map(|a| a.account_number.as_str()).collect();
        assert_eq!(numbers, vec!["1001", "1005"]);
    }

    #[tokio::test]
    async fn test_no_source_means_fallback() {
        let provider = ConfigProvider::new(None, vec![account("9001")]);
        let loaded = provider.load_active_accounts().await;
        assert!(loaded.used_fallback);
        assert_eq!(loaded.accounts.len(), 1);
    }

    #[tokio::test]
    async fn test_file_source_hot_reload() {
        let path = std::env::temp_dir().join(format!("termsync-accounts-{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, serde_json::to_string(&vec![account("1001")]).unwrap()).await.unwrap();

        let provider = ConfigProvider::new(Some(Arc::new(FileAccountSource::new(&path))), vec![]);
        assert_eq!(provider.load_active_accounts().await.accounts.len(), 1);

        tokio::fs::write(&path, serde_json::to_string(&vec![account("1001"), account("1002")]).unwrap()).await.unwrap();
        assert_eq!(provider.load_active_accounts().await.accounts.len(), 2);

        let _ = tokio::fs::remove_file(&path).await;
    }
}

//! # config — อ่าน Config จาก Environment Variables
//!
//! ค่า default ทั้งหมดใช้ได้ทันทีสำหรับ dev (mock terminal + memory store).
//! ค่าที่ parse ไม่ได้ → startup fail พร้อมบอกชื่อ key

use std::time::Duration;

use anyhow::{bail, Context};

use crate::models::AccountConfig;

// ─── Sync ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// รอบเวลา Sync Loop
    pub interval:            Duration,
    /// จำนวนบัญชีที่ login พร้อมกันได้ (terminal ส่วนใหญ่รองรับ session เดียว)
    pub concurrency:         usize,
    /// เวลาสูงสุดของบัญชีเดียว (login → logout)
    pub account_timeout:     Duration,
    /// เวลาสูงสุดของ adapter call แต่ละครั้ง
    pub call_timeout:        Duration,
    /// เวลาสูงสุดของทั้ง cycle — เกินแล้วบัญชีที่เหลือถือว่า timeout
    pub cycle_deadline:      Duration,
    /// ย้อนดู deal กี่วันตอน sync บัญชีครั้งแรก
    pub deal_lookback:       Duration,
    /// รอก่อน retry persistence write (retry ครั้งเดียว)
    pub persist_retry_backoff: Duration,
    /// เก็บ CycleResult ย้อนหลังกี่รอบ
    pub history_len:         usize,
}

// ─── Health ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub interval:            Duration,
    /// Snapshot อายุเกินนี้ = stale
    pub freshness_threshold: Duration,
    /// N — total-failure cycles ติดกันกี่รอบถึง Critical
    pub critical_after:      u32,
    /// M — clean cycles ติดกันกี่รอบถึงกลับ Healthy
    pub recover_after:       u32,
}

// ─── Remediation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationMode {
    Mock,
    Http { url: String },
    Command { program: String, args: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct RemediationConfig {
    pub mode:         RemediationMode,
    pub instance_id:  String,
    pub cooldown:     Duration,
    /// K — remediation สูงสุดกี่ครั้งใน rolling window
    pub max_attempts: u32,
    pub window:       Duration,
    pub timeout:      Duration,
}

// ─── Top-level ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sync:          SyncConfig,
    pub health:        HealthConfig,
    pub remediation:   RemediationConfig,
    /// `"mock"` = ใช้ MockTerminal แทน bridge จริง
    pub mt5_bridge_url: String,
    pub mt4_bridge_url: String,
    /// JSON file ที่เก็บรายชื่อบัญชี (อ่านใหม่ทุก cycle)
    pub accounts_file:  Option<String>,
    pub fallback_accounts: Vec<AccountConfig>,
    pub alert_webhook_url: Option<String>,
    pub database_url:   Option<String>,
    /// ว่าง = dev mode (ไม่ตรวจ `X-API-Key`)
    pub api_key:        Option<String>,
}

impl PipelineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            sync: SyncConfig {
                interval:              secs("SYNC_INTERVAL_SECS", 300)?,
                concurrency:           env_parse("SYNC_CONCURRENCY", 1usize)?,
                account_timeout:       secs("ACCOUNT_TIMEOUT_SECS", 60)?,
                call_timeout:          secs("CALL_TIMEOUT_SECS", 20)?,
                cycle_deadline:        secs("CYCLE_DEADLINE_SECS", 240)?,
                deal_lookback:         Duration::from_secs(env_parse("DEAL_LOOKBACK_DAYS", 30u64)? * 86_400),
                persist_retry_backoff: Duration::from_millis(env_parse("PERSIST_RETRY_BACKOFF_MS", 500u64)?),
                history_len:           env_parse("CYCLE_HISTORY", 20usize)?,
            },
            health: HealthConfig {
                interval:            secs("HEALTH_INTERVAL_SECS", 60)?,
                freshness_threshold: secs("FRESHNESS_THRESHOLD_SECS", 600)?,
                critical_after:      env_parse("HEALTH_CRITICAL_AFTER", 3u32)?,
                recover_after:       env_parse("HEALTH_RECOVER_AFTER", 2u32)?,
            },
            remediation: RemediationConfig {
                mode:         remediation_mode_from_env()?,
                instance_id:  std::env::var("PIPELINE_INSTANCE_ID").unwrap_or_else(|_| "termsync-01".to_string()),
                cooldown:     secs("REMEDIATION_COOLDOWN_SECS", 300)?,
                max_attempts: env_parse("REMEDIATION_MAX_ATTEMPTS", 3u32)?,
                window:       secs("REMEDIATION_WINDOW_SECS", 3600)?,
                timeout:      secs("REMEDIATION_TIMEOUT_SECS", 120)?,
            },
            mt5_bridge_url:    std::env::var("MT5_BRIDGE_URL").unwrap_or_else(|_| "mock".to_string()),
            mt4_bridge_url:    std::env::var("MT4_BRIDGE_URL").unwrap_or_else(|_| "mock".to_string()),
            accounts_file:     non_empty("ACCOUNTS_FILE"),
            fallback_accounts: fallback_accounts_from_env()?,
            alert_webhook_url: non_empty("ALERT_WEBHOOK_URL"),
            database_url:      non_empty("DATABASE_URL"),
            api_key:           non_empty("API_KEY"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sync.interval.is_zero() || self.health.interval.is_zero() {
            bail!("SYNC_INTERVAL_SECS and HEALTH_INTERVAL_SECS must be > 0");
        }
        if self.sync.concurrency == 0 {
            bail!("SYNC_CONCURRENCY must be >= 1");
        }
        if self.sync.history_len == 0 {
            bail!("CYCLE_HISTORY must be >= 1");
        }
        if self.health.critical_after == 0 || self.health.recover_after == 0 {
            bail!("HEALTH_CRITICAL_AFTER and HEALTH_RECOVER_AFTER must be >= 1");
        }
        if self.remediation.max_attempts == 0 {
            bail!("REMEDIATION_MAX_ATTEMPTS must be >= 1");
        }
        Ok(())
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got '{v}'")),
        _ => Ok(default),
    }
}

fn secs(key: &str, default: u64) -> anyhow::Result<Duration> {
    env_parse(key, default).map(Duration::from_secs)
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn remediation_mode_from_env() -> anyhow::Result<RemediationMode> {
    let mode = std::env::var("REMEDIATION_MODE")
        .unwrap_or_else(|_| "mock".to_string())
        .to_lowercase();

    match mode.as_str() {
        "mock" => Ok(RemediationMode::Mock),
        "http" => {
            let url = non_empty("REMEDIATION_URL")
                .context("REMEDIATION_URL is required when REMEDIATION_MODE=http")?;
            Ok(RemediationMode::Http { url })
        }
        "command" => {
            let raw = non_empty("REMEDIATION_COMMAND")
                .context("REMEDIATION_COMMAND is required when REMEDIATION_MODE=command")?;
            let mut parts = raw.split_whitespace().map(str::to_string);
            let program = parts.next().context("REMEDIATION_COMMAND is empty")?;
            Ok(RemediationMode::Command { program, args: parts.collect() })
        }
        other => bail!("Unknown REMEDIATION_MODE: '{other}'. Use 'mock', 'http' or 'command'"),
    }
}

/// `FALLBACK_ACCOUNTS` = JSON array ของ AccountConfig (bootstrap list)
fn fallback_accounts_from_env() -> anyhow::Result<Vec<AccountConfig>> {
    match non_empty("FALLBACK_ACCOUNTS") {
        Some(raw) => serde_json::from_str(&raw).context("FALLBACK_ACCOUNTS must be a JSON array of accounts"),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> PipelineConfig {
    PipelineConfig {
        sync: SyncConfig {
            interval:              Duration::from_secs(300),
            concurrency:           1,
            account_timeout:       Duration::from_secs(5),
            call_timeout:          Duration::from_secs(2),
            cycle_deadline:        Duration::from_secs(30),
            deal_lookback:         Duration::from_secs(30 * 86_400),
            persist_retry_backoff: Duration::from_millis(5),
            history_len:           20,
        },
        health: HealthConfig {
            interval:            Duration::from_secs(60),
            freshness_threshold: Duration::from_secs(600),
            critical_after:      3,
            recover_after:       2,
        },
        remediation: RemediationConfig {
            mode:         RemediationMode::Mock,
            instance_id:  "test-instance".into(),
            cooldown:     Duration::from_secs(300),
            max_attempts: 3,
            window:       Duration::from_secs(3600),
            timeout:      Duration::from_secs(5),
        },
        mt5_bridge_url:    "mock".into(),
        mt4_bridge_url:    "mock".into(),
        accounts_file:     None,
        fallback_accounts: Vec::new(),
        alert_webhook_url: None,
        database_url:      None,
        api_key:           None,
    }
}

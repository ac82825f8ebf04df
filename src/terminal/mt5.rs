//! # terminal::mt5
//!
//! **MT5 Bridge Adapter** — คุยกับ HTTP bridge ที่รันข้าง MetaTrader 5 terminal
//!
//! ## Bridge API Contract
//! ```text
//! POST /session/login    {login, password, server}   → {session_id}
//! GET  /account          X-Session: <id>             → {login, balance, equity, margin,
//!                                                       margin_free, profit, currency, leverage}
//! GET  /deals?from=<ts>  X-Session: <id>             → [{ticket, symbol, type, volume,
//!                                                        time, time_close, price, price_close,
//!                                                        profit, commission, swap}]
//! POST /session/logout   X-Session: <id>             → 200
//! ```
//! `type`: 0 = BUY, 1 = SELL, 2 = BALANCE (MT5 `DEAL_TYPE_*`). เวลาเป็น unix seconds

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::bridge::{normalize_base, send_json, send_unit};
use super::{resolve_credential, Session, TerminalAdapter};
use crate::error::SyncError;
use crate::models::{AccountConfig, AccountSnapshot, Deal, DealSide};

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    login:    &'a str,
    password: &'a str,
    server:   &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    login:       serde_json::Value,
    balance:     f64,
    equity:      f64,
    margin:      f64,
    margin_free: f64,
    profit:      f64,
    currency:    String,
    leverage:    u32,
}

#[derive(Debug, Deserialize)]
struct DealInfo {
    ticket:      u64,
    symbol:      String,
    #[serde(rename = "type")]
    deal_type:   u8,
    volume:      f64,
    time:        i64,
    time_close:  Option<i64>,
    price:       f64,
    price_close: Option<f64>,
    profit:      f64,
    #[serde(default)]
    commission:  f64,
    #[serde(default)]
    swap:        f64,
}

fn unix_time(secs: i64, what: &str) -> Result<DateTime<Utc>, SyncError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| SyncError::Protocol(format!("{what}: invalid timestamp {secs}")))
}

impl DealInfo {
    fn into_deal(self, account_number: &str) -> Result<Deal, SyncError> {
        let side = match self.deal_type {
            0 => DealSide::Buy,
            1 => DealSide::Sell,
            2 => DealSide::Balance,
            other => return Err(SyncError::Protocol(format!("deal {}: unknown type {other}", self.ticket))),
        };

        Ok(Deal {
            account_number: account_number.to_string(),
            ticket:         self.ticket,
            symbol:         self.symbol,
            side,
            volume:         self.volume,
            open_time:      unix_time(self.time, "deal time")?,
            close_time:     self.time_close.filter(|t| *t > 0).map(|t| unix_time(t, "deal time_close")).transpose()?,
            open_price:     self.price,
            close_price:    self.price_close,
            profit:         self.profit,
            commission:     self.commission,
            swap:           self.swap,
        })
    }
}

// ─── Adapter ──────────────────────────────────────────────────────────────────

pub struct Mt5Bridge {
    client:   reqwest::Client,
    base_url: String,
}

impl Mt5Bridge {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self { client, base_url: normalize_base(base_url) }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl TerminalAdapter for Mt5Bridge {
    fn name(&self) -> &'static str {
        "mt5-bridge"
    }

    async fn login(&self, account: &AccountConfig, timeout: Duration) -> Result<Session, SyncError> {
        let password = resolve_credential(&account.credential_ref)?;

        let body = LoginRequest {
            login:    &account.account_number,
            password: &password,
            server:   &account.server,
        };
        let resp: LoginResponse = send_json(
            self.client.post(self.url("/session/login")).json(&body),
            timeout,
            "mt5 login",
        )
        .await?;

        debug!(account = %account.account_number, "MT5 session opened");
        Ok(Session::new(resp.session_id, account))
    }

    async fn fetch_account_state(
        &self,
        session: &Session,
        timeout: Duration,
    ) -> Result<AccountSnapshot, SyncError> {
        let info: AccountInfo = send_json(
            self.client.get(self.url("/account")).header("X-Session", &session.id),
            timeout,
            "mt5 account",
        )
        .await?;

        // bridge ต้องตอบบัญชีเดียวกับที่ login — ไม่งั้นเป็น session ของคนอื่น
        let login = match &info.login {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if login != session.account_number {
            return Err(SyncError::Protocol(format!(
                "mt5 account: bridge reported login {login}, expected {}",
                session.account_number
            )));
        }

        Ok(AccountSnapshot {
            account_number: session.account_number.clone(),
            balance:        info.balance,
            equity:         info.equity,
            margin:         info.margin,
            free_margin:    info.margin_free,
            profit:         info.profit,
            currency:       info.currency,
            leverage:       info.leverage,
            fund_class:     session.fund_class.clone(),
            data_source:    self.name().to_string(),
            updated_at:     Utc::now(),
        })
    }

    async fn fetch_deals(
        &self,
        session: &Session,
        since: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<Deal>, SyncError> {
        let raw: Vec<DealInfo> = send_json(
            self.client
                .get(self.url(&format!("/deals?from={}", since.timestamp())))
                .header("X-Session", &session.id),
            timeout,
            "mt5 deals",
        )
        .await?;

        raw.into_iter()
            .map(|d| d.into_deal(&session.account_number))
            .collect()
    }

    async fn logout(&self, session: &Session, timeout: Duration) -> Result<(), SyncError> {
        send_unit(
            self.client.post(self.url("/session/logout")).header("X-Session", &session.id),
            timeout,
            "mt5 logout",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::Platform;
    use axum::{http::StatusCode, routing::{get, post}, Json, Router};
    use serde_json::json;

    /// Fake bridge บน port สุ่ม
    async fn spawn_bridge(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    fn account() -> AccountConfig {
        std::env::set_var("TERMSYNC_MT5_TEST_PW", "secret");
        AccountConfig {
            id:             None,
            account_number: "5001".into(),
            server:         "Broker-Live".into(),
            credential_ref: "env:TERMSYNC_MT5_TEST_PW".into(),
            fund_class:     Some("B".into()),
            platform:       Platform::Mt5,
            active:         true,
        }
    }

    fn happy_bridge() -> Router {
        Router::new()
            .route("/session/login", post(|| async { Json(json!({ "session_id": "s-1" })) }))
            .route("/account", get(|| async {
                Json(json!({
                    "login": 5001, "balance": 10000.0, "equity": 10120.5, "margin": 200.0,
                    "margin_free": 9920.5, "profit": 120.5, "currency": "USD", "leverage": 500
                }))
            }))
            .route("/deals", get(|| async {
                Json(json!([
                    { "ticket": 11, "symbol": "XAUUSD", "type": 0, "volume": 0.5, "time": 1_700_000_000,
                      "time_close": 1_700_000_600, "price": 1990.1, "price_close": 1992.3,
                      "profit": 110.0, "commission": -3.5, "swap": 0.0 },
                    { "ticket": 12, "symbol": "", "type": 2, "volume": 0.0, "time": 1_700_000_100,
                      "price": 0.0, "profit": 5000.0 }
                ]))
            }))
            .route("/session/logout", post(|| async { StatusCode::OK }))
    }

    #[tokio::test]
    async fn test_full_session_against_fake_bridge() {
        let base = spawn_bridge(happy_bridge()).await;
        let adapter = Mt5Bridge::new(reqwest::Client::new(), &base);
        let timeout = Duration::from_secs(2);

        let session = adapter.login(&account(), timeout).await.unwrap();
        assert_eq!(session.id, "s-1");

        let snap = adapter.fetch_account_state(&session, timeout).await.unwrap();
        assert_eq!(snap.equity, 10120.5);
        assert_eq!(snap.fund_class.as_deref(), Some("B"));
        assert_eq!(snap.data_source, "mt5-bridge");

        let deals = adapter.fetch_deals(&session, Utc::now(), timeout).await.unwrap();
        assert_eq!(deals.len(), 2);
        assert_eq!(deals[0].side, DealSide::Buy);
        assert!(deals[0].close_time.is_some());
        assert_eq!(deals[1].side, DealSide::Balance);
        assert!(deals[1].close_time.is_none());

        adapter.logout(&session, timeout).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_login_is_auth_error() {
        let router = Router::new()
            .route("/session/login", post(|| async { (StatusCode::UNAUTHORIZED, "invalid account") }));
        let base = spawn_bridge(router).await;
        let adapter = Mt5Bridge::new(reqwest::Client::new(), &base);

        let err = adapter.login(&account(), Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_malformed_account_is_protocol_error() {
        let router = Router::new()
            .route("/account", get(|| async { Json(json!({ "login": 5001, "balance": "lots" })) }));
        let base = spawn_bridge(router).await;
        let adapter = Mt5Bridge::new(reqwest::Client::new(), &base);
        let session = Session::new("s-1", &account());

        let err = adapter.fetch_account_state(&session, Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_wrong_login_reported_is_protocol_error() {
        let router = Router::new().route("/account", get(|| async {
            Json(json!({
                "login": 7777, "balance": 1.0, "equity": 1.0, "margin": 0.0,
                "margin_free": 1.0, "profit": 0.0, "currency": "USD", "leverage": 100
            }))
        }));
        let base = spawn_bridge(router).await;
        let adapter = Mt5Bridge::new(reqwest::Client::new(), &base);
        let session = Session::new("s-1", &account());

        let err = adapter.fetch_account_state(&session, Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_slow_bridge_is_timeout() {
        let router = Router::new().route("/account", get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            StatusCode::OK
        }));
        let base = spawn_bridge(router).await;
        let adapter = Mt5Bridge::new(reqwest::Client::new(), &base);
        let session = Session::new("s-1", &account());

        let err = adapter.fetch_account_state(&session, Duration::from_millis(100)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}

//! # terminal::mt4
//!
//! **MT4 Bridge Adapter** — legacy bridge ของ MetaTrader 4 (PascalCase fields,
//! token ใน query string, เวลาเป็น server-time string `yyyy.mm.dd hh:mm:ss`)
//!
//! ```text
//! POST /api/v1/login                 {Login, Password, Server} → {Token}
//! GET  /api/v1/account?token=        → {Login, Balance, Equity, Margin, FreeMargin,
//!                                       Profit, Currency, Leverage}
//! GET  /api/v1/history?token=&from=  → {Orders: [{Ticket, Symbol, Type, Lots, OpenTime,
//!                                       CloseTime, OpenPrice, ClosePrice, Profit,
//!                                       Commission, Swap}]}
//! POST /api/v1/logout                {Token}
//! ```
//! `Type`: 0 = OP_BUY, 1 = OP_SELL, 6 = balance. 2–5 (pending ที่ถูก cancel) ข้าม

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::bridge::{normalize_base, send_json, send_unit};
use super::{resolve_credential, Session, TerminalAdapter};
use crate::error::SyncError;
use crate::models::{AccountConfig, AccountSnapshot, Deal, DealSide};

const MT4_TIME_FORMAT: &str = "%Y.%m.%d %H:%M:%S";
/// MT4 ใช้ epoch แทน "ยังไม่ปิด"
const MT4_OPEN_MARKER: &str = "1970.01.01 00:00:00";

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct LoginRequest<'a> {
    login:    &'a str,
    password: &'a str,
    server:   &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccountInfo {
    login:       u64,
    balance:     f64,
    equity:      f64,
    margin:      f64,
    free_margin: f64,
    profit:      f64,
    currency:    String,
    leverage:    u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct History {
    orders: Vec<OrderInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OrderInfo {
    ticket:      u64,
    symbol:      String,
    #[serde(rename = "Type")]
    order_type:  u8,
    lots:        f64,
    open_time:   String,
    close_time:  String,
    open_price:  f64,
    close_price: f64,
    profit:      f64,
    #[serde(default)]
    commission:  f64,
    #[serde(default)]
    swap:        f64,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, SyncError> {
    NaiveDateTime::parse_from_str(raw, MT4_TIME_FORMAT)
        .map(|t| t.and_utc())
        .map_err(|e| SyncError::Protocol(format!("mt4 time '{raw}': {e}")))
}

impl OrderInfo {
    /// `Ok(None)` = order ประเภทที่ไม่ใช่ deal (pending ที่ถูก cancel)
    fn into_deal(self, account_number: &str) -> Result<Option<Deal>, SyncError> {
        let side = match self.order_type {
            0 => DealSide::Buy,
            1 => DealSide::Sell,
            6 => DealSide::Balance,
            2..=5 => {
                debug!(ticket = self.ticket, order_type = self.order_type, "Skipping cancelled pending order");
                return Ok(None);
            }
            other => return Err(SyncError::Protocol(format!("order {}: unknown type {other}", self.ticket))),
        };

        let closed = self.close_time != MT4_OPEN_MARKER;
        Ok(Some(Deal {
            account_number: account_number.to_string(),
            ticket:         self.ticket,
            symbol:         self.symbol,
            side,
            volume:         self.lots,
            open_time:      parse_time(&self.open_time)?,
            close_time:     if closed { Some(parse_time(&self.close_time)?) } else { None },
            open_price:     self.open_price,
            close_price:    closed.then_some(self.close_price),
            profit:         self.profit,
            commission:     self.commission,
            swap:           self.swap,
        }))
    }
}

// ─── Adapter ──────────────────────────────────────────────────────────────────

pub struct Mt4Bridge {
    client:   reqwest::Client,
    base_url: String,
}

impl Mt4Bridge {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self { client, base_url: normalize_base(base_url) }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }
}

#[async_trait]
impl TerminalAdapter for Mt4Bridge {
    fn name(&self) -> &'static str {
        "mt4-bridge"
    }

    async fn login(&self, account: &AccountConfig, timeout: Duration) -> Result<Session, SyncError> {
        let password = resolve_credential(&account.credential_ref)?;
        let body = LoginRequest {
            login:    &account.account_number,
            password: &password,
            server:   &account.server,
        };

        let resp: LoginResponse =
            send_json(self.client.post(self.url("/login")).json(&body), timeout, "mt4 login").await?;

        Ok(Session::new(resp.token, account))
    }

    async fn fetch_account_state(
        &self,
        session: &Session,
        timeout: Duration,
    ) -> Result<AccountSnapshot, SyncError> {
        let info: AccountInfo = send_json(
            self.client.get(self.url(&format!("/account?token={}", session.id))),
            timeout,
            "mt4 account",
        )
        .await?;

        if info.login.to_string() != session.account_number {
            return Err(SyncError::Protocol(format!(
                "mt4 account: bridge reported login {}, expected {}",
                info.login, session.account_number
            )));
        }

        Ok(AccountSnapshot {
            account_number: session.account_number.clone(),
            balance:        info.balance,
            equity:         info.equity,
            margin:         info.margin,
            free_margin:    info.free_margin,
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
        let from = since.format(MT4_TIME_FORMAT).to_string().replace(' ', "%20");
        let history: History = send_json(
            self.client.get(self.url(&format!("/history?token={}&from={from}", session.id))),
            timeout,
            "mt4 history",
        )
        .await?;

        let mut deals = Vec::with_capacity(history.orders.len());
        for order in history.orders {
            if let Some(deal) = order.into_deal(&session.account_number)? {
                deals.push(deal);
            }
        }
        Ok(deals)
    }

    async fn logout(&self, session: &Session, timeout: Duration) -> Result<(), SyncError> {
        send_unit(
            self.client.post(self.url("/logout")).json(&json!({ "Token": session.id })),
            timeout,
            "mt4 logout",
        )
        .await
    }
}

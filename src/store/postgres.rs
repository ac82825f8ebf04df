//! # store::postgres — PostgreSQL backend
//!
//! ใช้ `sqlx` (runtime queries — ไม่ต้องมี DATABASE_URL ตอน compile)
//!
//! ## Setup
//! 1. สร้าง database และตั้ง `DATABASE_URL` ใน `.env`
//! 2. `cargo run --features postgres` — migration `001_init.sql` ถูก apply ตอน startup

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, Executor, PgPool, Row};
use tracing::info;

use super::{Store, StoreError, UpsertOutcome};
use crate::models::{AccountSnapshot, Deal, DealSide};

// ─── Pool Init ────────────────────────────────────────────────────────────────

/// สร้าง PgPool และ run migration
pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    // simple-query protocol → รองรับหลาย statement ในไฟล์เดียว
    pool.execute(include_str!("../../migrations/001_init.sql"))
        .await
        .context("Failed to run migration 001_init.sql")?;

    info!("✅ PostgreSQL connected and migrations applied");
    Ok(pool)
}

fn map_err(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Tls(_) => StoreError::Unavailable(err.to_string()),
        other => StoreError::Query(other.to_string()),
    }
}

fn side_str(side: DealSide) -> &'static str {
    match side {
        DealSide::Buy     => "BUY",
        DealSide::Sell    => "SELL",
        DealSide::Balance => "BALANCE",
    }
}

fn parse_side(raw: &str) -> Result<DealSide, StoreError> {
    match raw {
        "BUY"     => Ok(DealSide::Buy),
        "SELL"    => Ok(DealSide::Sell),
        "BALANCE" => Ok(DealSide::Balance),
        other => Err(StoreError::Query(format!("unknown deal side '{other}'"))),
    }
}

// ─── PgStore ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn snapshot_from_row(row: &sqlx::postgres::PgRow) -> Result<AccountSnapshot, sqlx::Error> {
    Ok(AccountSnapshot {
        account_number: row.try_get("account_number")?,
        balance:        row.try_get("balance")?,
        equity:         row.try_get("equity")?,
        margin:         row.try_get("margin")?,
        free_margin:    row.try_get("free_margin")?,
        profit:         row.try_get("profit")?,
        currency:       row.try_get("currency")?,
        leverage:       row.try_get::<i32, _>("leverage")?.max(0) as u32,
        fund_class:     row.try_get("fund_class")?,
        data_source:    row.try_get("data_source")?,
        updated_at:     row.try_get("updated_at")?,
    })
}

fn deal_from_row(row: &sqlx::postgres::PgRow) -> Result<Deal, StoreError> {
    let side: String = row.try_get("side").map_err(map_err)?;
    Ok(Deal {
        account_number: row.try_get("account_number").map_err(map_err)?,
        ticket:         row.try_get::<i64, _>("ticket").map_err(map_err)? as u64,
        symbol:         row.try_get("symbol").map_err(map_err)?,
        side:           parse_side(&side)?,
        volume:         row.try_get("volume").map_err(map_err)?,
        open_time:      row.try_get("open_time").map_err(map_err)?,
        close_time:     row.try_get("close_time").map_err(map_err)?,
        open_price:     row.try_get("open_price").map_err(map_err)?,
        close_price:    row.try_get("close_price").map_err(map_err)?,
        profit:         row.try_get("profit").map_err(map_err)?,
        commission:     row.try_get("commission").map_err(map_err)?,
        swap:           row.try_get("swap").map_err(map_err)?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_snapshot(&self, mut snapshot: AccountSnapshot) -> Result<AccountSnapshot, StoreError> {
        // GREATEST(...) กัน updated_at ถอยหลังเมื่อ clock ของ host ถูกปรับ
        let row = sqlx::query(
            r#"
            INSERT INTO account_snapshots
              (account_number, balance, equity, margin, free_margin, profit,
               currency, leverage, fund_class, data_source, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (account_number) DO UPDATE SET
              balance     = EXCLUDED.balance,
              equity      = EXCLUDED.equity,
              margin      = EXCLUDED.margin,
              free_margin = EXCLUDED.free_margin,
              profit      = EXCLUDED.profit,
              currency    = EXCLUDED.currency,
              leverage    = EXCLUDED.leverage,
              fund_class  = EXCLUDED.fund_class,
              data_source = EXCLUDED.data_source,
              updated_at  = GREATEST(EXCLUDED.updated_at, account_snapshots.updated_at)
            RETURNING updated_at
            "#,
        )
        .bind(&snapshot.account_number)
        .bind(snapshot.balance)
        .bind(snapshot.equity)
        .bind(snapshot.margin)
        .bind(snapshot.free_margin)
        .bind(snapshot.profit)
        .bind(&snapshot.currency)
        .bind(snapshot.leverage as i32)
        .bind(&snapshot.fund_class)
        .bind(&snapshot.data_source)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;

        snapshot.updated_at = row.try_get::<DateTime<Utc>, _>("updated_at").map_err(map_err)?;
        Ok(snapshot)
    }

    async fn upsert_deal(&self, deal: &Deal) -> Result<UpsertOutcome, StoreError> {
        // WHERE ... IS DISTINCT FROM → ไม่มี row กลับมา = ข้อมูลเดิม ไม่ต้องเขียน
        let row = sqlx::query(
            r#"
            INSERT INTO deals
              (account_number, ticket, symbol, side, volume, open_time, close_time,
               open_price, close_price, profit, commission, swap)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (account_number, ticket) DO UPDATE SET
              volume      = EXCLUDED.volume,
              close_time  = EXCLUDED.close_time,
              close_price = EXCLUDED.close_price,
              profit      = EXCLUDED.profit,
              commission  = EXCLUDED.commission,
              swap        = EXCLUDED.swap
            WHERE (deals.volume, deals.close_time, deals.close_price,
                   deals.profit, deals.commission, deals.swap)
              IS DISTINCT FROM
                  (EXCLUDED.volume, EXCLUDED.close_time, EXCLUDED.close_price,
                   EXCLUDED.profit, EXCLUDED.commission, EXCLUDED.swap)
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&deal.account_number)
        .bind(deal.ticket as i64)
        .bind(&deal.symbol)
        .bind(side_str(deal.side))
        .bind(deal.volume)
        .bind(deal.open_time)
        .bind(deal.close_time)
        .bind(deal.open_price)
        .bind(deal.close_price)
        .bind(deal.profit)
        .bind(deal.commission)
        .bind(deal.swap)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(match row {
            None => UpsertOutcome::Unchanged,
            Some(row) if row.try_get::<bool, _>("inserted").map_err(map_err)? => UpsertOutcome::Inserted,
            Some(_) => UpsertOutcome::Updated,
        })
    }

    async fn snapshot(&self, account_number: &str) -> Result<Option<AccountSnapshot>, StoreError> {
        let row = sqlx::query("SELECT * FROM account_snapshots WHERE account_number = $1")
            .bind(account_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;

        row.as_ref().map(snapshot_from_row).transpose().map_err(map_err)
    }

    async fn snapshots(&self) -> Result<Vec<AccountSnapshot>, StoreError> {
        let rows = sqlx::query("SELECT * FROM account_snapshots ORDER BY account_number")
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;

        rows.iter().map(snapshot_from_row).collect::<Result<_, _>>().map_err(map_err)
    }

    async fn deals(&self, account_number: &str) -> Result<Vec<Deal>, StoreError> {
        let rows = sqlx::query("SELECT * FROM deals WHERE account_number = $1 ORDER BY ticket")
            .bind(account_number)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;

        rows.iter().map(deal_from_row).collect()
    }
}

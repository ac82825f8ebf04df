//! Domain models shared across the sync pipeline.

pub mod account;
pub mod cycle;
pub mod health;

pub use account::{AccountConfig, AccountSnapshot, Deal, DealSide, Freshness, Platform};
pub use cycle::{AccountError, CycleResult, CycleStatus, CycleVerdict, SyncPhase};
pub use health::{AttemptOutcome, HealthState, HealthStatus, RemediationAttempt};

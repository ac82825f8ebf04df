//! # events
//!
//! Defines [`AlertEvent`] — ทุก event ที่ออกจาก process ไปยัง notification sink
//!
//! ```text
//!                        ┌─▶ TracingSink    (structured log)
//!  Health Monitor ──┐    ├─▶ RecentAlerts   (GET /api/alerts)
//!                   ├─▶ AlertBus ─▶ BroadcastSink  (ws /ws/alerts)
//!  Remediation   ───┘    └─▶ WebhookSink    (POST ALERT_WEBHOOK_URL)
//! ```
//!
//! Sink แต่ละตัวถูกเรียกตามลำดับ ภายใต้ timeout ของตัวเอง — sink ที่พัง / ช้า
//! ถูก log แล้วข้ามไป ไม่ block sink ตัวอื่น

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

// ─── AlertEvent ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Degraded,
    Critical,
    Recovered,
    RemediationTriggered,
    RemediationSuppressed,
    RemediationExhausted,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    #[serde(rename = "type")]
    pub kind:      AlertKind,
    pub timestamp: DateTime<Utc>,
    pub details:   serde_json::Value,
}

impl AlertEvent {
    pub fn new(kind: AlertKind, details: serde_json::Value) -> Self {
        Self { kind, timestamp: Utc::now(), details }
    }

    /// แปลงเป็น JSON String สำหรับส่งผ่าน WebSocket / webhook
    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"serialization_error"}"#.to_string())
    }
}

// ─── Sinks ────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait AlertSink: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn deliver(&self, event: &AlertEvent) -> anyhow::Result<()>;
}

/// Log ทุก alert ผ่าน `tracing`
pub struct TracingSink;

#[async_trait]
impl AlertSink for TracingSink {
    fn name(&self) -> &'static str { "tracing" }

    async fn deliver(&self, event: &AlertEvent) -> anyhow::Result<()> {
        match event.kind {
            AlertKind::Critical | AlertKind::RemediationExhausted => {
                error!(alert = ?event.kind, details = %event.details, "🚨 ALERT")
            }
            AlertKind::Recovered => info!(alert = ?event.kind, details = %event.details, "✅ ALERT"),
            _ => warn!(alert = ?event.kind, details = %event.details, "⚠️ ALERT"),
        }
        Ok(())
    }
}

/// เก็บ alert ล่าสุด N ตัวใน memory
pub struct RecentAlerts {
    capacity: usize,
    events:   Mutex<VecDeque<AlertEvent>>,
}

impl RecentAlerts {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, events: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    /// เก่าสุดอยู่หน้า
    pub fn snapshot(&self) -> Vec<AlertEvent> {
        self.events.lock().map(|g| g.iter().cloned().collect()).unwrap_or_default()
    }

    #[cfg(test)]
    pub fn kinds(&self) -> Vec<AlertKind> {
        self.snapshot().into_iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl AlertSink for RecentAlerts {
    fn name(&self) -> &'static str { "recent" }

    async fn deliver(&self, event: &AlertEvent) -> anyhow::Result<()> {
        let mut guard = self
            .events
            .lock()
            .map_err(|_| anyhow::anyhow!("recent alerts lock poisoned"))?;
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(event.clone());
        Ok(())
    }
}

/// Fan-out ไป WebSocket clients (pre-serialized JSON String)
pub struct BroadcastSink {
    tx: broadcast::Sender<String>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl AlertSink for BroadcastSink {
    fn name(&self) -> &'static str { "broadcast" }

    async fn deliver(&self, event: &AlertEvent) -> anyhow::Result<()> {
        // Err = ไม่มี receiver — ไม่ใช่ error จริงๆ
        let _ = self.tx.send(event.to_json());
        Ok(())
    }
}

/// POST alert เป็น JSON ไปยัง webhook ภายนอก
pub struct WebhookSink {
    client: reqwest::Client,
    url:    String,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &'static str { "webhook" }

    async fn deliver(&self, event: &AlertEvent) -> anyhow::Result<()> {
        let resp = self.client.post(&self.url).json(event).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("webhook rejected alert: HTTP {}", resp.status());
        }
        Ok(())
    }
}

// ─── AlertBus ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AlertBus {
    sinks:        Vec<Arc<dyn AlertSink>>,
    sink_timeout: Duration,
}

impl AlertBus {
    pub fn new(sink_timeout: Duration) -> Self {
        Self { sinks: Vec::new(), sink_timeout }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub async fn emit(&self, event: AlertEvent) {
        for sink in &self.sinks {
            match tokio::time::timeout(self.sink_timeout, sink.deliver(&event)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(sink = sink.name(), alert = ?event.kind, error = %e, "Alert sink failed"),
                Err(_) => warn!(sink = sink.name(), alert = ?event.kind, "Alert sink timed out"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct BrokenSink;

    #[async_trait]
    impl AlertSink for BrokenSink {
        fn name(&self) -> &'static str { "broken" }
        async fn deliver(&self, _event: &AlertEvent) -> anyhow::Result<()> {
            anyhow::bail!("sink down")
        }
    }

    struct StuckSink;

    #[async_trait]
    impl AlertSink for StuckSink {
        fn name(&self) -> &'static str { "stuck" }
        async fn deliver(&self, _event: &AlertEvent) -> anyhow::Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_failing_sinks_do_not_block_others() {
        let recent = Arc::new(RecentAlerts::new(10));
        let bus = AlertBus::new(Duration::from_millis(50))
            .with_sink(Arc::new(BrokenSink))
            .with_sink(Arc::new(StuckSink))
            .with_sink(recent.clone());

        bus.emit(AlertEvent::new(AlertKind::Degraded, json!({ "failed": 1 }))).await;
        assert_eq!(recent.kinds(), vec![AlertKind::Degraded]);
    }

    #[tokio::test]
    async fn test_recent_alerts_bounded() {
        let recent = RecentAlerts::new(2);
        for kind in [AlertKind::Degraded, AlertKind::Critical, AlertKind::Recovered] {
            recent.deliver(&AlertEvent::new(kind, json!({}))).await.unwrap();
        }
        assert_eq!(recent.kinds(), vec![AlertKind::Critical, AlertKind::Recovered]);
    }

    #[tokio::test]
    async fn test_broadcast_sink_serializes_type_field() {
        let (tx, mut rx) = broadcast::channel(4);
        BroadcastSink::new(tx)
            .deliver(&AlertEvent::new(AlertKind::RemediationTriggered, json!({ "attempt": 1 })))
            .await
            .unwrap();

        let msg: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["type"], "remediation_triggered");
        assert_eq!(msg["details"]["attempt"], 1);
    }
}

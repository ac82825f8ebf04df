//! # terminal::bridge
//!
//! HTTP plumbing ที่ MT5 / MT4 bridge ใช้ร่วมกัน — แปลง reqwest error /
//! HTTP status ให้เป็น [`SyncError`] ตาม taxonomy:
//!
//! | เหตุการณ์                       | SyncError   |
//! |--------------------------------|-------------|
//! | request timeout / connect fail | `Timeout`   |
//! | HTTP 401 / 403                 | `Auth`      |
//! | HTTP อื่นที่ไม่ใช่ 2xx            | `Protocol`  |
//! | JSON parse ไม่ได้               | `Protocol`  |

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::SyncError;

/// ส่ง request แล้ว parse JSON body เป็น `T`
pub async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    timeout: Duration,
    what:    &str,
) -> Result<T, SyncError> {
    let response = send(request, timeout, what).await?;

    response.json::<T>().await.map_err(|e| {
        warn!(call = what, error = %e, "Bridge response parse failed");
        SyncError::Protocol(format!("{what}: unexpected response body: {e}"))
    })
}

/// ส่ง request, สนใจแค่ status
pub async fn send_unit(request: RequestBuilder, timeout: Duration, what: &str) -> Result<(), SyncError> {
    send(request, timeout, what).await.map(|_| ())
}

async fn send(request: RequestBuilder, timeout: Duration, what: &str) -> Result<reqwest::Response, SyncError> {
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                SyncError::Timeout(format!("{what}: terminal unresponsive: {e}"))
            } else {
                SyncError::Protocol(format!("{what}: request failed: {e}"))
            }
        })?;

    let status = response.status();
    debug!(call = what, http_status = %status, "Bridge responded");

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(SyncError::Auth(format!("{what}: HTTP {status}: {body}")));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SyncError::Protocol(format!("{what}: HTTP {status}: {body}")));
    }

    Ok(response)
}

/// ตัด `/` ท้าย base URL
pub fn normalize_base(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_normalize_base() {
        assert_eq!(normalize_base("http://host:8081/"), "http://host:8081");
        assert_eq!(normalize_base("http://host:8081"), "http://host:8081");
    }

    #[tokio::test]
    async fn test_unreachable_bridge_is_timeout() {
        // port 9 (discard) บน localhost — ไม่มีใครฟัง → connect error
        let client = reqwest::Client::new();
        let err = send_unit(client.get("http://127.0.0.1:9/health"), Duration::from_millis(500), "probe")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}

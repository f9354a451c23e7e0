//! Blocking facade over async reqwest.
//!
//! Requests run on a shared tokio runtime so sequential callers can use
//! a plain synchronous interface.

use std::sync::LazyLock;
use std::time::Duration;

use crate::error::TransportError;

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap_or_else(|e| panic!("failed to build tokio runtime: {e}"))
});

/// Client settings shared by every request of a run
#[derive(Debug, Clone, PartialEq)]
pub struct HttpSettings {
    pub user_agent: String,
    /// Whole-request timeout, body included
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!("pageline/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Build a pooled client from settings.
pub fn build_client(settings: &HttpSettings) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(settings.timeout)
        .connect_timeout(settings.connect_timeout)
        .pool_max_idle_per_host(2)
        .build()
}

/// Status and body of a completed exchange. Any status counts as completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// GET `url` and read the whole body as text.
///
/// Only failures without a status line (timeout, connect, body read)
/// are errors; non-2xx responses come back as `Ok`.
pub fn get_text(client: &reqwest::Client, url: &str) -> Result<HttpReply, TransportError> {
    SHARED_RUNTIME.block_on(async {
        let resp = client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;
        log::trace!("GET {url} -> {status} ({} bytes)", body.len());
        Ok(HttpReply { status, body })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings() {
        let s = HttpSettings::default();
        assert_eq!(s.timeout, Duration::from_secs(60));
        assert!(s.user_agent.starts_with("pageline/"));
    }

    #[test]
    fn client_builds() {
        assert!(build_client(&HttpSettings::default()).is_ok());
    }

    #[test]
    fn reply_success_range() {
        let ok = HttpReply { status: 204, body: String::new() };
        let not_found = HttpReply { status: 404, body: String::new() };
        assert!(ok.is_success());
        assert!(!not_found.is_success());
    }

    #[test]
    fn unreachable_host_is_transport_error() {
        let settings = HttpSettings {
            timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(1),
            ..HttpSettings::default()
        };
        let client = build_client(&settings).unwrap();
        // Port 9 on loopback: discard service, normally closed
        let err = get_text(&client, "http://127.0.0.1:9/").unwrap_err();
        assert!(matches!(
            err,
            TransportError::Connection(_) | TransportError::Timeout(_) | TransportError::Other(_)
        ));
    }
}

//! HTTP Transport for Origin APIs
//!
//! ## Overview
//!
//! Every origin in SeaGuard speaks HTTP+JSON. Adapters do not hold an HTTP
//! client directly; they hold an `Arc<dyn Transport>`, which keeps them
//! testable with canned responses and lets one configured agent (timeouts,
//! user agent, auth) serve several adapters.
//!
//! ## Retry Policy
//!
//! | Outcome               | Retried |
//! |-----------------------|---------|
//! | 5xx                   | yes     |
//! | 429 (rate limited)    | yes     |
//! | transport error       | yes     |
//! | other 4xx             | no      |
//!
//! Delay before attempt `n` is `backoff * 2^n`. The transport is blocking;
//! adapters call it from `spawn_blocking`.
//!
//! ## Authentication
//!
//! Static credentials (basic, bearer, API key) come from [`HttpConfig`].
//! Session tokens obtained at runtime (the mobile-unit login) are passed as
//! per-request headers instead.
//!
//! ## Example Usage
//!
//! ```no_run
//! use seaguard_connectors::http::{HttpConfig, HttpTransport, Transport};
//!
//! let config = HttpConfig::default()
//!     .bearer_token("token-from-env")
//!     .timeout_secs(20)
//!     .max_retries(2);
//! let transport = HttpTransport::new(config);
//! let body = transport.get("https://example.org/api/status", &[])?;
//! # Ok::<(), seaguard_connectors::HttpError>(())
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::FetchStats;

/// HTTP-specific errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HttpError {
    /// Network or request error
    #[error("request failed: {0}")]
    Request(String),

    /// Origin returned an error status
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl HttpError {
    /// Whether the request may succeed if repeated
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::Request(_) => true,
            HttpError::Status { status, .. } => *status >= 500 || *status == 429,
            HttpError::Config(_) => false,
        }
    }
}

/// Authentication methods
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    /// No authentication
    #[default]
    None,
    /// Bearer token
    Bearer { token: String },
    /// Basic authentication
    Basic { username: String, password: String },
    /// API key in header
    ApiKey { header: String, value: String },
}

impl AuthMethod {
    /// Header implementing this method, if any
    pub fn header(&self) -> Option<(String, String)> {
        match self {
            AuthMethod::None => None,
            AuthMethod::Bearer { token } => {
                Some(("Authorization".to_string(), format!("Bearer {token}")))
            }
            AuthMethod::Basic { username, password } => {
                let credentials = STANDARD.encode(format!("{username}:{password}"));
                Some(("Authorization".to_string(), format!("Basic {credentials}")))
            }
            AuthMethod::ApiKey { header, value } => Some((header.clone(), value.clone())),
        }
    }
}

/// HTTP configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Authentication method
    pub auth: AuthMethod,
    /// Custom headers
    pub headers: HashMap<String, String>,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay of the exponential backoff, in milliseconds
    pub backoff_ms: u64,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            auth: AuthMethod::None,
            headers: HashMap::new(),
            max_retries: 3,
            backoff_ms: 100,
            user_agent: format!("SeaGuard/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    /// Set bearer token authentication
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthMethod::Bearer {
            token: token.into(),
        };
        self
    }

    /// Set basic authentication
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = AuthMethod::Basic {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    /// Set API key authentication
    pub fn api_key(mut self, header: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth = AuthMethod::ApiKey {
            header: header.into(),
            value: value.into(),
        };
        self
    }

    /// Set request timeout in seconds
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn backoff_ms(mut self, ms: u64) -> Self {
        self.backoff_ms = ms;
        self
    }

    /// Add custom header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Delay before retry `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}

/// Blocking text transport used by the source adapters
pub trait Transport: Send + Sync {
    /// GET `url`, returning the response body
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<String, HttpError>;

    /// POST a form to `url`, returning the response body
    fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: &[(String, String)],
    ) -> Result<String, HttpError>;
}

/// Production transport using the lightweight ureq client
pub struct HttpTransport {
    config: HttpConfig,
    agent: ureq::Agent,
    stats: Mutex<FetchStats>,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .build();

        Self {
            config,
            agent,
            stats: Mutex::new(FetchStats::default()),
        }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Snapshot of the request counters
    pub fn stats(&self) -> FetchStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn record(&self, update: impl FnOnce(&mut FetchStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    fn check_url(url: &str) -> Result<(), HttpError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            Ok(())
        } else {
            Err(HttpError::Config(format!(
                "URL must start with http:// or https://: {url}"
            )))
        }
    }

    /// Build request with authentication and headers
    fn build_request(&self, mut request: ureq::Request, extra: &[(String, String)]) -> ureq::Request {
        if let Some((name, value)) = self.config.auth.header() {
            request = request.set(&name, &value);
        }
        for (name, value) in &self.config.headers {
            request = request.set(name, value);
        }
        for (name, value) in extra {
            request = request.set(name, value);
        }
        request.set("Accept", "application/json")
    }

    /// Execute with retry logic
    fn execute<F>(&self, url: &str, send: F) -> Result<String, HttpError>
    where
        F: Fn() -> Result<ureq::Response, ureq::Error>,
    {
        Self::check_url(url)?;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                self.record(|s| s.retries += 1);
                std::thread::sleep(self.config.backoff(attempt));
            }

            let error = match send() {
                Ok(response) => {
                    let text = response
                        .into_string()
                        .map_err(|e| HttpError::Request(e.to_string()))?;
                    self.record(|s| {
                        s.requests_ok += 1;
                        s.bytes_received += text.len() as u64;
                    });
                    return Ok(text);
                }
                Err(ureq::Error::Status(status, response)) => HttpError::Status {
                    status,
                    message: response.into_string().unwrap_or_default(),
                },
                Err(ureq::Error::Transport(e)) => HttpError::Request(e.to_string()),
            };

            if !error.is_retryable() {
                self.record(|s| s.requests_failed += 1);
                return Err(error);
            }
            log::debug!("attempt {} for {} failed: {}", attempt + 1, url, error);
            last_error = Some(error);
        }

        // All retries exhausted
        self.record(|s| s.requests_failed += 1);
        Err(last_error.unwrap_or_else(|| HttpError::Request("unknown error".into())))
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<String, HttpError> {
        self.execute(url, || self.build_request(self.agent.get(url), headers).call())
    }

    fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: &[(String, String)],
    ) -> Result<String, HttpError> {
        self.execute(url, || {
            self.build_request(self.agent.post(url), headers)
                .send_form(form)
        })
    }
}

//! Shared JSON-over-HTTP plumbing.
//!
//! Every service speaks the same envelope, `{code, msg, data}`, where a
//! non-zero `code` is an application error. Requests are POSTs with a JSON
//! body; transport failures and the statuses in
//! [`RETRYABLE_STATUSES`](crate::error::RETRYABLE_STATUSES) are retried
//! with a doubling delay capped at `max_delay`.

use std::future::Future;
use std::time::Duration;

use dbha_core::config::{HttpServicesConfig, RetryConfig, TlsConfig};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ClientError;

/// Response envelope shared by all services.
#[derive(Debug, serde::Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    fn into_result<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        if self.code != 0 {
            return Err(ClientError::Application {
                code: self.code,
                msg: self.msg,
            });
        }
        serde_json::from_value(self.data).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Bounded retry with capped doubling delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: cfg.base_delay,
            max_delay: cfg.max_delay,
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently, or runs out of attempts.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(ClientError::RetriesExhausted {
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(%what, attempt, error = %e, ?delay, "service call failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.max_delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// One service endpoint: base URL, shared connection pool, auth, retry.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    retry: RetryPolicy,
}

impl ServiceClient {
    pub fn new(config: &HttpServicesConfig, base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            http: build_http(config)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            retry: RetryPolicy::from(&config.retry),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` to `path` and decode the envelope's `data` as `T`.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let url = url.as_str();
        self.retry.run(path, move || self.post_once(url, body)).await
    }

    async fn post_once<B, T>(&self, url: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.http.post(url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            debug!(%url, status = status.as_u16(), "service returned error status");
            return Err(ClientError::Status(status.as_u16()));
        }
        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        envelope.into_result()
    }
}

fn build_http(config: &HttpServicesConfig) -> Result<reqwest::Client, ClientError> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(config.timeout)
        .connect_timeout(config.timeout);

    if let Some(tls) = &config.tls {
        builder = apply_tls(builder, tls)?;
    }
    builder.build().map_err(|e| ClientError::Build(e.to_string()))
}

fn apply_tls(
    mut builder: reqwest::ClientBuilder,
    tls: &TlsConfig,
) -> Result<reqwest::ClientBuilder, ClientError> {
    if let Some(ca_file) = &tls.ca_file {
        let pem = read_pem(ca_file)?;
        let ca = reqwest::Certificate::from_pem(&pem).map_err(|e| ClientError::Tls(e.to_string()))?;
        builder = builder.add_root_certificate(ca);
    }
    if let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) {
        let mut pem = read_pem(cert_file)?;
        pem.push(b'\n');
        pem.extend(read_pem(key_file)?);
        let identity =
            reqwest::Identity::from_pem(&pem).map_err(|e| ClientError::Tls(e.to_string()))?;
        builder = builder.identity(identity);
    }
    Ok(builder)
}

fn read_pem(path: &std::path::Path) -> Result<Vec<u8>, ClientError> {
    std::fs::read(path).map_err(|e| ClientError::Tls(format!("{}: {e}", path.display())))
}

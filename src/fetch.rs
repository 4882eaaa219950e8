use std::future::Future;
use std::time::Duration;

use anyhow::Context as _;
use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONNECTION, CONTENT_TYPE, HOST, HeaderMap,
    HeaderName, HeaderValue, REFERER, USER_AGENT,
};
use url::Url;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:141.0) Gecko/20100101 Firefox/141.0";

const IMAGE_ACCEPT: &str = "image/png,image/svg+xml,image/*;q=0.8,video/*;q=0.8,*/*;q=0.5";
const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// What a response must look like to count as a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Html,
    Image,
}

/// Transient fetch failures. Every variant is retried by [`RetryPolicy`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request failed")]
    Request(#[from] reqwest::Error),
    #[error("HTTP error: {status}")]
    Status {
        status: reqwest::StatusCode,
        body: Vec<u8>,
    },
    #[error("invalid content type: {}", content_type.as_deref().unwrap_or("<none>"))]
    ContentType {
        content_type: Option<String>,
        body: Vec<u8>,
    },
}

impl FetchError {
    /// Response payload carried by the failure, if the server answered at all.
    pub fn body(&self) -> Option<&[u8]> {
        match self {
            Self::Status { body, .. } | Self::ContentType { body, .. } => Some(body),
            Self::InvalidUrl { .. } | Self::Request(_) => None,
        }
    }
}

/// Terminal failure after the attempt cap was reached.
#[derive(Debug, thiserror::Error)]
#[error("gave up after {attempts} attempts")]
pub struct Exhausted<E>
where
    E: std::error::Error + 'static,
{
    pub attempts: usize,
    #[source]
    pub last: E,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Sleep after the failed attempt `attempt` (0-based): `base * 2^attempt`.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1_u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `op` until it succeeds or the attempt cap is reached. `op` gets
    /// the 0-based attempt number; each call is a fresh attempt.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, Exhausted<E>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(
                        what,
                        attempt = attempt + 1,
                        attempts,
                        error = %error_chain(&err),
                        "attempt failed"
                    );
                    if attempt + 1 >= attempts {
                        return Err(Exhausted {
                            attempts,
                            last: err,
                        });
                    }
                    tokio::time::sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// `outer: inner: innermost`, the same shape anyhow prints with `{:#}`.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub referer: String,
    pub user_agent: String,
    pub extra_headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl FetchConfig {
    pub fn new(referer: impl Into<String>) -> Self {
        Self {
            referer: referer.into(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            extra_headers: Vec::new(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// HTTP GET with a browser-like header set and retry/backoff. Holds no
/// per-call state; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    base_headers: HeaderMap,
    retry: RetryPolicy,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build http client")?;

        let mut base_headers = HeaderMap::new();
        base_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("user agent header")?,
        );
        base_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"));
        base_headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        base_headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        base_headers.insert(
            REFERER,
            HeaderValue::from_str(&config.referer)
                .with_context(|| format!("referer header: {}", config.referer))?,
        );
        for (name, value) in &config.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("header name: {name}"))?;
            let value =
                HeaderValue::from_str(value).with_context(|| format!("header value: {value}"))?;
            base_headers.insert(name, value);
        }

        Ok(Self {
            client,
            base_headers,
            retry: config.retry,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Full header set for one request: the static browser headers plus an
    /// `Accept` for the expected payload and `Host` set to the URL authority.
    pub fn request_headers(&self, url: &Url, expect: Expect) -> Result<HeaderMap, FetchError> {
        let host = url.host_str().ok_or_else(|| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_owned(),
        })?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };

        let mut headers = self.base_headers.clone();
        headers.insert(
            HOST,
            HeaderValue::from_str(&authority).map_err(|err| FetchError::InvalidUrl {
                url: url.to_string(),
                reason: err.to_string(),
            })?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(match expect {
                Expect::Html => HTML_ACCEPT,
                Expect::Image => IMAGE_ACCEPT,
            }),
        );
        Ok(headers)
    }

    /// One GET attempt, no retries.
    pub async fn fetch_once(&self, url: &Url, expect: Expect) -> Result<Vec<u8>, FetchError> {
        let headers = self.request_headers(url, expect)?;
        let response = self
            .client
            .get(url.clone())
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await?.to_vec();

        if !status.is_success() {
            return Err(FetchError::Status { status, body });
        }
        if expect == Expect::Image
            && !content_type
                .as_deref()
                .is_some_and(|ct| ct.to_ascii_lowercase().contains("image"))
        {
            return Err(FetchError::ContentType { content_type, body });
        }

        Ok(body)
    }

    /// GET with retry/backoff; used for metadata pages.
    pub async fn fetch(&self, url: &str, expect: Expect) -> anyhow::Result<Vec<u8>> {
        let parsed = parse_url(url)?;
        let body = self
            .retry
            .run(url, |_| self.fetch_once(&parsed, expect))
            .await
            .with_context(|| format!("GET {url}"))?;
        Ok(body)
    }
}

pub fn parse_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|err| FetchError::InvalidUrl {
        url: url.to_owned(),
        reason: err.to_string(),
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(FetchError::InvalidUrl {
            url: url.to_owned(),
            reason: "scheme must be http/https".to_owned(),
        });
    }
    Ok(parsed)
}

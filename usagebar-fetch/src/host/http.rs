//! HTTP client with tracing, status mapping and a domain allowlist.
//!
//! Every request decodes JSON and maps HTTP failures onto [`HttpError`]:
//! 401/403 become [`HttpError::Unauthorized`] so probes can report
//! "login required" instead of a generic network failure.

use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::HttpError;

/// Default request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User agent string.
const USER_AGENT: &str = concat!("usagebar/", env!("CARGO_PKG_VERSION"));

/// Longest body excerpt kept in error messages.
const ERROR_BODY_LIMIT: usize = 200;

// ============================================================================
// Request Auth
// ============================================================================

/// Credentials attached to a request.
#[derive(Clone, Default)]
pub enum RequestAuth {
    /// No credentials.
    #[default]
    None,
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// `Cookie: <header>`.
    Cookies(String),
}

impl std::fmt::Debug for RequestAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bearer(token) => write!(f, "Bearer(<{} bytes>)", token.len()),
            Self::Cookies(cookies) => write!(f, "Cookies(<{} bytes>)", cookies.len()),
        }
    }
}

// ============================================================================
// HTTP Client
// ============================================================================

/// HTTP client wrapper with tracing and an optional domain allowlist.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    timeout: Duration,
    allowed_domains: Option<Vec<String>>,
}

impl HttpClient {
    /// Creates a client with the default timeout.
    ///
    /// # Errors
    ///
    /// Fails when the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Fails when the TLS backend cannot be initialized.
    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
        let inner = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            inner,
            timeout,
            allowed_domains: None,
        })
    }

    /// Restricts requests to the given domains and their subdomains.
    pub fn with_allowed_domains(mut self, domains: Vec<String>) -> Self {
        self.allowed_domains = Some(domains);
        self
    }

    /// Returns the configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn check_domain(&self, url: &str) -> Result<(), HttpError> {
        let Some(ref allowed) = self.allowed_domains else {
            return Ok(());
        };

        let parsed = Url::parse(url).map_err(|e| HttpError::InvalidUrl(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| HttpError::InvalidUrl("No host in URL".to_string()))?;

        let allowed = allowed
            .iter()
            .any(|domain| host == domain || host.ends_with(&format!(".{domain}")));

        if allowed {
            Ok(())
        } else {
            Err(HttpError::DomainNotAllowed(host.to_string()))
        }
    }

    /// GET a JSON document.
    #[instrument(skip(self, auth), fields(url = %url))]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        auth: &RequestAuth,
    ) -> Result<T, HttpError> {
        self.get_json_with_headers(url, auth, HeaderMap::new()).await
    }

    /// GET a JSON document with extra headers.
    #[instrument(skip(self, auth, headers), fields(url = %url))]
    pub async fn get_json_with_headers<T: DeserializeOwned>(
        &self,
        url: &str,
        auth: &RequestAuth,
        headers: HeaderMap,
    ) -> Result<T, HttpError> {
        self.check_domain(url)?;
        debug!("GET request");
        let request = self.inner.get(url).headers(headers);
        self.send_json(apply_auth(request, auth)?).await
    }

    /// POST a JSON body and decode a JSON response.
    #[instrument(skip(self, auth, body), fields(url = %url))]
    pub async fn post_json<B, T>(&self, url: &str, auth: &RequestAuth, body: &B) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.check_domain(url)?;
        debug!("POST request with JSON");
        let request = self.inner.post(url).json(body);
        self.send_json(apply_auth(request, auth)?).await
    }

    /// POST a form body and decode a JSON response.
    #[instrument(skip(self, form), fields(url = %url))]
    pub async fn post_form<F, T>(&self, url: &str, form: &F) -> Result<T, HttpError>
    where
        F: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.check_domain(url)?;
        debug!("POST request with form data");
        self.send_json(self.inner.post(url).form(form)).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, HttpError> {
        let response = request.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        debug!(status = %status, "Response received");

        let body = response.text().await.map_err(|e| self.map_error(e))?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(HttpError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            warn!(status = %status, "Request failed");
            return Err(HttpError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| HttpError::Decode(e.to_string()))
    }

    fn map_error(&self, err: reqwest::Error) -> HttpError {
        if err.is_timeout() {
            HttpError::Timeout(self.timeout)
        } else {
            HttpError::Request(err)
        }
    }
}

fn apply_auth(request: RequestBuilder, auth: &RequestAuth) -> Result<RequestBuilder, HttpError> {
    Ok(match auth {
        RequestAuth::None => request,
        RequestAuth::Bearer(token) => {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| HttpError::InvalidUrl(format!("invalid bearer token: {e}")))?;
            request.header(header::AUTHORIZATION, value)
        }
        RequestAuth::Cookies(cookies) => {
            let value = HeaderValue::from_str(cookies)
                .map_err(|e| HttpError::InvalidUrl(format!("invalid cookie header: {e}")))?;
            request.header(header::COOKIE, value)
        }
    })
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

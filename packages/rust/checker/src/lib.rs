//! Link liveness checking.
//!
//! A [`LinkChecker`] sends one lightweight `HEAD` request per URL, follows
//! redirects, and classifies the result: any final status in `[200, 400)` is
//! valid, everything else (other statuses, timeouts, network failures,
//! blocked destinations) is invalid with a status label for the audit trail.

use std::fmt;
use std::net::IpAddr;

use reqwest::{Client, Method, StatusCode};
use tracing::{debug, instrument, warn};
use url::Url;

use roadmend_shared::{CheckConfig, Result, RoadmendError};

// ---------------------------------------------------------------------------
// Check results
// ---------------------------------------------------------------------------

/// Category of a request that failed before producing a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestErrorKind {
    Connect,
    Redirect,
    InvalidUrl,
    Request,
    Body,
    Other,
}

impl RequestErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "Connect",
            Self::Redirect => "Redirect",
            Self::InvalidUrl => "InvalidUrl",
            Self::Request => "Request",
            Self::Body => "Body",
            Self::Other => "Other",
        }
    }

    fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_connect() {
            Self::Connect
        } else if e.is_redirect() {
            Self::Redirect
        } else if e.is_builder() {
            Self::InvalidUrl
        } else if e.is_request() {
            Self::Request
        } else if e.is_body() || e.is_decode() {
            Self::Body
        } else {
            Self::Other
        }
    }
}

/// What a probe observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Final HTTP status after redirects.
    Http(u16),
    Timeout,
    /// Not probed: private/loopback destination or non-http(s) scheme.
    Blocked,
    RequestError(RequestErrorKind),
}

impl CheckStatus {
    /// Only a final status in `[200, 400)` counts as reachable.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Http(code) if (200..400).contains(code))
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(code) => write!(f, "{code}"),
            Self::Timeout => f.write_str("Timeout"),
            Self::Blocked => f.write_str("Blocked (private address)"),
            Self::RequestError(kind) => write!(f, "Request Error ({})", kind.as_str()),
        }
    }
}

/// Outcome of checking one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCheck {
    pub url: String,
    pub status: CheckStatus,
}

impl LinkCheck {
    pub fn is_valid(&self) -> bool {
        self.status.is_valid()
    }

    /// Label stored in the audit ledger (`"404"`, `"Timeout"`, ...).
    pub fn status_label(&self) -> String {
        self.status.to_string()
    }
}

// ---------------------------------------------------------------------------
// Checker
// ---------------------------------------------------------------------------

/// HTTP liveness prober. Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct LinkChecker {
    client: Client,
    config: CheckConfig,
}

impl LinkChecker {
    /// Create a checker with the given configuration.
    pub fn new(config: CheckConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .timeout(config.timeout)
            .build()
            .map_err(|e| RoadmendError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Pause to apply between two consecutive checks.
    pub fn delay(&self) -> std::time::Duration {
        self.config.delay
    }

    /// Probe one URL. Never fails: every problem becomes an invalid status.
    #[instrument(skip(self))]
    pub async fn check(&self, url: &str) -> LinkCheck {
        let status = self.probe(url).await;
        if status.is_valid() {
            debug!(%status, "link valid");
        } else {
            warn!(%status, "link invalid");
        }
        LinkCheck {
            url: url.to_string(),
            status,
        }
    }

    async fn probe(&self, url: &str) -> CheckStatus {
        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(_) => return CheckStatus::RequestError(RequestErrorKind::InvalidUrl),
        };

        if !self.config.allow_private_hosts && is_ssrf_target(&parsed) {
            return CheckStatus::Blocked;
        }

        let status = match self.send(Method::HEAD, &parsed).await {
            Ok(code) => code,
            Err(status) => return status,
        };

        if self.config.fallback_get_on_405
            && matches!(
                status,
                StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
            )
        {
            debug!(%url, "HEAD rejected, retrying with GET");
            return match self.send(Method::GET, &parsed).await {
                Ok(code) => CheckStatus::Http(code.as_u16()),
                Err(status) => status,
            };
        }

        CheckStatus::Http(status.as_u16())
    }

    /// Send one request and return the final status. The body is never read.
    async fn send(&self, method: Method, url: &Url) -> std::result::Result<StatusCode, CheckStatus> {
        match self.client.request(method, url.as_str()).send().await {
            Ok(response) => Ok(response.status()),
            Err(e) if e.is_timeout() => Err(CheckStatus::Timeout),
            Err(e) => {
                debug!(%url, error = %e, "request failed");
                Err(CheckStatus::RequestError(RequestErrorKind::from_reqwest(&e)))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    // Block non-HTTP schemes
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

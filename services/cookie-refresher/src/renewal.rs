//! Renewal client
//!
//! Presents a stored cookie to the authenticated landing page and classifies
//! the response into an [`Outcome`]. Network failures are reported as
//! [`RenewalError`] and never as an invalid credential.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{InvalidReason, Outcome};
use reqwest::header::{CONTENT_LOCATION, COOKIE, HeaderMap, LINK, SET_COOKIE, USER_AGENT};
use reqwest::{StatusCode, redirect};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::config::RefresherConfig;
use crate::cookie;

/// Transient renewal failures; the credential is left untouched
#[derive(Error, Debug)]
pub enum RenewalError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("service unavailable: status {0}")]
    Unavailable(u16),
}

impl From<reqwest::Error> for RenewalError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            RenewalError::Timeout
        } else if error.is_connect() {
            RenewalError::Connect(error)
        } else {
            RenewalError::Request(error)
        }
    }
}

/// Something able to renew one cookie
#[async_trait]
pub trait Renewer: Send + Sync + 'static {
    /// Renew `cookie`, owned by `group`
    async fn renew(&self, group: &str, cookie: &str) -> Result<Outcome, RenewalError>;
}

/// HTTP client renewing cookies against the landing page
#[derive(Clone)]
pub struct RenewalClient {
    client: reqwest::Client,
    landing_url: Url,
    user_agent: String,
}

impl RenewalClient {
    /// Create a new client; redirects are not followed so that login
    /// challenges stay visible
    pub fn new(config: &RefresherConfig) -> anyhow::Result<Self> {
        let landing_url = Url::parse(&config.landing_url)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            landing_url,
            user_agent: config.user_agent.clone(),
        })
    }

    pub fn landing_url(&self) -> &Url {
        &self.landing_url
    }
}

#[async_trait]
impl Renewer for RenewalClient {
    async fn renew(&self, group: &str, cookie: &str) -> Result<Outcome, RenewalError> {
        info!("[{}] Requesting new cookie", group);

        let response = self
            .client
            .get(self.landing_url.clone())
            .header(COOKIE, cookie)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?;

        let outcome = classify(
            response.status(),
            response.headers(),
            self.landing_url.as_str(),
            cookie,
            Utc::now(),
        )?;

        match &outcome {
            Outcome::Renewed { expires, .. } => {
                info!("[{}] New cookie received, expires {:?}", group, expires)
            }
            Outcome::Invalid(reason) => info!("[{}] Cookie rejected: {}", group, reason),
            Outcome::NoChange => debug!("[{}] No cookie in response", group),
        }

        Ok(outcome)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: reqwest::header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Classify a landing page response for the cookie that was sent
pub fn classify(
    status: StatusCode,
    headers: &HeaderMap,
    expected_location: &str,
    sent_cookie: &str,
    now: DateTime<Utc>,
) -> Result<Outcome, RenewalError> {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(RenewalError::Unavailable(status.as_u16()));
    }
    if status != StatusCode::OK {
        return Ok(Outcome::Invalid(InvalidReason::Status(status.as_u16())));
    }

    let location = header_str(headers, CONTENT_LOCATION);
    let expected = expected_location.trim_end_matches('/');
    if location.map(|l| l.trim_end_matches('/')) != Some(expected) {
        return Ok(Outcome::Invalid(InvalidReason::Location(
            location.map(str::to_string),
        )));
    }

    if let Some(link) = headers.get(LINK) {
        let link = link.to_str().unwrap_or("<non-ascii link>");
        return Ok(Outcome::Invalid(InvalidReason::LoginRedirect(
            link.to_string(),
        )));
    }

    let set_cookie_values: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    if set_cookie_values.is_empty() {
        return Ok(Outcome::NoChange);
    }

    let set_cookie = cookie::parse_set_cookie_headers(set_cookie_values, now);
    let base = cookie::parse(sent_cookie);
    let merged = cookie::merge(&base, &set_cookie.directives);

    Ok(Outcome::Renewed {
        value: cookie::serialize(&merged),
        expires: set_cookie.expires_for(&base, now),
    })
}

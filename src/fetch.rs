//! Upstream fetch coordination
//!
//! `HttpUpstream` issues the actual conditional GET against the road
//! authority's DATEX II endpoint; `FetchCoordinator` wraps any `Upstream` and
//! enforces the local backoff interval so bursts of inbound requests cannot
//! hammer the feed. Exactly one upstream call per `fetch` invocation, no
//! internal retries.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Minimum spacing between consecutive upstream calls
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// Default timeout for the upstream request
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from a fetch attempt
#[derive(Debug, Error)]
pub enum FetchError {
    /// The local backoff interval has not elapsed; upstream was not contacted
    #[error("upstream fetch rate-limited by local backoff")]
    RateLimited,

    /// Network failure, timeout, or an upstream 429
    #[error("upstream unavailable: {detail}")]
    UpstreamUnavailable { detail: String },

    /// Upstream answered with an unexpected status
    #[error("upstream returned status {status}")]
    UpstreamStatus { status: u16 },
}

/// Successful outcome of an upstream call
#[derive(Debug)]
pub enum FetchOutcome {
    /// A fresh document, with the modification timestamp the feed reported
    Fresh {
        body: String,
        last_modified: Option<DateTime<Utc>>,
    },
    /// Upstream confirmed nothing changed since our last fetch
    NotModified,
}

/// Seam between the pipeline and the actual HTTP call, so the pipeline can be
/// exercised against canned documents in tests
pub trait Upstream {
    /// Issues one conditional request against the feed
    fn fetch(
        &self,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<FetchOutcome, FetchError>> + Send;
}

/// Real upstream over reqwest with basic auth and a mandatory timeout
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    url: String,
    username: String,
    password: String,
}

impl HttpUpstream {
    /// Builds the upstream client
    ///
    /// Fails only if the TLS backend cannot be initialized, which is a startup
    /// error, not a request-time one.
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::UpstreamUnavailable {
                detail: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            url: url.into(),
            username: username.into(),
            password: password.into(),
        })
    }
}

impl Upstream for HttpUpstream {
    async fn fetch(
        &self,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, FetchError> {
        let mut request = self
            .client
            .get(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, "application/xml, text/xml, */*")
            .header(CONTENT_TYPE, "application/xml");

        if let Some(ts) = if_modified_since {
            request = request.header(IF_MODIFIED_SINCE, format_http_date(ts));
        }

        let response = request.send().await.map_err(|e| {
            // reqwest errors never carry the basic-auth credentials
            let detail = if e.is_timeout() {
                "request timed out".to_string()
            } else {
                format!("transport error: {e}")
            };
            FetchError::UpstreamUnavailable { detail }
        })?;

        match response.status() {
            StatusCode::OK => {
                let last_modified = response
                    .headers()
                    .get(LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_http_date);
                let body = response
                    .text()
                    .await
                    .map_err(|e| FetchError::UpstreamUnavailable {
                        detail: format!("failed to read response body: {e}"),
                    })?;
                Ok(FetchOutcome::Fresh {
                    body,
                    last_modified,
                })
            }
            StatusCode::NOT_MODIFIED => Ok(FetchOutcome::NotModified),
            StatusCode::TOO_MANY_REQUESTS => Err(FetchError::UpstreamUnavailable {
                detail: "upstream rate limit (429)".to_string(),
            }),
            status => Err(FetchError::UpstreamStatus {
                status: status.as_u16(),
            }),
        }
    }
}

/// Formats an instant as an HTTP date for the If-Modified-Since header
pub fn format_http_date(ts: DateTime<Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses a Last-Modified header value
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Governs upstream calls: backoff-gated, one call per invocation
pub struct FetchCoordinator<S> {
    upstream: S,
    backoff: Duration,
    last_call_at: Mutex<Option<Instant>>,
}

impl<S: Upstream> FetchCoordinator<S> {
    pub fn new(upstream: S, backoff: Duration) -> Self {
        Self {
            upstream,
            backoff,
            last_call_at: Mutex::new(None),
        }
    }

    /// Attempts one upstream fetch
    ///
    /// Returns `FetchError::RateLimited` without contacting upstream when the
    /// previous call was less than the backoff interval ago. The call stamp is
    /// taken before the request goes out, so a slow upstream still counts
    /// against the interval.
    pub async fn fetch(
        &self,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, FetchError> {
        {
            let mut last = self.last_call_at.lock().await;
            let now = Instant::now();
            if let Some(prev) = *last {
                if now.duration_since(prev) < self.backoff {
                    warn!(
                        backoff_secs = self.backoff.as_secs_f64(),
                        "fetch suppressed by local backoff"
                    );
                    return Err(FetchError::RateLimited);
                }
            }
            *last = Some(now);
        }

        info!("fetching travel-time snapshot from upstream");
        let started = Instant::now();
        let result = self.upstream.fetch(if_modified_since).await;
        let elapsed_ms = started.elapsed().as_millis();

        match &result {
            Ok(FetchOutcome::Fresh { body, .. }) => {
                info!(elapsed_ms, bytes = body.len(), "fresh snapshot fetched");
            }
            Ok(FetchOutcome::NotModified) => {
                debug!(elapsed_ms, "upstream reports not modified");
            }
            Err(e) => {
                warn!(elapsed_ms, error = %e, "upstream fetch failed");
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Upstream stub that counts calls and returns a canned outcome
    struct CountingUpstream {
        calls: AtomicUsize,
    }

    impl CountingUpstream {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Upstream for CountingUpstream {
        async fn fetch(
            &self,
            _if_modified_since: Option<DateTime<Utc>>,
        ) -> Result<FetchOutcome, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchOutcome::Fresh {
                body: "<doc/>".to_string(),
                last_modified: None,
            })
        }
    }

    #[tokio::test]
    async fn test_second_call_within_backoff_is_rate_limited() {
        let coordinator = FetchCoordinator::new(CountingUpstream::new(), Duration::from_secs(5));

        let first = coordinator.fetch(None).await;
        assert!(matches!(first, Ok(FetchOutcome::Fresh { .. })));

        let second = coordinator.fetch(None).await;
        assert!(matches!(second, Err(FetchError::RateLimited)));

        // The rate-limited attempt must not have reached upstream
        assert_eq!(coordinator.upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_calls_spaced_beyond_backoff_both_go_through() {
        let coordinator = FetchCoordinator::new(CountingUpstream::new(), Duration::from_millis(10));

        coordinator.fetch(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.fetch(None).await.unwrap();

        assert_eq!(coordinator.upstream.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_call_still_counts_against_backoff() {
        struct FailingUpstream;
        impl Upstream for FailingUpstream {
            async fn fetch(
                &self,
                _ims: Option<DateTime<Utc>>,
            ) -> Result<FetchOutcome, FetchError> {
                Err(FetchError::UpstreamStatus { status: 503 })
            }
        }

        let coordinator = FetchCoordinator::new(FailingUpstream, Duration::from_secs(5));

        let first = coordinator.fetch(None).await;
        assert!(matches!(first, Err(FetchError::UpstreamStatus { status: 503 })));

        let second = coordinator.fetch(None).await;
        assert!(matches!(second, Err(FetchError::RateLimited)));
    }

    #[test]
    fn test_http_date_round_trip() {
        let ts = parse_http_date("Tue, 15 Nov 1994 08:12:31 GMT").unwrap();
        assert_eq!(format_http_date(ts), "Tue, 15 Nov 1994 08:12:31 GMT");
    }

    #[test]
    fn test_unparseable_http_date_is_none() {
        assert!(parse_http_date("yesterday-ish").is_none());
    }
}

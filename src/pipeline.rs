//! Request pipeline
//!
//! `TravelTimeService` owns all process-wide state: the fetch coordinator, the
//! result cache, the disk mirror, and the upstream's last-modification
//! timestamp. One instance is constructed at startup and shared behind an
//! `Arc` by every request handler.
//!
//! Per request: if the freshness gate holds, the cached table is served;
//! otherwise the snapshot is fetched, parsed, aggregated, and cached. Fetches
//! are serialized so concurrent requests that all observe a stale cache
//! produce one upstream call; the rest wait and pick up the fresh entry.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::aggregate::{aggregate_stretches, StretchResult};
use crate::cache::{CacheEntry, ResultCache};
use crate::config::Config;
use crate::datex::extract_measurements;
use crate::fetch::{FetchCoordinator, FetchError, FetchOutcome, HttpUpstream, Upstream};
use crate::freshness::{age_minutes, cache_is_valid};
use crate::mirror::DiskMirror;
use crate::stretch::{interest_set, StretchDefinition};

/// Terminal failure surfaced to clients
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No fetch succeeded and no cached table exists to fall back on
    #[error("no travel-time data available")]
    NoData,
}

/// One response worth of aggregated data
#[derive(Debug, Clone)]
pub struct TravelData {
    /// Aggregated table, in stretch-definition order
    pub results: Vec<StretchResult>,
    /// Upstream modification timestamp the table derives from
    pub last_modified: Option<DateTime<Utc>>,
    /// Whether the table came from the cache rather than a fresh fetch
    pub from_cache: bool,
}

/// Tuning knobs for the pipeline, split out so tests can shrink them
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub staleness_window: chrono::Duration,
    pub backoff: Duration,
    pub cache_ttl: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            staleness_window: crate::freshness::default_staleness_window(),
            backoff: crate::fetch::DEFAULT_BACKOFF,
            cache_ttl: crate::cache::DEFAULT_TTL,
        }
    }
}

/// The fetch/parse/aggregate/cache pipeline
pub struct TravelTimeService<S> {
    coordinator: FetchCoordinator<S>,
    cache: ResultCache,
    mirror: Option<DiskMirror>,
    stretches: Vec<StretchDefinition>,
    interest: HashSet<String>,
    staleness_window: chrono::Duration,
    cache_ttl: Duration,
    last_upstream_modified: RwLock<Option<DateTime<Utc>>>,
    /// Serializes the fetch-and-refill path; requests that only need cached
    /// data never touch this
    fetch_gate: Mutex<()>,
}

impl TravelTimeService<HttpUpstream> {
    /// Builds the production pipeline from resolved configuration
    pub fn from_config(
        config: &Config,
        stretches: Vec<StretchDefinition>,
    ) -> Result<Self, FetchError> {
        let upstream = HttpUpstream::new(
            config.api_url.clone(),
            config.api_username.clone(),
            config.api_password.clone(),
            config.upstream_timeout,
        )?;
        let mirror = match &config.mirror_dir {
            Some(dir) => Some(DiskMirror::with_dir(dir.clone())),
            None => DiskMirror::new(),
        };
        Ok(Self::new(
            upstream,
            stretches,
            mirror,
            PipelineOptions {
                staleness_window: config.staleness_window(),
                backoff: config.backoff,
                cache_ttl: config.cache_ttl,
            },
        ))
    }
}

impl<S: Upstream> TravelTimeService<S> {
    pub fn new(
        upstream: S,
        stretches: Vec<StretchDefinition>,
        mirror: Option<DiskMirror>,
        options: PipelineOptions,
    ) -> Self {
        let interest = interest_set(&stretches);
        Self {
            coordinator: FetchCoordinator::new(upstream, options.backoff),
            cache: ResultCache::new(),
            mirror,
            stretches,
            interest,
            staleness_window: options.staleness_window,
            cache_ttl: options.cache_ttl,
            last_upstream_modified: RwLock::new(None),
            fetch_gate: Mutex::new(()),
        }
    }

    /// Age of the upstream data in whole minutes, for debug output
    pub async fn data_age_minutes(&self) -> Option<i64> {
        age_minutes(*self.last_upstream_modified.read().await, Utc::now())
    }

    /// Returns the freshest available aggregated table
    ///
    /// Never panics; every upstream or parse failure degrades to the best
    /// cached data available, and only when there is none does the caller see
    /// `ServiceError::NoData`.
    pub async fn get_travel_data(&self) -> Result<TravelData, ServiceError> {
        if let Some(data) = self.cached_if_fresh().await {
            info!("serving cached table within staleness window");
            return Ok(data);
        }

        // One fetch in flight at a time. Whoever waited here re-checks the
        // cache first: the previous holder usually refilled it.
        let _gate = self.fetch_gate.lock().await;
        if let Some(data) = self.cached_if_fresh().await {
            info!("cache refreshed while waiting on fetch gate");
            return Ok(data);
        }

        let if_modified_since = *self.last_upstream_modified.read().await;
        match self.coordinator.fetch(if_modified_since).await {
            Ok(FetchOutcome::Fresh {
                body,
                last_modified,
            }) => match self.process_snapshot(&body, last_modified).await {
                Ok(results) => Ok(TravelData {
                    results,
                    last_modified,
                    from_cache: false,
                }),
                Err(e) => {
                    warn!(error = %e, "snapshot rejected, falling back to cache");
                    self.live_cache_fallback().await
                }
            },
            Ok(FetchOutcome::NotModified) | Err(FetchError::RateLimited) => {
                // Upstream has nothing newer (or we are not allowed to ask
                // yet): any existing entry is the best we can do, even one
                // past its TTL
                self.any_cache_fallback().await
            }
            Err(e) => {
                warn!(error = %e, "upstream fetch failed, falling back to cache");
                self.live_cache_fallback().await
            }
        }
    }

    /// Cache hit while the freshness gate still holds
    async fn cached_if_fresh(&self) -> Option<TravelData> {
        let last_modified = *self.last_upstream_modified.read().await;
        if !cache_is_valid(last_modified, Utc::now(), self.staleness_window) {
            return None;
        }
        let entry = self.cache.get().await?;
        Some(cached(entry))
    }

    /// Parses, aggregates, mirrors, and stores one snapshot; the modification
    /// timestamp is updated only after the whole cycle succeeded
    async fn process_snapshot(
        &self,
        body: &str,
        last_modified: Option<DateTime<Utc>>,
    ) -> Result<Vec<StretchResult>, crate::datex::ParseError> {
        let measurements = extract_measurements(body, &self.interest)?;
        let results = aggregate_stretches(&measurements, &self.stretches);
        info!(
            segments = measurements.len(),
            stretches = results.len(),
            "aggregated fresh snapshot"
        );

        if let Some(mirror) = &self.mirror {
            mirror.write_raw_document(body);
            mirror.write_measurements(&measurements);
            mirror.write_result_table(&results);
        }

        self.cache
            .put(CacheEntry::new(
                results.clone(),
                last_modified,
                self.cache_ttl,
            ))
            .await;
        *self.last_upstream_modified.write().await = last_modified;

        Ok(results)
    }

    async fn live_cache_fallback(&self) -> Result<TravelData, ServiceError> {
        match self.cache.get().await {
            Some(entry) => Ok(cached(entry)),
            None => Err(ServiceError::NoData),
        }
    }

    async fn any_cache_fallback(&self) -> Result<TravelData, ServiceError> {
        match self.cache.get_even_expired().await {
            Some(entry) => Ok(cached(entry)),
            None => Err(ServiceError::NoData),
        }
    }
}

fn cached(entry: CacheEntry) -> TravelData {
    TravelData {
        last_modified: entry.last_modified,
        results: entry.results,
        from_cache: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::format_http_date;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SNAPSHOT: &str = "<?xml version=\"1.0\"?><ns2:messageContainer><ns2:payload>\
        <ns10:physicalQuantity>\
            <ns10:pertinentLocation><ns8:predefinedLocationReference id=\"100153\"/></ns10:pertinentLocation>\
            <ns10:basicData>\
                <ns10:travelTime><ns10:duration>109.0</ns10:duration></ns10:travelTime>\
                <ns10:freeFlowTravelTime><ns10:duration>120.0</ns10:duration></ns10:freeFlowTravelTime>\
            </ns10:basicData>\
        </ns10:physicalQuantity>\
        <ns10:physicalQuantity>\
            <ns10:pertinentLocation><ns8:predefinedLocationReference id=\"100156\"/></ns10:pertinentLocation>\
            <ns10:basicData>\
                <ns10:travelTime><ns10:duration>129.0</ns10:duration></ns10:travelTime>\
                <ns10:freeFlowTravelTime><ns10:duration>120.0</ns10:duration></ns10:freeFlowTravelTime>\
            </ns10:basicData>\
        </ns10:physicalQuantity>\
        </ns2:payload></ns2:messageContainer>";

    fn stretches() -> Vec<StretchDefinition> {
        vec![StretchDefinition {
            name: "Straume - Lyderhorntunnelen".to_string(),
            segment_ids: vec!["100153".to_string(), "100156".to_string()],
        }]
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            backoff: Duration::ZERO,
            ..PipelineOptions::default()
        }
    }

    /// Upstream stub serving a fixed snapshot with a recent Last-Modified
    struct SnapshotUpstream {
        calls: Arc<AtomicUsize>,
    }

    impl Upstream for SnapshotUpstream {
        async fn fetch(
            &self,
            _ims: Option<DateTime<Utc>>,
        ) -> Result<FetchOutcome, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Round-trip through the header format like the real client does
            let last_modified = crate::fetch::parse_http_date(&format_http_date(Utc::now()));
            Ok(FetchOutcome::Fresh {
                body: SNAPSHOT.to_string(),
                last_modified,
            })
        }
    }

    #[tokio::test]
    async fn test_first_request_fetches_second_hits_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = TravelTimeService::new(
            SnapshotUpstream {
                calls: calls.clone(),
            },
            stretches(),
            None,
            options(),
        );

        let first = service.get_travel_data().await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.results.len(), 1);
        assert_eq!(first.results[0].time_now_seconds, 238);
        assert_eq!(first.results[0].time_normal_seconds, 240);

        let second = service.get_travel_data().await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.results, first.results);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_modified_serves_existing_cache() {
        struct SequencedUpstream {
            calls: AtomicUsize,
        }
        impl Upstream for SequencedUpstream {
            async fn fetch(
                &self,
                _ims: Option<DateTime<Utc>>,
            ) -> Result<FetchOutcome, FetchError> {
                match self.calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Ok(FetchOutcome::Fresh {
                        // Old enough that the freshness gate won't short-circuit
                        body: SNAPSHOT.to_string(),
                        last_modified: Some(Utc::now() - chrono::Duration::minutes(10)),
                    }),
                    _ => Ok(FetchOutcome::NotModified),
                }
            }
        }

        let service = TravelTimeService::new(
            SequencedUpstream {
                calls: AtomicUsize::new(0),
            },
            stretches(),
            None,
            options(),
        );

        let first = service.get_travel_data().await.unwrap();
        assert!(!first.from_cache);

        let second = service.get_travel_data().await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.results, first.results);
    }

    #[tokio::test]
    async fn test_no_data_when_upstream_down_and_cache_empty() {
        struct DownUpstream;
        impl Upstream for DownUpstream {
            async fn fetch(
                &self,
                _ims: Option<DateTime<Utc>>,
            ) -> Result<FetchOutcome, FetchError> {
                Err(FetchError::UpstreamUnavailable {
                    detail: "connection refused".to_string(),
                })
            }
        }

        let service = TravelTimeService::new(DownUpstream, stretches(), None, options());

        let result = service.get_travel_data().await;
        assert!(matches!(result, Err(ServiceError::NoData)));
    }

    #[tokio::test]
    async fn test_parse_failure_degrades_to_cached_table() {
        struct FlakyUpstream {
            calls: AtomicUsize,
        }
        impl Upstream for FlakyUpstream {
            async fn fetch(
                &self,
                _ims: Option<DateTime<Utc>>,
            ) -> Result<FetchOutcome, FetchError> {
                match self.calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Ok(FetchOutcome::Fresh {
                        body: SNAPSHOT.to_string(),
                        last_modified: Some(Utc::now() - chrono::Duration::minutes(10)),
                    }),
                    _ => Ok(FetchOutcome::Fresh {
                        body: "<html>maintenance page</html>".to_string(),
                        last_modified: None,
                    }),
                }
            }
        }

        let service = TravelTimeService::new(
            FlakyUpstream {
                calls: AtomicUsize::new(0),
            },
            stretches(),
            None,
            options(),
        );

        let first = service.get_travel_data().await.unwrap();
        assert!(!first.from_cache);

        let second = service.get_travel_data().await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.results, first.results);
    }

    #[tokio::test]
    async fn test_rate_limited_with_empty_cache_is_no_data() {
        struct Down {
            calls: Arc<AtomicUsize>,
        }
        impl Upstream for Down {
            async fn fetch(
                &self,
                _ims: Option<DateTime<Utc>>,
            ) -> Result<FetchOutcome, FetchError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::UpstreamStatus { status: 503 })
            }
        }

        // Default 5 s backoff: the second call is suppressed locally
        let calls = Arc::new(AtomicUsize::new(0));
        let service = TravelTimeService::new(
            Down {
                calls: calls.clone(),
            },
            stretches(),
            None,
            PipelineOptions::default(),
        );

        let first = service.get_travel_data().await;
        assert!(matches!(first, Err(ServiceError::NoData)));

        let second = service.get_travel_data().await;
        assert!(matches!(second, Err(ServiceError::NoData)));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_trigger_one_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = Arc::new(TravelTimeService::new(
            SnapshotUpstream {
                calls: calls.clone(),
            },
            stretches(),
            None,
            options(),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            handles.push(tokio::spawn(
                async move { service.get_travel_data().await },
            ));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

//! Fetch & cache coordinator.
//!
//! Wraps a [`ConfigStore`] with a time-bounded cache and collapses concurrent
//! fetches for the same service/environment into a single store query.
//!
//! Positive results (including "not found") are cached for the configured
//! expiration. Failures are never cached: every waiter of the failed query gets
//! the error and the next call queries the store again.
//!
//! The store query runs on its own task. A caller that is cancelled or gives up
//! waiting does not affect the query or the other callers joined to it.

use crate::metrics_defs::{CACHE_HIT, CACHE_MISS, FETCH_DURATION, FETCH_ERRORS, FETCH_JOINED};
use crate::store::{ConfigStore, FetchError};
use crate::types::{CacheKey, FetchResult, Query};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Source of agent configuration.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, query: &Query) -> Result<FetchResult, FetchError>;
}

/// Fetcher used when no configuration store is configured.
pub struct DisabledFetcher;

#[async_trait]
impl Fetcher for DisabledFetcher {
    async fn fetch(&self, _query: &Query) -> Result<FetchResult, FetchError> {
        Err(FetchError::StoreDisabled)
    }
}

// Single-assignment slot: `None` until the store query completes.
type Outcome = Option<Result<FetchResult, FetchError>>;

struct CacheEntry {
    result: FetchResult,
    fetched_at: Instant,
}

enum Lookup {
    Fresh(FetchResult),
    Pending(watch::Receiver<Outcome>),
}

/// Caches store results per service/environment and shares in-flight queries.
#[derive(Clone)]
pub struct CachingFetcher {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn ConfigStore>,
    expiration: Duration,
    cache: RwLock<HashMap<CacheKey, CacheEntry>>,
    in_flight: Mutex<HashMap<CacheKey, watch::Receiver<Outcome>>>,
}

impl CachingFetcher {
    pub fn new(store: Arc<dyn ConfigStore>, expiration: Duration) -> Self {
        CachingFetcher {
            inner: Arc::new(Inner {
                store,
                expiration,
                cache: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }
}

#[async_trait]
impl Fetcher for CachingFetcher {
    async fn fetch(&self, query: &Query) -> Result<FetchResult, FetchError> {
        let key = query.cache_key();

        if let Some(result) = self.inner.fresh(&key) {
            counter!(CACHE_HIT).increment(1);
            return Ok(result);
        }

        let mut receiver = match self.inner.lookup_or_start(&key) {
            Lookup::Fresh(result) => return Ok(result),
            Lookup::Pending(receiver) => receiver,
        };

        let outcome: Outcome = match receiver.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        };

        // The sender only goes away without a value if the query task died.
        outcome.unwrap_or_else(|| {
            Err(FetchError::Unreachable(
                "configuration query was aborted".to_string(),
            ))
        })
    }
}

impl Inner {
    fn fresh(&self, key: &CacheKey) -> Option<FetchResult> {
        let cache = self.cache.read();
        cache
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < self.expiration)
            .map(|entry| entry.result.clone())
    }

    /// Joins the query in flight for `key`, or starts one.
    ///
    /// The cache is checked again under the in-flight lock: a query that
    /// completed since the first check has already stored its result and
    /// removed its marker.
    fn lookup_or_start(self: &Arc<Self>, key: &CacheKey) -> Lookup {
        let mut in_flight = self.in_flight.lock();

        if let Some(result) = self.fresh(key) {
            counter!(CACHE_HIT).increment(1);
            return Lookup::Fresh(result);
        }

        if let Some(receiver) = in_flight.get(key) {
            // A closed channel means the query task died before reporting.
            if receiver.has_changed().is_ok() {
                counter!(FETCH_JOINED).increment(1);
                return Lookup::Pending(receiver.clone());
            }
        }

        counter!(CACHE_MISS).increment(1);
        let (sender, receiver) = watch::channel(None);
        in_flight.insert(key.clone(), receiver.clone());

        let inner = Arc::clone(self);
        let key = key.clone();
        tokio::spawn(async move { inner.run_query(key, sender).await });

        Lookup::Pending(receiver)
    }

    async fn run_query(self: Arc<Self>, key: CacheKey, sender: watch::Sender<Outcome>) {
        let started = Instant::now();
        let service = &key.0;

        let outcome = self
            .store
            .query(service)
            .await
            .map(|document| document.map_or_else(FetchResult::not_found, FetchResult::from));
        histogram!(FETCH_DURATION).record(started.elapsed().as_secs_f64());

        match &outcome {
            Ok(result) => {
                if result.is_not_found() {
                    tracing::debug!(service.name = %service.name, "no configuration document found");
                }
                self.cache.write().insert(
                    key.clone(),
                    CacheEntry {
                        result: result.clone(),
                        fetched_at: Instant::now(),
                    },
                );
            }
            Err(err) => {
                counter!(FETCH_ERRORS, "reason" => err.generic_message()).increment(1);
                tracing::warn!(
                    service.name = %service.name,
                    service.environment = service.environment.as_deref().unwrap_or_default(),
                    error = %err,
                    "failed to fetch agent configuration"
                );
            }
        }

        self.in_flight.lock().remove(&key);
        sender.send_replace(Some(outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ETAG_SENTINEL, Service, Settings, StoreDocument};
    use shared::testutils::TestRecorder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;

    struct MockStore {
        calls: AtomicUsize,
        delay: Duration,
        response: Mutex<Result<Option<StoreDocument>, FetchError>>,
        queried: Mutex<Vec<Service>>,
    }

    impl MockStore {
        fn new(response: Result<Option<StoreDocument>, FetchError>) -> Arc<Self> {
            Self::with_delay(response, Duration::ZERO)
        }

        fn with_delay(
            response: Result<Option<StoreDocument>, FetchError>,
            delay: Duration,
        ) -> Arc<Self> {
            Arc::new(MockStore {
                calls: AtomicUsize::new(0),
                delay,
                response: Mutex::new(response),
                queried: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn respond_with(&self, response: Result<Option<StoreDocument>, FetchError>) {
            *self.response.lock() = response;
        }
    }

    #[async_trait]
    impl ConfigStore for MockStore {
        async fn query(&self, service: &Service) -> Result<Option<StoreDocument>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queried.lock().push(service.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.response.lock().clone()
        }
    }

    fn document(etag: &str) -> StoreDocument {
        StoreDocument {
            settings: Settings::from([("sampling_rate".to_string(), "0.5".to_string())]),
            etag: etag.to_string(),
            agent_name: None,
        }
    }

    fn query(name: &str, environment: Option<&str>) -> Query {
        Query {
            service: Service::new(name, environment.map(str::to_string)),
            agent_name: None,
            etag: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_within_expiration() {
        let store = MockStore::new(Ok(Some(document("1"))));
        let fetcher = CachingFetcher::new(store.clone(), Duration::from_secs(4));

        let first = fetcher.fetch(&query("opbeans", None)).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        let second = fetcher.fetch(&query("opbeans", None)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.etag, "1");
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_after_expiration() {
        let store = MockStore::new(Ok(Some(document("1"))));
        let fetcher = CachingFetcher::new(store.clone(), Duration::from_secs(4));

        fetcher.fetch(&query("opbeans", None)).await.unwrap();
        store.respond_with(Ok(Some(document("2"))));
        tokio::time::advance(Duration::from_secs(4)).await;

        let refreshed = fetcher.fetch(&query("opbeans", None)).await.unwrap();
        assert_eq!(refreshed.etag, "2");
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetches_share_one_query() {
        let store = MockStore::with_delay(Ok(Some(document("1"))), Duration::from_millis(50));
        let fetcher = CachingFetcher::new(store.clone(), Duration::from_secs(30));

        let mut join_set = JoinSet::new();
        for _ in 0..20 {
            let fetcher = fetcher.clone();
            join_set.spawn(async move { fetcher.fetch(&query("opbeans", Some("prod"))).await });
        }

        while let Some(result) = join_set.join_next().await {
            assert_eq!(result.unwrap().unwrap().etag, "1");
        }
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_expiration_still_collapses() {
        let store = MockStore::with_delay(Ok(Some(document("1"))), Duration::from_millis(50));
        let fetcher = CachingFetcher::new(store.clone(), Duration::ZERO);

        // Sequential calls always go to the store.
        fetcher.fetch(&query("opbeans", None)).await.unwrap();
        fetcher.fetch(&query("opbeans", None)).await.unwrap();
        assert_eq!(store.calls(), 2);

        // Overlapping calls share one query.
        let mut join_set = JoinSet::new();
        for _ in 0..5 {
            let fetcher = fetcher.clone();
            join_set.spawn(async move { fetcher.fetch(&query("opbeans", None)).await });
        }
        while let Some(result) = join_set.join_next().await {
            assert!(result.unwrap().is_ok());
        }
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_metrics() {
        let recorder = TestRecorder::default();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let store = MockStore::with_delay(Ok(Some(document("1"))), Duration::from_millis(50));
        let fetcher = CachingFetcher::new(store.clone(), Duration::from_secs(30));

        let mut join_set = JoinSet::new();
        for _ in 0..10 {
            let fetcher = fetcher.clone();
            join_set.spawn(async move { fetcher.fetch(&query("opbeans", None)).await });
        }
        while let Some(result) = join_set.join_next().await {
            assert!(result.unwrap().is_ok());
        }
        fetcher.fetch(&query("opbeans", None)).await.unwrap();

        // Only the caller that started the query counts as a miss.
        assert_eq!(recorder.value(CACHE_MISS.name), 1.0);
        assert_eq!(recorder.value(FETCH_JOINED.name), 9.0);
        assert_eq!(recorder.value(CACHE_HIT.name), 1.0);
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_cached_as_sentinel() {
        let store = MockStore::new(Ok(None));
        let fetcher = CachingFetcher::new(store.clone(), Duration::from_secs(30));

        let result = fetcher.fetch(&query("opbeans", None)).await.unwrap();
        assert_eq!(result.etag, ETAG_SENTINEL);
        assert!(result.settings.is_empty());
        assert!(result.is_not_found());

        fetcher.fetch(&query("opbeans", None)).await.unwrap();
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let store = MockStore::new(Err(FetchError::Unreachable("connection refused".into())));
        let fetcher = CachingFetcher::new(store.clone(), Duration::from_secs(30));

        let err = fetcher.fetch(&query("opbeans", None)).await.unwrap_err();
        assert_eq!(err, FetchError::Unreachable("connection refused".into()));

        store.respond_with(Ok(Some(document("1"))));
        let result = fetcher.fetch(&query("opbeans", None)).await.unwrap();
        assert_eq!(result.etag, "1");
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_delivered_to_all_waiters() {
        let store = MockStore::with_delay(
            Err(FetchError::SendFailed("testerror".into())),
            Duration::from_millis(50),
        );
        let fetcher = CachingFetcher::new(store.clone(), Duration::from_secs(30));

        let mut join_set = JoinSet::new();
        for _ in 0..5 {
            let fetcher = fetcher.clone();
            join_set.spawn(async move { fetcher.fetch(&query("opbeans", None)).await });
        }
        while let Some(result) = join_set.join_next().await {
            assert_eq!(
                result.unwrap(),
                Err(FetchError::SendFailed("testerror".into()))
            );
        }
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_timeout_does_not_cancel_query() {
        let store = MockStore::with_delay(Ok(Some(document("1"))), Duration::from_millis(100));
        let fetcher = CachingFetcher::new(store.clone(), Duration::from_secs(30));

        let patient = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move { fetcher.fetch(&query("opbeans", None)).await })
        };

        let impatient = tokio::time::timeout(
            Duration::from_millis(10),
            fetcher.fetch(&query("opbeans", None)),
        )
        .await;
        assert!(impatient.is_err());

        assert_eq!(patient.await.unwrap().unwrap().etag, "1");
        assert_eq!(store.calls(), 1);

        // The completed query populated the cache.
        fetcher.fetch(&query("opbeans", None)).await.unwrap();
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_initiator_does_not_cancel_query() {
        let store = MockStore::with_delay(Ok(Some(document("1"))), Duration::from_millis(100));
        let fetcher = CachingFetcher::new(store.clone(), Duration::from_secs(30));

        let initiator = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move { fetcher.fetch(&query("opbeans", None)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        initiator.abort();

        let result = fetcher.fetch(&query("opbeans", None)).await.unwrap();
        assert_eq!(result.etag, "1");
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_key_is_service_and_environment() {
        let store = MockStore::new(Ok(Some(document("1"))));
        let fetcher = CachingFetcher::new(store.clone(), Duration::from_secs(30));

        let mut with_agent = query("opbeans", Some("prod"));
        with_agent.agent_name = Some("java".into());
        with_agent.etag = Some("1".into());

        fetcher.fetch(&query("opbeans", Some("prod"))).await.unwrap();
        fetcher.fetch(&with_agent).await.unwrap();
        assert_eq!(store.calls(), 1);

        fetcher.fetch(&query("opbeans", Some("staging"))).await.unwrap();
        fetcher.fetch(&query("opbeans", None)).await.unwrap();
        fetcher.fetch(&query("other", Some("prod"))).await.unwrap();
        assert_eq!(store.calls(), 4);

        let queried = store.queried.lock();
        assert_eq!(queried[1], Service::new("opbeans", Some("staging".into())));
        assert_eq!(queried[2], Service::new("opbeans", None));
    }

    #[tokio::test]
    async fn test_disabled_fetcher() {
        let err = DisabledFetcher
            .fetch(&query("opbeans", None))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::StoreDisabled);
        assert_eq!(err.to_string(), "no connection to configuration store");
    }
}

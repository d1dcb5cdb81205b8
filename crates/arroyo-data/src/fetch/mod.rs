//! Fetch orchestration
//!
//! At most one request is outstanding per distinct [`QueryDescriptor`].
//! Every caller asking for a descriptor that is already being fetched
//! joins the outstanding request and observes the same outcome.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use arroyo_core::{ConjunctionSource, QueryDescriptor, ResponsePage, SourceError};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error};

use crate::cache::{EvictionPolicy, LeastRecentlyFetched, ResultCache};
use crate::config::FetchConfig;

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<ResponsePage>, SourceError>>>;

/// What the display should show for one descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum PageState {
    /// Nothing requested yet
    Idle,
    /// A request is outstanding and there is nothing to show meanwhile
    Loading,
    /// A page inside its freshness window
    Fresh(Arc<ResponsePage>),
    /// An expired page; a refetch has been triggered
    Stale(Arc<ResponsePage>),
    /// The last request failed; the previous page, if any, stays visible
    Errored {
        page: Option<Arc<ResponsePage>>,
        message: String,
    },
}

impl PageState {
    /// The page that can be displayed, if any
    pub fn page(&self) -> Option<&Arc<ResponsePage>> {
        match self {
            PageState::Fresh(page) | PageState::Stale(page) => Some(page),
            PageState::Errored { page, .. } => page.as_ref(),
            PageState::Idle | PageState::Loading => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, PageState::Loading)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            PageState::Errored { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Last failure per descriptor, bounded like the cache
struct ErrorLog {
    errors: AHashMap<QueryDescriptor, (SourceError, Instant)>,
    max_entries: usize,
}

impl ErrorLog {
    fn new(max_entries: usize) -> Self {
        Self {
            errors: AHashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    fn get(&self, descriptor: &QueryDescriptor) -> Option<&SourceError> {
        self.errors.get(descriptor).map(|(error, _)| error)
    }

    fn record(&mut self, descriptor: QueryDescriptor, error: SourceError) {
        if !self.errors.contains_key(&descriptor) && self.errors.len() >= self.max_entries {
            let excess = self.errors.len() + 1 - self.max_entries;
            let candidates: Vec<_> = self
                .errors
                .iter()
                .map(|(d, (_, failed_at))| (d.clone(), *failed_at))
                .collect();
            for victim in LeastRecentlyFetched.entries_to_evict(&candidates, excess) {
                self.errors.remove(&victim);
            }
        }
        self.errors.insert(descriptor, (error, Instant::now()));
    }

    fn clear(&mut self, descriptor: &QueryDescriptor) {
        self.errors.remove(descriptor);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.errors.len()
    }
}

struct Inner {
    source: Arc<dyn ConjunctionSource>,
    cache: ResultCache,
    in_flight: Mutex<AHashMap<QueryDescriptor, SharedFetch>>,
    errors: RwLock<ErrorLog>,
    freshness: Duration,
}

/// Resolves descriptors to pages through the cache and the source
#[derive(Clone)]
pub struct FetchOrchestrator {
    inner: Arc<Inner>,
}

impl FetchOrchestrator {
    pub fn new(source: Arc<dyn ConjunctionSource>, config: &FetchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                cache: ResultCache::new(config.max_entries),
                in_flight: Mutex::new(AHashMap::new()),
                errors: RwLock::new(ErrorLog::new(config.max_entries)),
                freshness: config.freshness,
            }),
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    pub fn source_name(&self) -> &str {
        self.inner.source.source_name()
    }

    /// Resolve a descriptor honouring the freshness window
    ///
    /// A fresh entry is returned without a request. An expired entry is
    /// returned immediately while a background refetch runs. Only a miss
    /// waits for the source.
    pub async fn resolve(&self, descriptor: &QueryDescriptor) -> PageState {
        if let Some(entry) = self.inner.cache.get(descriptor) {
            if entry.is_fresh(self.inner.freshness) {
                debug!("Cache hit for page at offset {}", descriptor.offset);
                return self.with_recorded_error(descriptor, PageState::Fresh(entry.response));
            }

            debug!(
                "Serving expired page at offset {} ({:?} old), revalidating",
                descriptor.offset,
                entry.age()
            );
            // The request is driven by its own task.
            let _ = self.fetch_shared(descriptor);
            return self.with_recorded_error(descriptor, PageState::Stale(entry.response));
        }

        self.await_fetch(descriptor).await
    }

    /// Fetch a descriptor ignoring the freshness window
    ///
    /// Joins a request for the same descriptor that is already outstanding.
    pub async fn refresh(&self, descriptor: &QueryDescriptor) -> PageState {
        debug!("Forced refresh of page at offset {}", descriptor.offset);
        self.await_fetch(descriptor).await
    }

    /// Current state of a descriptor without triggering any request
    pub fn status(&self, descriptor: &QueryDescriptor) -> PageState {
        match self.inner.cache.get(descriptor) {
            Some(entry) => {
                let state = if entry.is_fresh(self.inner.freshness) {
                    PageState::Fresh(entry.response)
                } else {
                    PageState::Stale(entry.response)
                };
                self.with_recorded_error(descriptor, state)
            }
            None if self.is_in_flight(descriptor) => PageState::Loading,
            None => match self.inner.errors.read().get(descriptor) {
                Some(error) => PageState::Errored {
                    page: None,
                    message: error.to_string(),
                },
                None => PageState::Idle,
            },
        }
    }

    pub fn is_in_flight(&self, descriptor: &QueryDescriptor) -> bool {
        self.inner.in_flight.lock().contains_key(descriptor)
    }

    async fn await_fetch(&self, descriptor: &QueryDescriptor) -> PageState {
        match self.fetch_shared(descriptor).await {
            Ok(page) => PageState::Fresh(page),
            Err(error) => PageState::Errored {
                page: self.inner.cache.get(descriptor).map(|entry| entry.response),
                message: error.to_string(),
            },
        }
    }

    fn with_recorded_error(&self, descriptor: &QueryDescriptor, state: PageState) -> PageState {
        match self.inner.errors.read().get(descriptor) {
            Some(error) => PageState::Errored {
                page: state.page().cloned(),
                message: error.to_string(),
            },
            None => state,
        }
    }

    /// The outstanding request for a descriptor, started if there is none
    ///
    /// Each request runs on its own task so it completes, and its result is
    /// cached, even when every caller has stopped waiting.
    fn fetch_shared(&self, descriptor: &QueryDescriptor) -> SharedFetch {
        let mut in_flight = self.inner.in_flight.lock();
        if let Some(outstanding) = in_flight.get(descriptor) {
            debug!("Joining outstanding request for offset {}", descriptor.offset);
            return outstanding.clone();
        }

        let inner = self.inner.clone();
        let key = descriptor.clone();
        let fetch = async move {
            debug!(
                "Requesting {} rows at offset {} from {}",
                key.limit,
                key.offset,
                inner.source.source_name()
            );

            let outcome = match inner.source.fetch_page(&key).await {
                Ok(page) => {
                    let page = Arc::new(page);
                    inner.cache.put(key.clone(), page.clone());
                    inner.errors.write().clear(&key);
                    Ok(page)
                }
                Err(e) => {
                    error!(
                        "Fetch of page at offset {} from {} failed: {}",
                        key.offset,
                        inner.source.source_name(),
                        e
                    );
                    inner.errors.write().record(key.clone(), e.clone());
                    Err(e)
                }
            };

            inner.in_flight.lock().remove(&key);
            outcome
        }
        .boxed()
        .shared();

        in_flight.insert(descriptor.clone(), fetch.clone());
        drop(in_flight);

        tokio::spawn(fetch.clone());
        fetch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arroyo_core::{Pagination, TableState, VariantConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts requests, answers after a delay, fails on demand
    struct MockSource {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
    }

    impl MockSource {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConjunctionSource for MockSource {
        async fn fetch_page(&self, query: &QueryDescriptor) -> Result<ResponsePage, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(SourceError::Rejected {
                    status: 500,
                    message: Some("database unavailable".to_string()),
                });
            }
            // Encode the call number in the total so tests can tell pages apart.
            Ok(ResponsePage::new(Vec::new(), query.offset as u64 * 1000 + call))
        }

        fn source_name(&self) -> &str {
            "mock"
        }
    }

    fn descriptor(page_index: usize) -> QueryDescriptor {
        let mut state = TableState::new(&VariantConfig::public());
        state.pagination = Pagination::new(page_index, 25);
        QueryDescriptor::build(&state)
    }

    fn orchestrator(source: Arc<MockSource>) -> FetchOrchestrator {
        FetchOrchestrator::new(source, &FetchConfig::default())
    }

    fn total(state: &PageState) -> u64 {
        state.page().map(|page| page.total_row_count).unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_within_freshness_window() {
        let source = MockSource::new(Duration::from_millis(50));
        let fetcher = orchestrator(source.clone());

        let first = fetcher.resolve(&descriptor(0)).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = fetcher.resolve(&descriptor(0)).await;

        assert_eq!(source.calls(), 1);
        assert!(matches!(second, PageState::Fresh(_)));
        assert_eq!(total(&first), total(&second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_resolves_share_one_request() {
        let source = MockSource::new(Duration::from_millis(100));
        let fetcher = orchestrator(source.clone());
        let d = descriptor(1);

        let (a, b) = tokio::join!(fetcher.resolve(&d), fetcher.resolve(&d));

        assert_eq!(source.calls(), 1);
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(a.page().unwrap(), b.page().unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_descriptors_fetch_independently() {
        let source = MockSource::new(Duration::from_millis(100));
        let fetcher = orchestrator(source.clone());

        let first = descriptor(0);
        let second = descriptor(1);
        let (a, b) = tokio::join!(fetcher.resolve(&first), fetcher.resolve(&second));

        assert_eq!(source.calls(), 2);
        assert_ne!(total(&a), total(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_while_revalidate() {
        let source = MockSource::new(Duration::from_millis(100));
        let fetcher = orchestrator(source.clone());
        let d = descriptor(0);

        let first = fetcher.resolve(&d).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        // Both calls return the expired page at once; only one refetch starts.
        let stale = fetcher.resolve(&d).await;
        let again = fetcher.resolve(&d).await;
        assert!(matches!(stale, PageState::Stale(_)));
        assert!(matches!(again, PageState::Stale(_)));
        assert_eq!(total(&stale), total(&first));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(source.calls(), 2);

        let refreshed = fetcher.resolve(&d).await;
        assert!(matches!(refreshed, PageState::Fresh(_)));
        assert_ne!(total(&refreshed), total(&first));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_bypasses_freshness_window() {
        let source = MockSource::new(Duration::from_millis(10));
        let fetcher = orchestrator(source.clone());
        let d = descriptor(0);

        let first = fetcher.resolve(&d).await;
        let refreshed = fetcher.refresh(&d).await;

        assert_eq!(source.calls(), 2);
        assert_ne!(total(&first), total(&refreshed));
        assert_eq!(
            fetcher.cache().get(&d).unwrap().response.total_row_count,
            total(&refreshed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_joins_outstanding_request() {
        let source = MockSource::new(Duration::from_millis(100));
        let fetcher = orchestrator(source.clone());
        let d = descriptor(0);

        let (resolved, refreshed) = tokio::join!(fetcher.resolve(&d), fetcher.refresh(&d));

        assert_eq!(source.calls(), 1);
        assert_eq!(resolved, refreshed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_previous_page() {
        let source = MockSource::new(Duration::from_millis(10));
        let fetcher = orchestrator(source.clone());
        let d = descriptor(0);
        let other = descriptor(1);

        let first = fetcher.resolve(&d).await;
        fetcher.resolve(&other).await;

        source.fail.store(true, Ordering::SeqCst);
        let failed = fetcher.refresh(&d).await;

        match &failed {
            PageState::Errored { page, message } => {
                assert_eq!(page.as_ref().map(|p| p.total_row_count), Some(total(&first)));
                assert!(message.contains("database unavailable"));
            }
            other => panic!("expected an error state, got {other:?}"),
        }

        // The error stays attached to the cached page until the next success.
        assert!(fetcher.resolve(&d).await.error().is_some());
        // Other descriptors are untouched.
        assert!(matches!(fetcher.resolve(&other).await, PageState::Fresh(_)));

        source.fail.store(false, Ordering::SeqCst);
        let recovered = fetcher.refresh(&d).await;
        assert!(matches!(recovered, PageState::Fresh(_)));
        assert!(fetcher.status(&d).error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_revalidation_keeps_stale_page() {
        let source = MockSource::new(Duration::from_millis(10));
        let fetcher = orchestrator(source.clone());
        let d = descriptor(0);

        let first = fetcher.resolve(&d).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        source.fail.store(true, Ordering::SeqCst);

        assert!(matches!(fetcher.resolve(&d).await, PageState::Stale(_)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = fetcher.status(&d);
        assert!(status.error().is_some());
        assert_eq!(total(&status), total(&first));
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_failure_has_no_page() {
        let source = MockSource::new(Duration::from_millis(10));
        source.fail.store(true, Ordering::SeqCst);
        let fetcher = orchestrator(source.clone());
        let d = descriptor(2);

        let state = fetcher.resolve(&d).await;

        assert!(state.page().is_none());
        assert!(state.error().is_some());
        assert!(fetcher.cache().is_empty());
        // No automatic retry.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remembered_errors_are_bounded() {
        let source = MockSource::new(Duration::from_millis(1));
        source.fail.store(true, Ordering::SeqCst);
        let config = FetchConfig {
            max_entries: 2,
            ..FetchConfig::default()
        };
        let fetcher = FetchOrchestrator::new(source.clone(), &config);

        for page_index in 0..100 {
            let d = descriptor(page_index);
            fetcher.resolve(&d).await;
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        assert_eq!(source.calls(), 100);
        assert_eq!(fetcher.inner.errors.read().len(), 2);
        // The most recent failures are the ones kept.
        assert!(fetcher.status(&descriptor(99)).error().is_some());
        assert!(fetcher.status(&descriptor(98)).error().is_some());
        assert_eq!(fetcher.status(&descriptor(0)), PageState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_loading() {
        let source = MockSource::new(Duration::from_millis(100));
        let fetcher = orchestrator(source.clone());
        let d = descriptor(0);

        assert_eq!(fetcher.status(&d), PageState::Idle);

        let background = fetcher.clone();
        let key = d.clone();
        let handle = tokio::spawn(async move { background.resolve(&key).await });
        tokio::task::yield_now().await;

        assert!(fetcher.status(&d).is_loading());
        handle.await.unwrap();
        assert!(matches!(fetcher.status(&d), PageState::Fresh(_)));
        assert!(!fetcher.is_in_flight(&d));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_still_cached() {
        let source = MockSource::new(Duration::from_millis(100));
        let fetcher = orchestrator(source.clone());
        let d = descriptor(0);

        let waiting = fetcher.resolve(&d);
        let _ = tokio::time::timeout(Duration::from_millis(10), waiting).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(fetcher.cache().get(&d).is_some());
        assert_eq!(source.calls(), 1);
    }
}

use crate::discovery::{ProviderMetadata, ProviderMetadataDiscoveryOptions};
use crate::helpers::error_chain;
use crate::AsyncHttpClient;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
mod tests;

/// How long a fetched key set is served before the next call refreshes it.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);
/// Maximum age of a key set served while the provider is unreachable.
pub const DEFAULT_MAX_STALENESS: Duration = Duration::from_secs(48 * 60 * 60);
/// Upper bound on one refresh (discovery document and key set together).
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Minimum time between two forced refreshes.
pub const DEFAULT_MIN_FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Time after a failed refresh during which callers get the stale snapshot (or the failure)
/// instead of another fetch.
pub const DEFAULT_MIN_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Error obtaining the provider's signing keys.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum KeySourceError {
    /// Fetching or parsing the discovery document or key set failed.
    #[error("Failed to fetch signing keys: {0}")]
    Discovery(String),
    /// The refresh did not complete within the fetch timeout.
    #[error("Timed out fetching signing keys after {0:?}")]
    Timeout(Duration),
}

#[derive(Clone)]
struct CachedMetadata {
    metadata: Arc<ProviderMetadata>,
    fetched_at: DateTime<Utc>,
}

struct FailedRefresh {
    at: DateTime<Utc>,
    error: KeySourceError,
}

#[derive(Default)]
struct RefreshState {
    last_failure: Option<FailedRefresh>,
    last_forced_refresh: Option<DateTime<Utc>>,
}

/// Caches the provider metadata and signing keys published at an authority's discovery
/// endpoint.
///
/// Readers share the cached snapshot; at most one refresh is in flight at a time and a snapshot
/// is only ever replaced by a complete one.
pub struct SigningKeySource<C> {
    authority: url::Url,
    http_client: C,
    discovery_options: ProviderMetadataDiscoveryOptions,
    refresh_interval: Duration,
    max_staleness: Duration,
    fetch_timeout: Duration,
    min_forced_refresh_interval: Duration,
    min_retry_interval: Duration,
    time_fn: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    cache: RwLock<Option<CachedMetadata>>,
    // Incremented after every fetch, so callers queued on `refresh_lock` can tell that an
    // attempt completed while they waited.
    refresh_attempts: AtomicU64,
    refresh_lock: Mutex<RefreshState>,
}
impl<C> SigningKeySource<C>
where
    C: for<'c> AsyncHttpClient<'c>,
{
    /// Creates an empty key source. Nothing is fetched until the first call to
    /// [`current_keys`](Self::current_keys).
    pub fn new(authority: url::Url, http_client: C) -> Self {
        Self {
            authority,
            http_client,
            discovery_options: ProviderMetadataDiscoveryOptions::default(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            max_staleness: DEFAULT_MAX_STALENESS,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            min_forced_refresh_interval: DEFAULT_MIN_FORCED_REFRESH_INTERVAL,
            min_retry_interval: DEFAULT_MIN_RETRY_INTERVAL,
            time_fn: Arc::new(Utc::now),
            cache: RwLock::new(None),
            refresh_attempts: AtomicU64::new(0),
            refresh_lock: Mutex::new(RefreshState::default()),
        }
    }

    pub fn authority(&self) -> &url::Url {
        &self.authority
    }

    /// Specifies how long a fetched key set is considered fresh.
    pub fn set_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    /// Specifies the maximum age of a key set that may still be served when refreshing fails.
    pub fn set_max_staleness(mut self, max_staleness: Duration) -> Self {
        self.max_staleness = max_staleness;
        self
    }

    /// Specifies the timeout applied to each refresh.
    pub fn set_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Specifies the minimum time between two refreshes forced by
    /// [`force_refresh`](Self::force_refresh).
    pub fn set_min_forced_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_forced_refresh_interval = interval;
        self
    }

    /// Specifies how long after a failed refresh no further refresh is attempted.
    pub fn set_min_retry_interval(mut self, interval: Duration) -> Self {
        self.min_retry_interval = interval;
        self
    }

    pub fn set_discovery_options(mut self, options: ProviderMetadataDiscoveryOptions) -> Self {
        self.discovery_options = options;
        self
    }

    /// Specifies a function for returning the current time.
    ///
    /// This function is used to decide when the cached keys expire.
    pub fn set_time_fn<T>(mut self, time_fn: T) -> Self
    where
        T: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.time_fn = Arc::new(time_fn);
        self
    }

    /// Returns the cached provider metadata, refreshing it first if the refresh interval has
    /// elapsed.
    ///
    /// If the refresh fails, the previous snapshot is returned as long as it is no older than the
    /// maximum staleness. Otherwise the refresh error is returned. Callers that waited on a failed
    /// refresh, or that arrive within the minimum retry interval after one, get the same outcome
    /// without fetching again.
    pub async fn current_keys(&self) -> Result<Arc<ProviderMetadata>, KeySourceError> {
        if let Some(metadata) = self.fresh_snapshot().await {
            return Ok(metadata);
        }

        let attempts_seen = self.refresh_attempts.load(Ordering::SeqCst);
        let mut state = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(metadata) = self.fresh_snapshot().await {
            log::debug!("signing keys were refreshed by a concurrent caller");
            return Ok(metadata);
        }

        if let Some(ref failure) = state.last_failure {
            let attempted_while_waiting =
                self.refresh_attempts.load(Ordering::SeqCst) != attempts_seen;
            if attempted_while_waiting
                || elapsed(failure.at, (self.time_fn)()) < self.min_retry_interval
            {
                log::debug!(
                    "not refreshing signing keys; the refresh at {} failed",
                    failure.at
                );
                return match self.stale_snapshot().await {
                    Some(cached) => Ok(cached.metadata),
                    None => Err(failure.error.clone()),
                };
            }
        }

        self.refresh(&mut state).await
    }

    /// Refreshes the key set after a token referenced a key it does not contain.
    ///
    /// `seen` is the snapshot the caller verified against. If the cache has moved on since, the
    /// newer snapshot is returned without a fetch. Forced refreshes closer together than the
    /// minimum forced refresh interval return the cached snapshot unchanged.
    pub async fn force_refresh(
        &self,
        seen: &Arc<ProviderMetadata>,
    ) -> Result<Arc<ProviderMetadata>, KeySourceError> {
        let mut state = self.refresh_lock.lock().await;

        if let Some(cached) = self.cache.read().await.as_ref() {
            if !Arc::ptr_eq(&cached.metadata, seen) {
                log::debug!("signing keys were refreshed by a concurrent caller");
                return Ok(cached.metadata.clone());
            }
        }

        let now = (self.time_fn)();
        if let Some(last) = state.last_forced_refresh {
            if elapsed(last, now) < self.min_forced_refresh_interval {
                log::debug!(
                    "skipping forced refresh of signing keys; last forced refresh was at {}",
                    last
                );
                return Ok(seen.clone());
            }
        }
        state.last_forced_refresh = Some(now);

        log::debug!("forcing refresh of signing keys from {}", self.authority);
        self.refresh(&mut state).await
    }

    async fn fresh_snapshot(&self) -> Option<Arc<ProviderMetadata>> {
        let now = (self.time_fn)();
        self.cache
            .read()
            .await
            .as_ref()
            .filter(|cached| elapsed(cached.fetched_at, now) < self.refresh_interval)
            .map(|cached| cached.metadata.clone())
    }

    // Cached snapshot no older than the maximum staleness.
    async fn stale_snapshot(&self) -> Option<CachedMetadata> {
        let now = (self.time_fn)();
        self.cache
            .read()
            .await
            .as_ref()
            .filter(|cached| elapsed(cached.fetched_at, now) <= self.max_staleness)
            .cloned()
    }

    // `state` is the guard of `refresh_lock`.
    async fn refresh(
        &self,
        state: &mut RefreshState,
    ) -> Result<Arc<ProviderMetadata>, KeySourceError> {
        let fetched = self.fetch().await;
        self.refresh_attempts.fetch_add(1, Ordering::SeqCst);
        match fetched {
            Ok(metadata) => {
                state.last_failure = None;
                let metadata = Arc::new(metadata);
                log::debug!(
                    "fetched {} signing keys from {}",
                    metadata.jwks().keys().len(),
                    metadata.jwks_uri()
                );
                *self.cache.write().await = Some(CachedMetadata {
                    metadata: metadata.clone(),
                    fetched_at: (self.time_fn)(),
                });
                Ok(metadata)
            }
            Err(err) => {
                state.last_failure = Some(FailedRefresh {
                    at: (self.time_fn)(),
                    error: err.clone(),
                });
                match self.stale_snapshot().await {
                    Some(cached) => {
                        log::warn!(
                            "{}; serving signing keys fetched at {}",
                            err,
                            cached.fetched_at
                        );
                        Ok(cached.metadata)
                    }
                    None => Err(err),
                }
            }
        }
    }

    async fn fetch(&self) -> Result<ProviderMetadata, KeySourceError> {
        let discovery = ProviderMetadata::discover_async(
            &self.authority,
            &self.http_client,
            self.discovery_options.clone(),
        );
        match tokio::time::timeout(self.fetch_timeout, discovery).await {
            Ok(Ok(metadata)) => Ok(metadata),
            Ok(Err(err)) => Err(KeySourceError::Discovery(error_chain(&err))),
            Err(_) => Err(KeySourceError::Timeout(self.fetch_timeout)),
        }
    }
}

// Clock steps backwards count as no time elapsed.
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

use crate::discovery::tests::{MockProvider, TEST_AUTHORITY};
use crate::jwk::JsonWebKeyId;
use crate::jwt::tests::{test_p256_pub_key, test_rsa_pub_key};
use crate::key_source::{KeySourceError, SigningKeySource, DEFAULT_MIN_RETRY_INTERVAL};

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;

use std::sync::{Arc, Mutex};
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
struct TestClock(Arc<Mutex<DateTime<Utc>>>);
impl TestClock {
    fn new() -> Self {
        TestClock(Arc::new(Mutex::new(
            Utc.timestamp_opt(1_700_000_000, 0)
                .single()
                .expect("valid timestamp"),
        )))
    }

    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().expect("poisoned")
    }

    fn advance(&self, duration: Duration) {
        let mut now = self.0.lock().expect("poisoned");
        *now += chrono::Duration::from_std(duration).expect("duration out of range");
    }
}

fn key_source(
    provider: &MockProvider,
    clock: &TestClock,
) -> SigningKeySource<impl Fn(crate::HttpRequest) -> crate::discovery::tests::MockHttpFuture> {
    let clock = clock.clone();
    SigningKeySource::new(
        url::Url::parse(TEST_AUTHORITY).expect("invalid URL"),
        provider.http_client(),
    )
    .set_time_fn(move || clock.now())
}

fn unreachable_error() -> KeySourceError {
    KeySourceError::Discovery("Request failed: connection refused".to_string())
}

#[tokio::test]
async fn test_current_keys_cached_until_refresh_interval() {
    let provider = MockProvider::new(vec![test_rsa_pub_key()]);
    let clock = TestClock::new();
    let source = key_source(&provider, &clock);

    let first = source.current_keys().await.expect("failed to fetch keys");
    assert_eq!(first.jwks().keys(), &vec![test_rsa_pub_key()]);
    assert_eq!(provider.discovery_requests(), 1);
    assert_eq!(provider.jwks_requests(), 1);

    let second = source.current_keys().await.expect("failed to fetch keys");
    assert!(Arc::ptr_eq(&first, &second));

    clock.advance(12 * HOUR - Duration::from_secs(1));
    let third = source.current_keys().await.expect("failed to fetch keys");
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(provider.discovery_requests(), 1);

    clock.advance(Duration::from_secs(1));
    let fourth = source.current_keys().await.expect("failed to fetch keys");
    assert!(!Arc::ptr_eq(&first, &fourth));
    assert_eq!(provider.discovery_requests(), 2);
    assert_eq!(provider.jwks_requests(), 2);
}

#[tokio::test]
async fn test_current_keys_unreachable_without_cache() {
    let provider = MockProvider::new(vec![test_rsa_pub_key()]);
    provider.set_unreachable(true);
    let clock = TestClock::new();
    let source = key_source(&provider, &clock);

    assert_eq!(
        source.current_keys().await.expect_err("fetch should fail"),
        unreachable_error()
    );
    assert_eq!(provider.attempts(), 1);

    // The failure is reported again until the retry interval has elapsed.
    provider.set_unreachable(false);
    assert_eq!(
        source.current_keys().await.expect_err("retry should wait"),
        unreachable_error()
    );
    assert_eq!(provider.attempts(), 1);

    clock.advance(DEFAULT_MIN_RETRY_INTERVAL);
    source.current_keys().await.expect("failed to fetch keys");
    assert_eq!(provider.discovery_requests(), 1);
}

#[tokio::test]
async fn test_current_keys_serves_stale_within_max_staleness() {
    let provider = MockProvider::new(vec![test_rsa_pub_key()]);
    let clock = TestClock::new();
    let source = key_source(&provider, &clock).set_max_staleness(48 * HOUR);

    let fetched = source.current_keys().await.expect("failed to fetch keys");
    provider.set_unreachable(true);

    clock.advance(13 * HOUR);
    let stale = source.current_keys().await.expect("stale keys should be served");
    assert!(Arc::ptr_eq(&fetched, &stale));

    clock.advance(35 * HOUR);
    let stale = source.current_keys().await.expect("stale keys should be served");
    assert!(Arc::ptr_eq(&fetched, &stale));

    clock.advance(Duration::from_secs(1));
    assert_eq!(
        source.current_keys().await.expect_err("keys are too stale"),
        unreachable_error()
    );

    // Recovery replaces the cache.
    provider.set_unreachable(false);
    clock.advance(DEFAULT_MIN_RETRY_INTERVAL);
    let recovered = source.current_keys().await.expect("failed to fetch keys");
    assert!(!Arc::ptr_eq(&fetched, &recovered));
    assert_eq!(provider.discovery_requests(), 2);
}

#[tokio::test]
async fn test_current_keys_timeout() {
    let provider = MockProvider::new(vec![test_rsa_pub_key()]);
    let clock = TestClock::new();
    let source = key_source(&provider, &clock).set_fetch_timeout(Duration::from_millis(50));

    provider.set_delay(Some(Duration::from_secs(5)));
    assert_eq!(
        source.current_keys().await.expect_err("fetch should time out"),
        KeySourceError::Timeout(Duration::from_millis(50))
    );

    provider.set_delay(None);
    clock.advance(DEFAULT_MIN_RETRY_INTERVAL);
    let fetched = source.current_keys().await.expect("failed to fetch keys");

    provider.set_delay(Some(Duration::from_secs(5)));
    clock.advance(12 * HOUR);
    let stale = source.current_keys().await.expect("stale keys should be served");
    assert!(Arc::ptr_eq(&fetched, &stale));
}

#[tokio::test]
async fn test_force_refresh() {
    let provider = MockProvider::new(vec![test_rsa_pub_key()]);
    let clock = TestClock::new();
    let source = key_source(&provider, &clock);
    let rotated_kid = JsonWebKeyId::from("rotated");

    let original = source.current_keys().await.expect("failed to fetch keys");
    assert!(!original.jwks().contains_key_id(&rotated_kid));

    provider.set_keys(vec![test_rsa_pub_key(), test_p256_pub_key("rotated")]);
    let refreshed = source
        .force_refresh(&original)
        .await
        .expect("failed to refresh keys");
    assert!(refreshed.jwks().contains_key_id(&rotated_kid));
    assert_eq!(provider.jwks_requests(), 2);

    // A caller still holding the old snapshot gets the new one without a fetch.
    let latest = source
        .force_refresh(&original)
        .await
        .expect("failed to refresh keys");
    assert!(Arc::ptr_eq(&refreshed, &latest));
    assert_eq!(provider.jwks_requests(), 2);

    // The new snapshot also resets the regular refresh interval.
    let current = source.current_keys().await.expect("failed to fetch keys");
    assert!(Arc::ptr_eq(&refreshed, &current));
    assert_eq!(provider.jwks_requests(), 2);
}

#[tokio::test]
async fn test_force_refresh_rate_limited() {
    let provider = MockProvider::new(vec![test_rsa_pub_key()]);
    let clock = TestClock::new();
    let source =
        key_source(&provider, &clock).set_min_forced_refresh_interval(Duration::from_secs(300));

    let original = source.current_keys().await.expect("failed to fetch keys");
    let first = source
        .force_refresh(&original)
        .await
        .expect("failed to refresh keys");
    assert_eq!(provider.jwks_requests(), 2);

    clock.advance(Duration::from_secs(299));
    let suppressed = source
        .force_refresh(&first)
        .await
        .expect("failed to refresh keys");
    assert!(Arc::ptr_eq(&first, &suppressed));
    assert_eq!(provider.jwks_requests(), 2);

    clock.advance(Duration::from_secs(1));
    let second = source
        .force_refresh(&first)
        .await
        .expect("failed to refresh keys");
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(provider.jwks_requests(), 3);
}

#[tokio::test]
async fn test_force_refresh_failure_keeps_cache() {
    let provider = MockProvider::new(vec![test_rsa_pub_key()]);
    let clock = TestClock::new();
    let source = key_source(&provider, &clock);

    let original = source.current_keys().await.expect("failed to fetch keys");
    provider.set_unreachable(true);
    let after_failure = source
        .force_refresh(&original)
        .await
        .expect("cached keys should be served");
    assert!(Arc::ptr_eq(&original, &after_failure));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_fetch() {
    let provider = MockProvider::new(vec![test_rsa_pub_key()]);
    provider.set_delay(Some(Duration::from_millis(100)));
    let source = Arc::new(key_source(&provider, &TestClock::new()));

    let handles = (0..16)
        .map(|_| {
            let source = source.clone();
            tokio::spawn(async move { source.current_keys().await })
        })
        .collect::<Vec<_>>();

    let mut snapshots = Vec::new();
    for handle in handles {
        snapshots.push(
            handle
                .await
                .expect("task panicked")
                .expect("failed to fetch keys"),
        );
    }

    assert!(snapshots
        .iter()
        .all(|snapshot| Arc::ptr_eq(snapshot, &snapshots[0])));
    assert_eq!(provider.discovery_requests(), 1);
    assert_eq!(provider.jwks_requests(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_outage_fetched_once_for_waiting_callers() {
    let provider = MockProvider::new(vec![test_rsa_pub_key()]);
    let clock = TestClock::new();
    let source = Arc::new(key_source(&provider, &clock));

    let fetched = source.current_keys().await.expect("failed to fetch keys");
    let attempts_before_outage = provider.attempts();

    provider.set_unreachable(true);
    provider.set_delay(Some(Duration::from_millis(100)));
    clock.advance(13 * HOUR);

    let handles = (0..8)
        .map(|_| {
            let source = source.clone();
            tokio::spawn(async move { source.current_keys().await })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        let stale = handle
            .await
            .expect("task panicked")
            .expect("stale keys should be served");
        assert!(Arc::ptr_eq(&fetched, &stale));
    }
    assert_eq!(provider.attempts(), attempts_before_outage + 1);

    // Later callers within the retry interval don't fetch either.
    for _ in 0..5 {
        let stale = source
            .current_keys()
            .await
            .expect("stale keys should be served");
        assert!(Arc::ptr_eq(&fetched, &stale));
    }
    assert_eq!(provider.attempts(), attempts_before_outage + 1);

    clock.advance(DEFAULT_MIN_RETRY_INTERVAL);
    source
        .current_keys()
        .await
        .expect("stale keys should be served");
    assert_eq!(provider.attempts(), attempts_before_outage + 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cold_start_outage_fetched_once() {
    let provider = MockProvider::new(vec![test_rsa_pub_key()]);
    provider.set_unreachable(true);
    provider.set_delay(Some(Duration::from_millis(100)));
    let source = Arc::new(key_source(&provider, &TestClock::new()));

    let handles = (0..8)
        .map(|_| {
            let source = source.clone();
            tokio::spawn(async move { source.current_keys().await })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        assert_eq!(
            handle.await.expect("task panicked"),
            Err(unreachable_error())
        );
    }
    assert_eq!(provider.attempts(), 1);
}

#[tokio::test]
async fn test_waiting_callers_skip_fetch_without_retry_interval() {
    let provider = MockProvider::new(vec![test_rsa_pub_key()]);
    provider.set_unreachable(true);
    provider.set_delay(Some(Duration::from_millis(50)));
    let source = key_source(&provider, &TestClock::new()).set_min_retry_interval(Duration::ZERO);

    let (first, second) = tokio::join!(source.current_keys(), source.current_keys());
    assert_eq!(first, Err(unreachable_error()));
    assert_eq!(second, Err(unreachable_error()));
    assert_eq!(provider.attempts(), 1);

    // With no retry interval, a new call fetches again.
    source.current_keys().await.expect_err("fetch should fail");
    assert_eq!(provider.attempts(), 2);
}

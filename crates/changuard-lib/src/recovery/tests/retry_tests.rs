use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use crate::recovery::{execute_with_retry, RecoveryConfig, RecoveryError, RetryPolicy};

fn policy(max_attempts: u32, jitter: bool) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(1000),
        backoff_factor: 2.0,
        jitter,
    }
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(10),
        ..policy(max_attempts, false)
    }
}

#[test]
fn test_delay_grows_exponentially_up_to_max() {
    let policy = policy(5, false);
    assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
    assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
    assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(1000));
    assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(1000));
}

#[test]
fn test_jittered_delay_stays_within_a_quarter() {
    let policy = policy(5, true);
    for _ in 0..100 {
        let delay = policy.delay_for_attempt(3);
        assert!(delay >= Duration::from_millis(300), "{:?}", delay);
        assert!(delay <= Duration::from_millis(500), "{:?}", delay);
    }
}

#[test]
fn test_policy_from_config() {
    let config = RecoveryConfig {
        max_attempts: 0,
        base_delay_ms: 5,
        ..Default::default()
    };
    let policy = config.retry_policy();
    assert_eq!(policy.max_attempts, 1);
    assert_eq!(policy.base_delay, Duration::from_millis(5));
    assert_eq!(policy.max_delay, Duration::from_secs(30));
    assert!(policy.jitter);
}

#[tokio::test]
async fn test_retry_until_success() {
    let calls = AtomicU32::new(0);
    let result = execute_with_retry(&fast_policy(3), "connect", || {
        let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if attempt < 3 {
                Err(RecoveryError::Other(format!("attempt {} failed", attempt)))
            } else {
                Ok(attempt)
            }
        }
    })
    .await;
    assert_eq!(result, Ok(3));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_exhausted_reports_last_error() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = execute_with_retry(&fast_policy(3), "close", || {
        let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Err(RecoveryError::Other(format!("attempt {} failed", attempt))) }
    })
    .await;
    assert_eq!(
        result,
        Err(RecoveryError::RetryExhausted {
            name: "close".to_string(),
            attempts: 3,
            last_error: "attempt 3 failed".to_string(),
        })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_waits_between_attempts() {
    let start = std::time::Instant::now();
    let result: Result<(), _> = execute_with_retry(&fast_policy(3), "sweep", || async {
        Err(RecoveryError::Other("unavailable".to_string()))
    })
    .await;
    assert!(result.is_err());
    // 5ms after the first failure and 10ms after the second.
    assert!(start.elapsed() >= Duration::from_millis(15));
}

#[tokio::test]
async fn test_non_retryable_error_is_returned_immediately() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = execute_with_retry(&fast_policy(5), "connect", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(RecoveryError::Cancelled("connect".to_string())) }
    })
    .await;
    assert_eq!(result, Err(RecoveryError::Cancelled("connect".to_string())));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

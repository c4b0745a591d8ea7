/// Integration tests for resilience library
use resilience::{with_retry_if, with_timeout_result, Backoff, RetryConfig, RetryError, TimeoutError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_config(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        jitter: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_retry_around_timeout_recovers_from_slow_attempts() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();

    let result = with_retry_if(
        fast_config(3),
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            with_timeout_result(Duration::from_millis(20), async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                Ok::<_, &'static str>(n)
            })
        },
        |e| matches!(e, TimeoutError::Elapsed(_)),
    )
    .await;

    assert_eq!(result.unwrap(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_operation_errors_are_not_retried_when_filtered() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();

    let result = with_retry_if(
        fast_config(3),
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            with_timeout_result(Duration::from_secs(1), async { Err::<(), _>("rejected") })
        },
        |e| matches!(e, TimeoutError::Elapsed(_)),
    )
    .await;

    match result {
        Err(RetryError::OperationFailed(TimeoutError::Failed(msg))) => assert_eq!(msg, "rejected"),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_backoff_schedule_matches_retry_config() {
    let mut backoff = Backoff::new(fast_config(0));
    let delays: Vec<_> = (0..4).map(|_| backoff.next_delay()).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(5),
            Duration::from_millis(10),
            Duration::from_millis(20),
            Duration::from_millis(20)
        ]
    );
}

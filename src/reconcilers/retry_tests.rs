// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `retry.rs`

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn test_backoff_grows_exponentially() {
    let mut backoff = ExponentialBackoff {
        current_interval: Duration::from_millis(100),
        max_interval: Duration::from_secs(30),
        max_elapsed_time: None,
        multiplier: 2.0,
        randomization_factor: 0.0,
        start_time: Instant::now(),
    };

    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(400)));
}

#[test]
fn test_backoff_caps_at_max_interval() {
    let mut backoff = ExponentialBackoff {
        current_interval: Duration::from_secs(20),
        max_interval: Duration::from_secs(30),
        max_elapsed_time: None,
        multiplier: 2.0,
        randomization_factor: 0.0,
        start_time: Instant::now(),
    };

    backoff.next_backoff();
    // 20s * 2 = 40s, capped to 30s.
    assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(30)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(30)));
}

#[test]
fn test_backoff_stops_after_max_elapsed() {
    let mut backoff = ExponentialBackoff {
        current_interval: Duration::from_millis(1),
        max_interval: Duration::from_secs(1),
        max_elapsed_time: Some(Duration::from_millis(0)),
        multiplier: 2.0,
        randomization_factor: 0.0,
        start_time: Instant::now() - Duration::from_millis(10),
    };

    assert_eq!(backoff.next_backoff(), None);
}

#[test]
fn test_jitter_stays_within_bounds() {
    let mut backoff = ExponentialBackoff {
        current_interval: Duration::from_secs(10),
        max_interval: Duration::from_secs(30),
        max_elapsed_time: None,
        multiplier: 2.0,
        randomization_factor: 0.1,
        start_time: Instant::now(),
    };

    for _ in 0..100 {
        backoff.current_interval = Duration::from_secs(10);
        let jittered = backoff.next_backoff().unwrap();
        assert!(jittered >= Duration::from_secs(9));
        assert!(jittered <= Duration::from_secs(11));
    }
}

#[test]
fn test_retryable_http_statuses() {
    assert!(is_retryable_http_status(StatusCode::TOO_MANY_REQUESTS));
    assert!(is_retryable_http_status(StatusCode::INTERNAL_SERVER_ERROR));
    assert!(is_retryable_http_status(StatusCode::BAD_GATEWAY));
    assert!(is_retryable_http_status(StatusCode::SERVICE_UNAVAILABLE));
    assert!(is_retryable_http_status(StatusCode::GATEWAY_TIMEOUT));

    assert!(!is_retryable_http_status(StatusCode::BAD_REQUEST));
    assert!(!is_retryable_http_status(StatusCode::UNAUTHORIZED));
    assert!(!is_retryable_http_status(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn test_retry_cloudflare_call_retries_transient() {
    let attempts = AtomicUsize::new(0);

    let result = retry_cloudflare_call(
        || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(CloudflareError::Transport {
                        reason: "connection reset".to_string(),
                    })
                } else {
                    Ok(42)
                }
            }
        },
        "test op",
    )
    .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_cloudflare_call_fails_fast_on_permanent() {
    let attempts = AtomicUsize::new(0);

    let result: Result<(), _> = retry_cloudflare_call(
        || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(CloudflareError::InvalidCredentials {
                    reason: "bad token".to_string(),
                })
            }
        },
        "test op",
    )
    .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

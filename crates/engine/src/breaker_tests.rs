// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use clier_core::FakeClock;

fn cfg() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        timeout_ms: 1_000,
        error_threshold: 50,
        reset_timeout_ms: 5_000,
        volume_threshold: 4,
    }
}

fn breaker() -> (CircuitBreaker<FakeClock>, FakeClock) {
    let clock = FakeClock::new();
    (CircuitBreaker::new(cfg(), clock.clone()), clock)
}

async fn ok_call(breaker: &CircuitBreaker<FakeClock>) -> Result<u32, BreakerError<String>> {
    breaker.call(|| async { Ok::<_, String>(1) }).await
}

async fn err_call(breaker: &CircuitBreaker<FakeClock>) -> Result<u32, BreakerError<String>> {
    breaker.call(|| async { Err::<u32, _>("boom".to_string()) }).await
}

#[tokio::test]
async fn passes_results_and_errors_through_while_closed() {
    let (breaker, _) = breaker();
    assert_eq!(ok_call(&breaker).await.unwrap(), 1);
    assert!(matches!(
        err_call(&breaker).await.unwrap_err(),
        BreakerError::Inner(msg) if msg == "boom"
    ));
    assert_eq!(breaker.state(), BreakerState::Closed);
}

#[tokio::test]
async fn below_volume_threshold_never_opens() {
    let (breaker, _) = breaker();
    for _ in 0..3 {
        let _ = err_call(&breaker).await;
    }
    assert_eq!(breaker.state(), BreakerState::Closed, "3 < volume threshold 4");
}

#[tokio::test]
async fn opens_at_error_rate_over_volume() {
    let (breaker, _) = breaker();
    let _ = ok_call(&breaker).await;
    let _ = ok_call(&breaker).await;
    let _ = err_call(&breaker).await;
    assert_eq!(breaker.state(), BreakerState::Closed, "1/3 failures");
    let _ = err_call(&breaker).await;
    // 2/4 = 50% at volume 4: opens.
    assert_eq!(breaker.state(), BreakerState::Open);
}

#[tokio::test]
async fn open_fails_fast_without_running_the_op() {
    let (breaker, _) = breaker();
    for _ in 0..4 {
        let _ = err_call(&breaker).await;
    }
    assert_eq!(breaker.state(), BreakerState::Open);

    let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let ran2 = std::sync::Arc::clone(&ran);
    let result: Result<(), BreakerError<String>> = breaker
        .call(|| async move {
            ran2.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        })
        .await;
    assert!(matches!(result.unwrap_err(), BreakerError::Open));
    assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn reset_timeout_half_opens_then_success_closes() {
    let (breaker, clock) = breaker();
    for _ in 0..4 {
        let _ = err_call(&breaker).await;
    }
    assert_eq!(breaker.state(), BreakerState::Open);

    clock.advance_ms(5_000);
    assert_eq!(breaker.state(), BreakerState::HalfOpen);

    assert_eq!(ok_call(&breaker).await.unwrap(), 1, "probe admitted");
    assert_eq!(breaker.state(), BreakerState::Closed);

    // The window was reset with the close; one failure does not reopen.
    let _ = err_call(&breaker).await;
    assert_eq!(breaker.state(), BreakerState::Closed);
}

#[tokio::test]
async fn half_open_probe_failure_reopens() {
    let (breaker, clock) = breaker();
    for _ in 0..4 {
        let _ = err_call(&breaker).await;
    }
    clock.advance_ms(5_000);
    assert_eq!(breaker.state(), BreakerState::HalfOpen);

    let _ = err_call(&breaker).await;
    assert_eq!(breaker.state(), BreakerState::Open);
}

#[tokio::test]
async fn timeout_counts_as_failure() {
    let clock = FakeClock::new();
    let mut config = cfg();
    config.timeout_ms = 20;
    config.volume_threshold = 1;
    config.error_threshold = 100;
    let breaker = CircuitBreaker::new(config, clock);

    let result: Result<(), BreakerError<String>> = breaker
        .call(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
    assert!(matches!(result.unwrap_err(), BreakerError::Timeout(20)));
    assert_eq!(breaker.state(), BreakerState::Open, "1/1 failed at volume 1");
}

#[tokio::test]
async fn old_outcomes_age_out_of_the_window() {
    let (breaker, clock) = breaker();
    for _ in 0..3 {
        let _ = err_call(&breaker).await;
    }
    // Push the failures out of the 10s rolling window.
    clock.advance_ms(11_000);
    let _ = err_call(&breaker).await;
    assert_eq!(
        breaker.state(),
        BreakerState::Closed,
        "only one recent failure in the window"
    );
}

#[tokio::test]
async fn notices_fire_for_transitions() {
    let (breaker, clock) = breaker();
    let notices = std::sync::Arc::new(Mutex::new(Vec::new()));
    {
        let notices = std::sync::Arc::clone(&notices);
        breaker.on_notice(move |n| notices.lock().push(n));
    }

    for _ in 0..4 {
        let _ = err_call(&breaker).await;
    }
    clock.advance_ms(5_000);
    let _ = ok_call(&breaker).await;

    let notices = notices.lock();
    assert!(notices.contains(&BreakerNotice::Opened));
    assert!(notices.contains(&BreakerNotice::HalfOpened));
    assert!(notices.contains(&BreakerNotice::Closed));
    let failures = notices.iter().filter(|n| **n == BreakerNotice::Failure).count();
    assert_eq!(failures, 4);
}

#[tokio::test]
async fn shutdown_drops_listeners() {
    let (breaker, _) = breaker();
    let hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    {
        let hits = std::sync::Arc::clone(&hits);
        breaker.on_notice(move |_| {
            hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
    }
    breaker.shutdown();
    let _ = ok_call(&breaker).await;
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);
}

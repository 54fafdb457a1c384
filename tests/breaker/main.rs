//! Circuit breaker integration tests.
//!
//! - Trip after the failure threshold within the window
//! - Exactly one half-open trial after the open period
//! - Observers see the whole lifecycle

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use contest_clock::breaker::{
    BreakerConfig, BreakerError, BreakerEvent, BreakerObserver, CircuitBreaker, CircuitState,
};

const FALLBACK: &str = "Sorry, out of service right now";

fn config() -> BreakerConfig {
    BreakerConfig::default()
        .with_error_threshold_percent(50)
        .with_minimum_requests(4)
        .with_open_duration(Duration::from_secs(10))
        .with_call_timeout(Duration::from_secs(3))
}

/// Stand-in for a collaborator service that counts how often it is hit.
#[derive(Default)]
struct Downstream {
    calls: AtomicUsize,
}

impl Downstream {
    async fn call(&self, ok: bool) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if ok {
            Ok("live".to_string())
        } else {
            Err("503".to_string())
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

async fn call(breaker: &CircuitBreaker, downstream: &Downstream, ok: bool) -> String {
    breaker
        .fire_or_else(|| downstream.call(ok), |_| FALLBACK.to_string())
        .await
}

async fn trip(breaker: &CircuitBreaker, downstream: &Downstream) {
    for ok in [true, true, false, false] {
        call(breaker, downstream, ok).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);
}

// ============================================================================
// Trip
// ============================================================================

#[tokio::test(start_paused = true)]
async fn two_failures_in_four_trip_and_fifth_call_is_not_attempted() {
    let breaker = CircuitBreaker::new("targets", config());
    let downstream = Downstream::default();
    trip(&breaker, &downstream).await;

    let fifth = call(&breaker, &downstream, true).await;

    assert_eq!(fifth, FALLBACK);
    assert_eq!(downstream.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn failures_below_minimum_sample_do_not_trip() {
    let breaker = CircuitBreaker::new("targets", config());
    let downstream = Downstream::default();
    for _ in 0..3 {
        call(&breaker, &downstream, false).await;
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn old_failures_roll_out_of_the_window() {
    let breaker = CircuitBreaker::new("targets", config());
    let downstream = Downstream::default();
    for _ in 0..3 {
        call(&breaker, &downstream, false).await;
    }
    tokio::time::sleep(Duration::from_secs(11)).await;

    call(&breaker, &downstream, false).await;
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn timeouts_count_towards_the_trip() {
    let breaker = CircuitBreaker::new("scores", config().with_call_timeout(Duration::from_secs(1)));
    for _ in 0..4 {
        let result = breaker
            .fire(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, String>(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Timeout { .. })));
    }
    assert_eq!(breaker.state(), CircuitState::Open);
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn successful_trial_closes_the_breaker() {
    let breaker = CircuitBreaker::new("targets", config());
    let downstream = Downstream::default();
    trip(&breaker, &downstream).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(call(&breaker, &downstream, true).await, "live");
    assert_eq!(breaker.state(), CircuitState::Closed);

    assert_eq!(call(&breaker, &downstream, true).await, "live");
    assert_eq!(downstream.calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn failed_trial_reopens_for_another_period() {
    let breaker = CircuitBreaker::new("targets", config());
    let downstream = Downstream::default();
    trip(&breaker, &downstream).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(call(&breaker, &downstream, false).await, FALLBACK);
    assert_eq!(breaker.state(), CircuitState::Open);

    assert_eq!(call(&breaker, &downstream, true).await, FALLBACK);
    assert_eq!(downstream.calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn only_one_trial_runs_while_half_open() {
    let breaker = CircuitBreaker::new("targets", config());
    let downstream = Arc::new(Downstream::default());
    trip(&breaker, &downstream).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let trial = {
        let breaker = breaker.clone();
        let downstream = Arc::clone(&downstream);
        tokio::spawn(async move {
            breaker
                .fire(|| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    downstream.call(true).await
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let concurrent = breaker.fire(|| downstream.call(true)).await;
    assert!(matches!(concurrent, Err(BreakerError::Open { .. })));

    assert_eq!(trial.await.unwrap().unwrap(), "live");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(downstream.calls(), 5);
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Default)]
struct Names(Mutex<Vec<&'static str>>);

impl BreakerObserver for Names {
    fn on_event(&self, _breaker: &str, event: &BreakerEvent) {
        self.0.lock().unwrap().push(event.name());
    }
}

#[tokio::test(start_paused = true)]
async fn observer_sees_open_half_open_and_close() {
    let names = Arc::new(Names::default());
    let breaker = CircuitBreaker::new("auth", config()).with_observer(names.clone());
    let downstream = Downstream::default();
    trip(&breaker, &downstream).await;
    call(&breaker, &downstream, true).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    call(&breaker, &downstream, true).await;

    let names = names.0.lock().unwrap().clone();
    let first = |name| names.iter().position(|n| *n == name).unwrap();
    let last = |name| names.iter().rposition(|n| *n == name).unwrap();
    assert!(first("open") < first("reject"));
    assert!(first("reject") < last("fallback"));
    assert!(first("half_open") < first("close"));
}

mod utils;
#[allow(unused)]
use utils::*;

use barrage::prelude::*;
use barrage_core::{
    Aggregation, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, ITERATIONS, VUS_MAX,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

fn stat(report: &RunReport, metric: &str, aggregation: Aggregation) -> f64 {
    report
        .metric(metric)
        .and_then(|m| m.value(&aggregation))
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn fast_target_meets_latency_slo() {
    let addr = init().await;
    let url = format!("http://{addr}/delay/ms/5");

    let report = Scenario::new("fast", move || {
        let url = url.clone();
        async move {
            let _ = barrage::http::get(&url).await;
        }
    })
    .stage(Duration::from_secs(1), 10)
    .tick(Duration::from_millis(100))
    .check(Check::status("status is 200", &[200]))
    .threshold("http_req_duration", "p(99)<50")
    .await
    .unwrap();

    assert!(report.finished);
    assert_eq!(report.verdict, Verdict::Pass);
    assert!(stat(&report, HTTP_REQS, Aggregation::Count) > 0.);
    assert_eq!(stat(&report, HTTP_REQ_FAILED, Aggregation::Rate), 0.);
    assert_eq!(stat(&report, VUS_MAX, Aggregation::Value), 10.);

    let med = stat(&report, HTTP_REQ_DURATION, Aggregation::Med);
    assert!((5. ..25.).contains(&med), "median {med}ms");
    assert!(stat(&report, HTTP_REQ_DURATION, Aggregation::Min) >= 5.);

    let status = &report.checks["status is 200"];
    assert_eq!(status.fails, 0);
    assert!(status.passes > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn rate_limited_target_is_judged_on_latency_only() {
    let addr = init().await;
    let url = format!("http://{addr}/status/429");

    let report = Scenario::new("rate limited", move || {
        let url = url.clone();
        async move {
            let _ = barrage::http::get(&url).await;
        }
    })
    .stage(Duration::from_secs(1), 5)
    .tick(Duration::from_millis(100))
    .check(Check::status("status is 200 or 429", &[200, 429]))
    .threshold("http_req_duration", "p(99)<50")
    .await
    .unwrap();

    let checks = &report.checks["status is 200 or 429"];
    assert_eq!(checks.fails, 0);
    assert!(checks.passes > 0);

    // 429 is outside the expected statuses, but nothing is judged on it.
    assert_eq!(stat(&report, HTTP_REQ_FAILED, Aggregation::Rate), 1.);
    assert_eq!(report.thresholds.len(), 1);
    assert_eq!(report.verdict, Verdict::Pass);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn interrupt_drains_then_finishes() {
    let addr = init().await;
    let url = format!("http://{addr}/delay/ms/20");

    let stop = CancellationToken::new();
    let (tx, mut rx) = watch::channel(RunState::Idle);
    let states = Arc::new(Mutex::new(vec![]));
    let watcher = {
        let states = states.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                states.lock().unwrap().push(*rx.borrow_and_update());
            }
        })
    };

    let run = tokio::spawn(
        Scenario::new("interrupted", move || {
            let url = url.clone();
            async move {
                let _ = barrage::http::get(&url).await;
            }
        })
        .start_vus(10)
        .stage(Duration::from_secs(3600), 10)
        .tick(Duration::from_millis(100))
        .graceful_ramp_down(Duration::from_millis(300))
        .threshold("http_req_failed", "rate<0.01")
        .stop_on(stop.clone())
        .publish_state(tx),
    );

    tokio::time::sleep(Duration::from_millis(800)).await;
    stop.cancel();

    let report = run.await.unwrap().unwrap();
    watcher.await.unwrap();

    assert!(report.finished);
    assert!(report.interrupted);
    assert!(report.elapsed_secs < 5.);
    assert!(stat(&report, ITERATIONS, Aggregation::Count) > 0.);
    assert_eq!(report.verdict, Verdict::Pass);

    let states = states.lock().unwrap();
    assert_eq!(states.first(), Some(&RunState::Ramping { stage: 0 }));
    assert!(states.contains(&RunState::Draining));
    assert_eq!(states.last(), Some(&RunState::Finished));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn unreachable_target_is_indeterminate() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let url = format!("http://{addr}/hello");

    let report = Scenario::new("unreachable", move || {
        let url = url.clone();
        async move {
            let res = barrage::http::get(&url).await;
            assert!(matches!(res, Err(RequestError::Network(_))));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .stage(Duration::from_millis(500), 2)
    .tick(Duration::from_millis(100))
    .check(Check::status("status is 200", &[200]))
    .threshold("http_req_duration", "p(99)<50")
    .threshold("http_req_failed", "rate<0.01")
    .await
    .unwrap();

    assert_eq!(report.thresholds[0].verdict, Verdict::Indeterminate);
    assert_eq!(report.thresholds[1].verdict, Verdict::Fail);
    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(report.checks["status is 200"].passes, 0);
    assert!(report.metric(HTTP_REQ_DURATION).unwrap().is_empty());
}

#[tokio::test]
async fn malformed_response_is_protocol_error() {
    let addr = mock_service::spawn_garbage().await;
    let client = barrage::http::Client::new(&HttpConfig::default()).unwrap();

    let err = client.get(&format!("http://{addr}/")).await.unwrap_err();
    assert!(matches!(err, RequestError::Protocol(_)), "{err:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30_000)]
async fn persisted_report_reloads_identically() {
    let addr = init().await;
    let url = format!("http://{addr}/jitter/ms/5");

    let report = Scenario::new("persisted", move || {
        let url = url.clone();
        async move {
            let _ = barrage::http::get(&url).await;
        }
    })
    .stage(Duration::from_millis(500), 4)
    .tick(Duration::from_millis(100))
    .threshold("http_req_duration", "p(99.9)<100")
    .threshold("http_req_duration", "avg<50ms")
    .await
    .unwrap();

    let json = serde_json::to_string(&report).unwrap();
    let back: RunReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back, report);
    assert!(back
        .metric(HTTP_REQ_DURATION)
        .and_then(|m| m.value(&Aggregation::Percentile(99.9)))
        .is_some());
}

#[cfg(feature = "integration")]
mod integration {
    use super::*;

    /// The full hello profile: 10s to 500 VUs, 1m to 1000, 10s down to zero.
    #[tokio::test(flavor = "multi_thread")]
    async fn hello_profile() {
        let addr = init().await;
        let url = format!("http://{addr}/hello");

        let report = Scenario::new("hello", move || {
            let url = url.clone();
            async move {
                let _ = barrage::http::get(&url).await;
            }
        })
        .stage(Duration::from_secs(10), 500)
        .stage(Duration::from_secs(60), 1000)
        .stage(Duration::from_secs(10), 0)
        .check(Check::status("status is 200 or 429", &[200, 429]))
        .check(Check::max_duration(
            "response time <50ms",
            Duration::from_millis(50),
        ))
        .threshold("http_req_duration", "p(99)<50")
        .threshold("http_req_failed", "rate<0.01")
        .await
        .unwrap();

        assert_eq!(stat(&report, VUS_MAX, Aggregation::Value), 1000.);
        assert!(dbg!(report.verdict) != Verdict::Indeterminate);
    }
}

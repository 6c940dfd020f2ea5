use axum::{
    debug_handler,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
#[allow(unused)]
use metrics::{counter, gauge, histogram};
use rand_distr::{Distribution, SkewNormal};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

#[derive(Clone, Default)]
pub struct AppState {
    limiters: Arc<Mutex<HashMap<u32, Arc<DefaultDirectRateLimiter>>>>,
}

pub fn app() -> Router {
    Router::new()
        .route("/hello", get(hello))
        .route("/delay/ms/:delay_ms", get(delay))
        .route("/jitter/ms/:mean_ms", get(jitter))
        .route("/status/:code", get(status))
        .route("/limited/:rps", get(limited))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::default())
}

pub async fn run(addr: SocketAddr) {
    match TcpListener::bind(&addr).await {
        Ok(listener) => serve(listener).await,
        Err(err) => error!("Unable to bind {addr}: {err}"),
    }
}

pub async fn serve(listener: TcpListener) {
    if let Err(err) = axum::serve(listener, app()).await {
        error!("Mock service stopped: {err}");
    }
}

/// Serve on an ephemeral local port, returning the bound address.
pub async fn spawn() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener));
    addr
}

/// Answer every connection with bytes that are not an HTTP response.
pub async fn spawn_garbage() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.write_all(b"NOT HTTP AT ALL\r\n\r\n").await;
            let _ = stream.shutdown().await;
        }
    });
    addr
}

#[debug_handler]
pub async fn hello() -> &'static str {
    counter!("mock-service.hello").increment(1);
    TPS_MEASURE.fetch_add(1, Ordering::Relaxed);
    "Hello, World!"
}

#[debug_handler]
pub async fn delay(Path(delay_ms): Path<u64>) {
    counter!("mock-service.delay").increment(1);
    TPS_MEASURE.fetch_add(1, Ordering::Relaxed);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

/// Delay drawn from a right-skewed distribution around `mean_ms`.
#[debug_handler]
pub async fn jitter(Path(mean_ms): Path<u64>) {
    TPS_MEASURE.fetch_add(1, Ordering::Relaxed);
    let mean = mean_ms as f64;
    let delay = match SkewNormal::new(mean, mean / 4., 5.) {
        Ok(dist) => dist.sample(&mut rand::thread_rng()).max(0.),
        Err(_) => mean,
    };
    histogram!("mock-service.jitter").record(delay);
    tokio::time::sleep(Duration::from_secs_f64(delay / 1e3)).await;
}

#[debug_handler]
pub async fn status(Path(code): Path<u16>) -> Response {
    TPS_MEASURE.fetch_add(1, Ordering::Relaxed);
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    if status == StatusCode::TOO_MANY_REQUESTS {
        return too_many_requests();
    }
    status.into_response()
}

/// 429 with `Retry-After` once more than `rps` requests arrive within a second.
#[debug_handler]
pub async fn limited(State(state): State<AppState>, Path(rps): Path<u32>) -> Response {
    TPS_MEASURE.fetch_add(1, Ordering::Relaxed);
    let Some(rps) = NonZeroU32::new(rps) else {
        return too_many_requests();
    };

    let limiter = {
        let Ok(mut limiters) = state.limiters.lock() else {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };
        limiters
            .entry(rps.get())
            .or_insert_with(|| Arc::new(rate_limiter(rps)))
            .clone()
    };

    match limiter.check() {
        Ok(_) => "Ok".into_response(),
        Err(_) => {
            debug!("Rate limited at {rps} rps");
            too_many_requests()
        }
    }
}

fn too_many_requests() -> Response {
    counter!("mock-service.rate_limited").increment(1);
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, "1")],
        "Too Many Requests",
    )
        .into_response()
}

/** Utils **/

pub fn rate_limiter(rps: NonZeroU32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(rps))
}

/** TPS Printer **/

static TPS_MEASURE: AtomicU64 = AtomicU64::new(0);

pub async fn tps_measure_task() {
    loop {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let transactions = TPS_MEASURE.swap(0, Ordering::Relaxed);
        gauge!("mock-service.tps").set(transactions as f64);
        debug!("{transactions} TPS");
    }
}

use crate::file::{LoadTest, Target};
use barrage::prelude::*;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Run the file's load test until its stages complete or `stop` is cancelled.
pub async fn run(test: LoadTest, stop: CancellationToken) -> Result<RunReport, HarnessError> {
    let (tx, mut rx) = watch::channel(RunState::Idle);
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = *rx.borrow_and_update();
            debug!("Run is {state}");
        }
    });

    let target = Arc::new(test.target);
    let scenario = move || {
        let target = target.clone();
        async move { iteration(&target).await }
    };

    Scenario::with_config(test.config, scenario)
        .with_checks(test.checks)
        .stop_on(stop)
        .publish_state(tx)
        .await
}

async fn iteration(target: &Target) {
    match barrage::http::get_with_headers(&target.url, &target.headers).await {
        Ok(res) if res.status == 429 && target.log_rate_limited => {
            info!(
                "Rate limited! Retry-After: {}",
                res.header("retry-after").unwrap_or("-")
            );
        }
        Ok(_) => {}
        Err(err) => debug!("Request failed: {err}"),
    }
}

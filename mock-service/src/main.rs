use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter("mock_service=info,tower_http=warn")
        .init();

    if let Err(err) = PrometheusBuilder::new()
        .with_http_listener("0.0.0.0:9081".parse::<SocketAddr>().unwrap())
        .install()
    {
        tracing::warn!("Metrics exporter unavailable: {err}");
    }

    tokio::spawn(mock_service::tps_measure_task());

    let addr: SocketAddr = "0.0.0.0:8081".parse().unwrap();
    info!("Mock service listening on {addr}");
    mock_service::run(addr).await;
}

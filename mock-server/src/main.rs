use std::time::Duration;

use mock_server::MockOptions;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn env_number(name: &str) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("127.0.0.1:{port}");
    let options = MockOptions {
        latency: Duration::from_millis(env_number("MOCK_LATENCY_MS")),
        fail_first: env_number("MOCK_FAIL_FIRST") as usize,
        ..MockOptions::default()
    };
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, ?options, "listening");
    mock_server::run_with(listener, options).await
}

//! Wallet ledger server binary

use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use wallet_ledger::{Config, LedgerEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting wallet ledger server");

    // Load configuration
    let config = Config::from_env()?;

    // Open engine
    let engine = LedgerEngine::open(&config)?;
    tracing::info!(
        currencies = engine.currencies().list().len(),
        "Ledger opened"
    );

    // Expose Prometheus metrics
    let listener = TcpListener::bind(&config.metrics_listen_addr).await?;
    tracing::info!(addr = %config.metrics_listen_addr, "Metrics endpoint listening");
    let registry = engine.metrics().registry.clone();
    tokio::spawn(serve_metrics(listener, registry));

    // The engine's contract is its four operations; expose them however
    // the surrounding service chooses. Until a transport is wired in,
    // just keep running.
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down wallet ledger server");
    Ok(())
}

/// Minimal scrape endpoint: every request gets the full metrics dump
async fn serve_metrics(listener: TcpListener, registry: Arc<prometheus::Registry>) {
    loop {
        let (mut stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "Metrics accept failed");
                continue;
            }
        };

        let encoder = TextEncoder::new();
        let mut body = Vec::new();
        if let Err(e) = encoder.encode(&registry.gather(), &mut body) {
            tracing::warn!(error = %e, "Metrics encoding failed");
            continue;
        }

        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            encoder.format_type(),
            body.len()
        );
        if let Err(e) = async {
            stream.write_all(response.as_bytes()).await?;
            stream.write_all(&body).await?;
            stream.shutdown().await
        }
        .await
        {
            tracing::debug!(error = %e, "Metrics response failed");
        }
    }
}

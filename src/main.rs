//! live-relay daemon
//!
//! # Usage
//!
//! ```bash
//! live-relay --root ./queue --port 3000
//! LIVE_RELAY_TOKEN=s3cret live-relay --config live-relay.toml
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use live_relay::config::RelayConfig;
use live_relay::gateway::serve;
use live_relay::ingest::watcher::SourceConfig;
use live_relay::{ChangeSource, Cli, IngestPipeline, Transport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = RelayConfig::load_from(&cli.config)?;
    cli.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("live_relay={}", config.logging.level).parse()?),
        )
        .init();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let source_config = SourceConfig {
        stability_threshold: config.watch.stability_threshold(),
        poll_interval: config.watch.poll_interval(),
    };
    let source = ChangeSource::with_config(config.watch.root.clone(), source_config);
    let transport = Arc::new(Transport::new(config));

    let (tx, rx) = mpsc::unbounded_channel();
    let handle = source.start(tx)?;
    let pipeline = IngestPipeline::new(Arc::clone(&transport), handle.root().to_path_buf());
    tokio::spawn(pipeline.run(rx, |e| {
        tracing::error!(error = %e, "Change source error");
    }));

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        "live-relay listening on ws://{}{}",
        addr,
        transport.config().server.ws_path
    );
    if transport.config().server.secret().is_none() {
        tracing::warn!("No auth token configured; only the origin is checked");
    }

    serve(listener, transport, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;

    drop(handle);
    tracing::info!("Stopped watching");
    Ok(())
}

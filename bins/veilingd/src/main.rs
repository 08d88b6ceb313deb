//! veilingd — progressive-reveal Dutch auction broker for UTXO-bound
//! Counterparty assets.
//!
//! Serves the listing API over HTTP and runs the event pipeline: ZMQ push
//! subscriptions to bitcoind plus the fallback poll scheduler, both driving
//! the listing state engine.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::info;

mod routes;

use veiling_node::bitcoind::BitcoindClient;
use veiling_node::broker::Broker;
use veiling_node::config::Config;
use veiling_node::counterparty::CounterpartyClient;
use veiling_node::storage::RocksStore;
use veiling_node::zmq::ZmqListener;

/// Shared application state passed to every Axum handler.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    /// Key required on admission requests.
    pub api_key: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("Failed to load broker configuration")?;

    info!(
        db = %config.database_path.display(),
        rpc = %config.bitcoin_rpc_url(),
        counterparty = %format!("{}:{}", config.counterparty_host, config.counterparty_port),
        bind = %config.listen_addr(),
        zmq_enabled = config.zmq_enabled,
        "Starting veilingd"
    );

    let store = Arc::new(
        RocksStore::open(&config.database_path)
            .with_context(|| format!("Failed to open store at {}", config.database_path.display()))?,
    );
    let chain = Arc::new(BitcoindClient::new(
        &config.bitcoin_rpc_url(),
        &config.bitcoin_rpc_user,
        &config.bitcoin_rpc_password,
        config.spend_scan_depth,
    ));
    let assets = Arc::new(CounterpartyClient::new(
        &config.counterparty_host,
        config.counterparty_port,
    ));
    let broker = Arc::new(Broker::new(store, chain, assets, config.clone()));

    // Event plumbing: ZMQ subscriber threads (when enabled) feed the
    // channel; the pipeline also runs its own poll tickers either way.
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let zmq = if config.zmq_enabled {
        Some(ZmqListener::start(&config.zmq_block_url, &config.zmq_tx_url, event_tx))
    } else {
        info!("ZMQ disabled; relying on the poll scheduler");
        None
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pipeline = tokio::spawn(broker.clone().run(event_rx, shutdown_rx));

    let state = AppState { broker, api_key: config.api_key.clone() };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr()))?;

    info!("Listening on http://{}", config.listen_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server error")?;

    // Cooperative teardown: stop the tickers and drain the subscribers;
    // in-flight writes complete before the store handle drops.
    let _ = shutdown_tx.send(true);
    let _ = pipeline.await;
    if let Some(zmq) = zmq {
        zmq.stop();
    }
    info!("veilingd stopped");

    Ok(())
}

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use common::{BrokerClient, Config, TradingMode};
use engine::{Agent, BinanceClient, RestartPolicy};
use paper::PaperClient;
use strategy::InstrumentsFile;

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };
    info!(mode = %cfg.trading_mode, "Microbot starting");

    let instruments = match InstrumentsFile::load(&cfg.instruments_config_path) {
        Ok(file) => file.instruments,
        Err(e) => {
            error!(error = %e, "Invalid instruments config");
            std::process::exit(1);
        }
    };

    // ── Broker client (injected based on TRADING_MODE) ────────────────────────
    let binance = match BinanceClient::new(&cfg.binance_api_key, &cfg.binance_secret) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to create Binance client");
            std::process::exit(1);
        }
    };
    let client: Arc<dyn BrokerClient> = match cfg.trading_mode {
        TradingMode::Live => {
            info!("Live trading mode — using BinanceClient");
            Arc::new(binance)
        }
        TradingMode::Paper => {
            info!(slippage_bps = cfg.paper_slippage_bps, "Paper trading mode — using PaperClient");
            Arc::new(PaperClient::with_feed(Arc::new(binance), cfg.paper_slippage_bps))
        }
    };

    // ── Agents: one supervised loop per instrument ────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let policy = RestartPolicy::fixed(cfg.restart_delay);
    let mut agents = Vec::new();
    for identity in instruments {
        let ticker = identity.ticker.clone();
        match Agent::new(identity, client.clone(), policy).await {
            Ok(agent) => agents.push(tokio::spawn(agent.run(shutdown_rx.clone()))),
            Err(e) => {
                error!(ticker = %ticker, error = %e, "Agent initialization failed, instrument skipped")
            }
        }
    }
    if agents.is_empty() {
        error!("No agent could be initialized");
        std::process::exit(1);
    }

    // Keep main alive
    info!(agents = agents.len(), "All agents started. Waiting for shutdown signal.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Can't listen for shutdown signal, running until killed");
        std::future::pending::<()>().await;
    }

    info!("Shutdown signal received. Stopping agents.");
    let _ = shutdown_tx.send(true);
    for agent in agents {
        if let Err(e) = agent.await {
            error!(error = %e, "Agent task failed");
        }
    }
    info!("Exiting.");
}

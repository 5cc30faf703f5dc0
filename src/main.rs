// =============================================================================
// Vajra F&O Nexus — Main Entry Point
// =============================================================================
//
// Startup order matters: config, then state restore (checksummed snapshot),
// then broker wiring, then catalog, then the loops. The engine refuses to
// start on a corrupt snapshot (exit 2) and refuses to trade live without a
// catalog (exit 1).
//
// Exit codes: 0 normal shutdown; 1 configuration/startup failure;
// 2 reconciliation/state failure; 3 unrecoverable broker auth failure.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod app_state;
mod broker;
mod engine;
mod execution;
mod expiry;
mod fees;
mod instruments;
mod market_clock;
mod portfolio;
mod quotes;
mod risk;
mod runtime_config;
mod signals;
mod sizing;
mod state_store;
mod types;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::broker::adapter::{BrokerError, BrokerGateway};
use crate::broker::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::broker::http::HttpBrokerGateway;
use crate::broker::rate_limit::TokenBucket;
use crate::broker::resilient::ResilientGateway;
use crate::engine::TradingLoop;
use crate::execution::{ExecutorConfig, OrderExecutor};
use crate::market_clock::SessionState;
use crate::portfolio::Portfolio;
use crate::runtime_config::RuntimeConfig;
use crate::signals::SignalAggregator;
use crate::state_store::StateStore;
use crate::types::{EngineMode, Exchange};

const CONFIG_PATH: &str = "vajra_config.json";
const BAN_LIST_PATH: &str = "fno_ban_list.txt";

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_RECONCILIATION: i32 = 2;
const EXIT_AUTH: i32 = 3;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           Vajra F&O Nexus — Starting Up                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Override the scan universe from env if available.
    if let Ok(symbols) = std::env::var("VAJRA_UNDERLYINGS") {
        config.allowed_underlyings = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    info!(
        mode = %config.mode,
        underlyings = ?config.allowed_underlyings,
        initial_capital = config.initial_capital_paise,
        "engine configuration"
    );

    // ── 2. Restore the ledger from the last snapshot ─────────────────────
    let store = Arc::new(StateStore::new(config.state_file.clone()));
    let restored = if config.mode == EngineMode::Paper && config.paper_reset_on_start {
        info!("paper_reset_on_start set — ignoring persisted snapshot");
        None
    } else {
        match store.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "state snapshot failed validation — refusing to start");
                return EXIT_RECONCILIATION;
            }
        }
    };

    let (portfolio, parked_orders) = match restored {
        Some(snapshot) => {
            let orders: Vec<_> = snapshot.open_orders.values().cloned().collect();
            match Portfolio::restore(snapshot.cash, snapshot.positions, snapshot.realized_pnl_day)
            {
                Ok(p) => (Arc::new(p), orders),
                Err(e) => {
                    error!(error = %e, "restored ledger violates the integrity equation");
                    return EXIT_RECONCILIATION;
                }
            }
        }
        None => (
            Arc::new(Portfolio::new(types::Paise::from_paise(
                config.initial_capital_paise,
            ))),
            Vec::new(),
        ),
    };

    // ── 3. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::with_portfolio(config.clone(), portfolio));

    // ── 4. Broker gateway (rate-limited, circuit-broken) ─────────────────
    let http_gateway = match HttpBrokerGateway::from_env() {
        Ok(gw) => gw,
        Err(e) if config.mode.is_live() => {
            error!(error = %e, "live mode requires broker credentials in the environment");
            return EXIT_CONFIG;
        }
        Err(e) => {
            warn!(error = %e, "broker credentials absent — quotes will fail until configured");
            HttpBrokerGateway::new("https://gateway.invalid", "", "")
        }
    };

    let gateway: Arc<dyn BrokerGateway> = Arc::new(ResilientGateway::new(
        Arc::new(http_gateway),
        TokenBucket::new(
            config.rate_limit_per_second,
            config.rate_limit_burst,
            config.rate_limit_per_minute,
        ),
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.circuit_breaker_failure_threshold,
            failure_window: Duration::from_secs(60),
            open_for: Duration::from_secs(config.cb_open_seconds),
        }),
    ));

    // ── 5. Instruments catalog ───────────────────────────────────────────
    match refresh_catalog(&state, &gateway).await {
        Ok(()) => {}
        Err(BrokerError::Auth(msg)) => {
            error!(error = %msg, "broker rejected credentials");
            return EXIT_AUTH;
        }
        Err(e) => warn!(error = %e, "initial catalog refresh failed"),
    }
    if state.catalog.is_empty() && config.mode.is_live() {
        error!("no instruments catalog available — refusing to trade live");
        return EXIT_CONFIG;
    }

    // ── 6. Executor & startup reconciliation ─────────────────────────────
    let executor = Arc::new(OrderExecutor::new(
        gateway.clone(),
        state.portfolio.clone(),
        state.risk_gate.clone(),
        state.clock.clone(),
        state.quotes.clone(),
        state.catalog.clone(),
        config.fee_model,
        ExecutorConfig {
            mode: config.mode,
            order_timeout: Duration::from_secs(config.order_timeout_seconds),
            paper_slippage_ticks: config.paper_slippage_ticks,
        },
    ));

    if !parked_orders.is_empty() {
        executor.restore_open_orders(parked_orders);
        if config.mode.is_live() {
            // Live mode: resolve fills that completed while we were down.
            let resolved = executor.reconcile_parked().await;
            info!(resolved, "startup order reconciliation completed");
        }
        if let Err(e) = state.portfolio.verify_integrity() {
            error!(error = %e, "ledger integrity violated after reconciliation");
            return EXIT_RECONCILIATION;
        }
    }

    // ── 7. Signal ensemble ───────────────────────────────────────────────
    // Strategy implementations are external; an empty ensemble leaves the
    // engine monitoring exits only.
    let aggregator = Arc::new(SignalAggregator::new(
        Vec::new(),
        config.min_confidence,
        config.min_agreement,
    ));
    if aggregator.is_empty() {
        warn!("no strategies configured — entry scanning idle, exits still monitored");
    }

    // ── 8. Spawn loops ───────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let engine = Arc::new(TradingLoop::new(
        state.clone(),
        executor,
        gateway.clone(),
        aggregator,
        store,
    ));

    let trading_handle = tokio::spawn(engine.clone().run(shutdown_rx.clone()));
    let monitor_handle = tokio::spawn(engine.clone().run_monitor(shutdown_rx.clone()));

    // Ban-list refresher: regulator dump in a flat file, one underlying per
    // line; the prior list is retained when the file cannot be read.
    {
        let ban_state = state.clone();
        let mut rx = shutdown_rx.clone();
        let refresh = Duration::from_secs(config.ban_refresh_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(refresh);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match std::fs::read_to_string(BAN_LIST_PATH) {
                            Ok(content) => {
                                let banned: HashSet<String> = content
                                    .lines()
                                    .map(|l| l.trim().to_uppercase())
                                    .filter(|l| !l.is_empty())
                                    .collect();
                                ban_state.risk_gate.update_ban_list(banned);
                            }
                            Err(e) => {
                                warn!(error = %e, path = BAN_LIST_PATH, "ban list refresh failed — retaining prior list");
                            }
                        }
                    }
                    _ = rx.changed() => { if *rx.borrow() { break; } }
                }
            }
        });
    }

    // Daily catalog refresh at the pre-open boundary.
    {
        let refresh_state = state.clone();
        let refresh_gateway = gateway.clone();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let due = refresh_state.clock.current() == SessionState::PreOpen
                            && refresh_state
                                .catalog
                                .last_refresh()
                                .map_or(true, |t| t.date_naive() < refresh_state.clock.today_ist());
                        if due {
                            if let Err(e) = refresh_catalog(&refresh_state, &refresh_gateway).await {
                                warn!(error = %e, "pre-open catalog refresh failed — retaining previous catalog");
                            }
                        }
                    }
                    _ = rx.changed() => { if *rx.borrow() { break; } }
                }
            }
        });
    }

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 9. Graceful shutdown ─────────────────────────────────────────────
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    warn!("shutdown signal received — draining loops");
    let _ = shutdown_tx.send(true);

    let _ = trading_handle.await;
    let _ = monitor_handle.await;

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("Vajra F&O Nexus shut down complete");
    EXIT_OK
}

/// Fetch the instruments dump for every segment we trade and swap the
/// catalog. Failures propagate; the previous generation stays installed.
async fn refresh_catalog(
    state: &Arc<AppState>,
    gateway: &Arc<dyn BrokerGateway>,
) -> Result<(), BrokerError> {
    let mut all = Vec::new();
    for exchange in [Exchange::Nse, Exchange::Nfo] {
        let batch = gateway.instruments(exchange).await?;
        info!(exchange = %exchange, count = batch.len(), "instruments segment fetched");
        all.extend(batch);
    }
    state.catalog.replace_all(all);
    Ok(())
}

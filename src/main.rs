// ============================================================================
// BANKINGMAP TOKEN GATEWAY
// ============================================================================
//
// REST facade over the BMT reward token contract on Tezos.
//
// Run:  LEDGER_BACKEND=sandbox cargo run
// Test: curl http://localhost:3000/tezos/tokenSupply

use std::io::ErrorKind;

use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bmt_gateway::bootstrap::{build_coordinator, connect_ledger};
use bmt_gateway::{build_router, AppState, GatewayConfig, LedgerClient};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// GRACEFUL SHUTDOWN
// ============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("🛑 Shutdown signal received");
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() {
    // 1. Environment + logging
    GatewayConfig::load_dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,bmt_gateway=debug")))
        .with(tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true))
        .init();

    // 2. Configuration
    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ FATAL: {}", e);
            std::process::exit(1);
        }
    };

    info!("╔══════════════════════════════════════════════════════╗");
    info!("║         BANKINGMAP TOKEN GATEWAY v{}              ║", VERSION);
    info!("╚══════════════════════════════════════════════════════╝");
    info!("   Environment: {}", config.environment);
    info!("   Backend:     {:?}", config.backend);
    info!("   Depth:       {} block(s), timeout {:?}", config.confirmation_depth, config.confirmation_timeout);

    // 3. Ledger + signer
    let ledger = match connect_ledger(&config).await {
        Ok(ledger) => ledger,
        Err(e) => {
            error!("❌ FATAL: {}", e);
            std::process::exit(1);
        }
    };
    match ledger.describe().await {
        Ok(info) => info!("🔗 {} on {} (head {}), signer {}", info.contract, info.network, info.head_level, info.signer),
        Err(e) => warn!("Startup ledger check failed: {}", e),
    }

    // 4. Coordinator + router
    let coordinator = build_coordinator(&config, ledger);
    let app = build_router(AppState { coordinator }, &config.static_dir);

    // 5. HTTP server
    let addr = config.bind_addr;
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            match e.kind() {
                ErrorKind::AddrInUse => error!("❌ {} is already in use", addr),
                ErrorKind::PermissionDenied => error!("❌ {} requires elevated privileges", addr),
                _ => error!("❌ Cannot listen on {}: {}", addr, e),
            }
            std::process::exit(1);
        }
    };

    info!("");
    info!("🚀 Listening on http://{}", addr);
    info!("");
    info!("📡 ENDPOINTS:");
    info!("   GET  /tezos/test                Ledger connection summary");
    info!("   GET  /tezos/tokenSupply         Total BMT supply");
    info!("   GET  /tezos/balance             Balance (?walletAddress=)");
    info!("   POST /tezos/performReward       Credit reward amount");
    info!("   POST /tezos/creditAmount        Credit explicit amount");
    info!("   POST /tezos/spendTokens         Debit spend amount");
    info!("   POST /tezos/debitAmount         Debit explicit amount");
    info!("   GET  /*                         Static files from {}", config.static_dir.display());
    info!("");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("❌ Server error: {}", e);
        std::process::exit(1);
    }

    info!("✅ Server shutdown complete");
}

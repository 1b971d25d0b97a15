// =============================================================================
// Copy-Trade Fleet Engine — Main Entry Point
// =============================================================================
//
// Boots one headed browser Session per configured credential, brings each
// through the lifecycle lattice to READY, then starts the health monitor,
// restart loop, reconciliation sweep, and dashboard/webhook API server.
// =============================================================================

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    copytrade_fleet::run().await
}

//! zkID Verifier Server
//!
//! Issues zero-knowledge authentication requests and verifies the proof
//! tokens wallets send back.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zkid_verifier::{
    config::Config,
    handlers::{self, AppState},
    protocol::Verifier,
    services::{
        blockchain::EthStateResolver, keys::FsKeyLoader, schema::HttpSchemaLoader,
        sessions::RequestRegistry, state::ResolverRegistry,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zkid_verifier=debug,server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting zkID Verifier Server");
    tracing::info!("Verifier DID: {}", config.verifier_did);
    tracing::info!("Verification keys: {}", config.keys_dir.display());

    // State resolvers, one per configured chain
    let mut resolvers = ResolverRegistry::new(config.retry_policy());
    for resolver in &config.resolvers {
        tracing::info!(
            "State resolver {}: {} ({})",
            resolver.label,
            resolver.rpc_url,
            resolver.contract_address
        );
        let eth = EthStateResolver::new(&resolver.rpc_url, &resolver.contract_address)?;
        resolvers.register(resolver.label.clone(), Arc::new(eth));
    }

    let verifier = Verifier::new(Arc::new(FsKeyLoader::new(&config.keys_dir)), resolvers)
        .with_options(config.verify_options());

    let registry = Arc::new(RequestRegistry::new(config.session_ttl(), config.max_sessions));
    Arc::clone(&registry).spawn_reaper(Duration::from_secs(30));

    let schemas = Arc::new(HttpSchemaLoader::new(config.ipfs_gateway.clone(), config.retry_policy()));

    let port = config.port;
    let state = AppState::new(config, verifier, registry, schemas);
    let app = handlers::router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

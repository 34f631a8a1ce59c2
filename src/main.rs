//! # Quota Relay
//!
//! A relay service that sponsors gas for smart-contract profiles, metered by
//! delegated monthly quotas.
use alloy::{
    network::EthereumWallet,
    primitives::Address,
    providers::{Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
};
use clap::Parser;
use http::header;
use jsonrpsee::server::Server;
use quota_relay::{
    chain::ProviderAdapter,
    config::RelayConfig,
    metrics::{build_exporter, MetricsService},
    rpc::{Relay, RelayApiServer},
    storage::RelayStorage,
    transactions::ExecutionService,
};
use sqlx::postgres::PgPoolOptions;
use std::{net::IpAddr, str::FromStr, sync::Arc};
use tower::{layer::layer_fn, ServiceBuilder};
use tower_http::cors::{AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

/// The quota relay service sponsors gas for smart-contract profiles.
#[derive(Debug, Parser)]
#[command(author, about = "Quota Relay", long_about = None)]
struct Args {
    /// The address to serve the RPC on.
    #[arg(long = "http.addr", value_name = "ADDR", default_value = "127.0.0.1")]
    address: IpAddr,
    /// The port to serve the RPC on.
    #[arg(long = "http.port", value_name = "PORT", default_value_t = 9119)]
    port: u16,
    /// The RPC endpoint of the chain to relay transactions to.
    /// Must be a valid HTTP or HTTPS URL pointing to an Ethereum JSON-RPC endpoint.
    #[arg(long, value_name = "RPC_ENDPOINT")]
    upstream: Url,
    /// The address of the permission registry contract.
    #[arg(long, value_name = "ADDRESS")]
    gate: Address,
    /// Monthly gas allowance granted to new profile quotas.
    #[arg(long, value_name = "GAS", default_value_t = quota_relay::constants::DEFAULT_MONTHLY_ALLOWANCE)]
    default_allowance: u64,
    /// The secret key of the funded relayer wallet.
    #[arg(long, value_name = "SECRET_KEY", env = "RELAY_SK")]
    secret_key: String,
    /// Postgres database URL. Falls back to in-memory storage when unset.
    #[arg(long, value_name = "URL", env = "DATABASE_URL")]
    database_url: Option<String>,
}

impl Args {
    fn config(&self) -> RelayConfig {
        RelayConfig::default()
            .with_address(self.address)
            .with_port(self.port)
            .with_upstream(self.upstream.clone())
            .with_gate(self.gate)
            .with_default_allowance(self.default_allowance)
            .with_database_url(self.database_url.clone())
    }

    /// Run the relay service.
    async fn run(self) -> eyre::Result<()> {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .init();

        let config = self.config();

        // setup metrics
        let handle = build_exporter();

        // construct the relayer wallet and provider
        let signer = PrivateKeySigner::from_str(self.secret_key.trim())?;
        let relayer = signer.address();
        let wallet = EthereumWallet::from(signer);
        let provider =
            ProviderBuilder::new().wallet(wallet).connect_http(config.upstream.clone()).erased();

        // construct storage
        let storage = match &config.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new().connect(url).await?;
                sqlx::migrate!().run(&pool).await?;
                RelayStorage::pg(pool, config.default_allowance)
            }
            None => RelayStorage::in_memory(config.default_allowance),
        };

        // spawn the asynchronous executor and construct the rpc module
        let adapter = Arc::new(ProviderAdapter::new(provider, config.gate));
        let executor = ExecutionService::spawn(storage.clone(), adapter.clone());
        let rpc = Relay::new(storage, adapter, executor, relayer).into_rpc();

        // http layers
        let cors = CorsLayer::new()
            .allow_methods(AllowMethods::any())
            .allow_origin(AllowOrigin::any())
            .allow_headers([header::CONTENT_TYPE]);
        let metrics = layer_fn(move |service| MetricsService::new(service, handle.clone()));

        // start server
        let server = Server::builder()
            .http_only()
            .set_http_middleware(ServiceBuilder::new().layer(cors).layer(metrics))
            .build((config.server.address, config.server.port))
            .await?;
        info!(addr = %server.local_addr()?, "Started relay service");
        info!("Relayer wallet: {relayer}");

        let handle = server.start(rpc);
        handle.stopped().await;

        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(err) = args.run().await {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use walletgate::Config;
use walletgate::auth::{MemoryNonceStore, NonceStore, SiweVerifier};
use walletgate::config::NonceStoreConfig;
use walletgate::db::connect_vector_store;
use walletgate::metrics::Metrics;
use walletgate::session::SessionManager;
use walletgate::vector::SimilarityService;
use walletgate::web::{AppState, start_server};

#[derive(Parser, Debug)]
#[command(name = "walletgate", version)]
#[command(about = "Sign-In with Ethereum gateway with sealed cookie sessions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve {
        /// Bind address, overrides WALLETGATE_HOST
        #[arg(long)]
        host: Option<String>,
        /// Bind port, overrides WALLETGATE_PORT
        #[arg(long)]
        port: Option<u16>,
        /// Emit logs as JSON lines
        #[arg(long)]
        log_json: bool,
    },
    /// Resolve configuration from the environment and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
        log_json: false,
    }) {
        Command::Serve {
            host,
            port,
            log_json,
        } => {
            init_tracing(log_json);
            serve(host, port).await
        }
        Command::CheckConfig => {
            init_tracing(false);
            check_config()
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("walletgate=info,tower_http=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn check_config() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    println!("configuration ok");
    println!("  listen:       {}:{}", config.http.host, config.http.port);
    println!(
        "  domain:       {}",
        config.auth.domain.as_deref().unwrap_or("(request host)")
    );
    println!("  chain id:     {}", config.auth.default_chain_id);
    println!(
        "  nonce store:  {}",
        match config.nonce_store {
            NonceStoreConfig::Memory => "memory",
            NonceStoreConfig::Redis { .. } => "redis",
        }
    );
    println!("  vector store: {:?}", config.vector.backend);
    println!("  dimension:    {}", config.vector.dimension);
    Ok(())
}

async fn serve(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = Config::from_env().context("invalid configuration")?;
    if let Some(host) = host {
        config.http.host = host;
    }
    if let Some(port) = port {
        config.http.port = port;
    }

    let metrics = Metrics::new().context("failed to build metrics registry")?;
    let nonces = build_nonce_store(&config.nonce_store).await?;
    let store = connect_vector_store(&config.database, &config.vector)
        .await
        .context("failed to open vector store")?;

    let state = Arc::new(AppState::new(
        SiweVerifier::new(config.auth.clone(), nonces, metrics.clone()),
        SessionManager::new(
            config.session.clone(),
            config.auth.default_chain_id,
            metrics.clone(),
        )
        .context("failed to derive session key")?,
        SimilarityService::new(store, &config.vector, metrics.clone()),
        metrics,
        config.http.message_rate_limit,
    ));

    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.http.host, config.http.port
            )
        })?;
    start_server(addr, state.clone()).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    state.shutdown().await;
    Ok(())
}

async fn build_nonce_store(config: &NonceStoreConfig) -> anyhow::Result<Arc<dyn NonceStore>> {
    match config {
        NonceStoreConfig::Memory => {
            tracing::info!("Using in-memory nonce store");
            Ok(Arc::new(MemoryNonceStore::new()))
        }
        #[cfg(feature = "redis")]
        NonceStoreConfig::Redis { url } => {
            let store = walletgate::auth::RedisNonceStore::connect(url)
                .await
                .context("failed to connect to Redis")?;
            tracing::info!("Using Redis nonce store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        NonceStoreConfig::Redis { .. } => {
            anyhow::bail!("REDIS_URL is set but walletgate was built without the redis feature")
        }
    }
}

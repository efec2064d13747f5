//! Tally credential and session server binary.
//!
//! Serves the `/auth` HTTP surface over either the embedded key-value store
//! or SQLite, selected at startup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tally_api::config::{ApiConfig, StoreBackend};
use tally_core::auth::SessionService;
use tally_core::store::CredentialStore;
use tally_core::store::kv::KvStore;
use tally_core::store::sql::SqlStore;
use tracing::{info, warn};

/// CLI arguments. Flags override the environment read by `ApiConfig`.
#[derive(Parser, Debug)]
#[command(name = "tally_server", about = "Tally credential and session server")]
struct Args {
    /// Port to listen on. Overrides the port of `BIND_ADDR`.
    #[arg(long)]
    port: Option<u16>,

    /// Credential store backend: `kv` or `sql`.
    #[arg(long, env = "STORE_BACKEND")]
    backend: Option<StoreBackend>,

    /// SQLite connection URL for the sql backend.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Persistence file for the kv backend. Omit to keep it in memory.
    #[arg(long, env = "KV_PATH")]
    kv_path: Option<PathBuf>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tally_api=debug,tally_core=debug".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = ApiConfig::from_env()?;
    if let Some(port) = args.port {
        let host = config
            .bind_addr
            .rsplit_once(':')
            .map_or("127.0.0.1", |(host, _)| host);
        config.bind_addr = format!("{host}:{port}");
    }
    if let Some(backend) = args.backend {
        config.store_backend = backend;
    }
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    if args.kv_path.is_some() {
        config.kv_path = args.kv_path;
    }

    info!(?config, "starting tally_server");

    let store: Arc<dyn CredentialStore> = match config.store_backend {
        StoreBackend::Kv => match &config.kv_path {
            Some(path) => Arc::new(KvStore::open(path)?),
            None => {
                warn!("kv backend without KV_PATH; credentials are lost on exit");
                Arc::new(KvStore::in_memory())
            }
        },
        StoreBackend::Sql => {
            info!(max_connections = args.max_connections, "connecting to database");
            Arc::new(SqlStore::connect(&config.database_url, args.max_connections).await?)
        }
    };

    let service = SessionService::builder(
        store,
        config.access_key.clone(),
        config.refresh_secret.clone().into_bytes(),
    )
    .options(config.session.clone())
    .build()?;

    let state = tally_api::AppState::new(service);
    let shutdown = state.shutdown.clone();
    let app = tally_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested, cancelling in-flight requests");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

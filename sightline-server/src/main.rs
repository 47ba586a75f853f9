use std::sync::Arc;

use clap::Parser;
use sightline_core::{
    MemoryStore, PgStore, ProviderRegistry, SightlineConfig, Store, SystemClock,
};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use sightline_server::subsystems::jobs::run_recompute_loop;
use sightline_server::{server, AppContext};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "sightline.toml")]
    config: String,

    /// Check the store connection and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Provider keys usually come from .env in development
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match SightlineConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.service.log_level.clone()));
    fmt().with_env_filter(filter).init();

    let store: Arc<dyn Store> = match config.database.backend.as_str() {
        "memory" => {
            tracing::warn!("Using in-memory store; data is lost on exit");
            Arc::new(MemoryStore::new())
        }
        _ => {
            let pool = match sightline_core::db::create_pool(&config.database).await {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("Failed to connect to database: {}", e);
                    std::process::exit(1);
                }
            };
            let store = PgStore::new(pool);
            store.migrate().await?;
            Arc::new(store)
        }
    };

    if args.health {
        match store.health().await {
            Ok(v) => println!("✅ Store connected: {}", v),
            Err(e) => {
                println!("❌ Store connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Sightline health check passed");
        return Ok(());
    }

    let registry = ProviderRegistry::from_config(&config.providers);
    let ctx = AppContext::new(store, registry, Arc::new(SystemClock), config.clone());

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    if config.jobs.enabled {
        tokio::spawn(run_recompute_loop(
            ctx.jobs.clone(),
            config.jobs.clone(),
            tx.subscribe(),
        ));
    }

    if config.http.enabled {
        let http_ctx = ctx.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = sightline_server::http::start_http_server(http_ctx, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = config.service.socket_path.clone();
    server::run_unix_server(&socket_path, ctx, tx.subscribe()).await?;

    Ok(())
}

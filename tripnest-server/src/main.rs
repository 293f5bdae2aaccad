use clap::Parser;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};
use tripnest_core::TripnestConfig;

use tripnest_server::subsystems::session;
use tripnest_server::{server, AppContext};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "tripnest.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present; API keys usually live there in development
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match TripnestConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Wire collaborators
    let ctx = match AppContext::from_config(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Failed to initialise collaborators: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match ctx.store.health_check().await {
            Ok(v) => println!("✅ {} store connected: {}", ctx.store.backend_name(), v),
            Err(e) => {
                println!("❌ {} store check failed: {}", ctx.store.backend_name(), e);
                std::process::exit(1);
            }
        }
        println!("✅ Auth provider: {}", ctx.auth.name());
        println!("✅ Uploader: {}", ctx.uploader.name());
        println!("✅ TripNest health check passed");
        return Ok(());
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();
    let listener_cancel = CancellationToken::new();
    let cancel_on_signal = listener_cancel.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        cancel_on_signal.cancel();
        let _ = shutdown_tx.send(());
    });

    // Follow sign-in / sign-out and drop user-scoped cache entries
    session::spawn_session_listener(ctx.clone(), listener_cancel.clone());

    // HTTP API if enabled
    if ctx.config.http.enabled {
        let http_ctx = ctx.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = tripnest_server::http::start_http_server(http_ctx, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = ctx.config.service.socket_path.clone();
    server::run_unix_server(&socket_path, ctx, tx.subscribe()).await?;
    listener_cancel.cancel();

    Ok(())
}

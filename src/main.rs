mod auth;
mod config;
mod routes;
mod state;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use config::{generate_config_template, Config};
use ws::gateway::RealtimeGateway;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "ladle_realtime=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "ladle_realtime=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!(
        "Ladle real-time gateway v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    std::fs::create_dir_all(&config.data_dir)?;
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Construct the gateway and start the liveness sweep
    let gateway = Arc::new(RealtimeGateway::new(Duration::from_secs(
        config.sweep_interval_secs,
    )));
    gateway.start();

    let app_state = state::AppState {
        jwt_secret,
        gateway: gateway.clone(),
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // Stop the sweep and force-close every tracked connection
    gateway.shutdown();

    Ok(())
}

//! HomeMaid service binary.
//!
//! Loads layered configuration, registers the enabled plugins and runs the
//! polling loop over the configured transport (`transport.kind: mail` for
//! IMAP/SMTP). When `server.enabled` is set, the HTTP channel runs alongside.
//!
//! # Usage
//!
//! ```bash
//! maid [ENV] [CONFIG_DIR]
//! # ENV defaults to $HOMEMAID_ENV or "production", CONFIG_DIR to "config"
//! ```
//!
//! # Environment Variables
//!
//! - `HOMEMAID_ENV`: configuration environment (selects `{env}.yaml`)
//! - `RUST_LOG`: tracing filter (default: `system.log_level`)

use homemaid::config::TransportKind;
use homemaid::{server, transport};
use homemaid::{App, ConfigManager, Logger};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let env = args
        .next()
        .or_else(|| std::env::var("HOMEMAID_ENV").ok())
        .unwrap_or_else(|| "production".to_string());
    let config_dir = args.next().unwrap_or_else(|| "config".to_string());

    let mut manager = ConfigManager::new(&config_dir);
    manager.load(&env)?;
    let config = manager.app_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.system.log_level.clone().into()),
        )
        .init();

    tracing::info!(
        "{} v{} starting (env: {}, config: {})",
        config.system.app_name,
        homemaid::VERSION,
        env,
        config_dir
    );

    if config.transport.kind == TransportKind::Memory {
        tracing::warn!(
            "transport.kind is 'memory': nothing feeds the polling loop, only the HTTP channel accepts messages"
        );
    }
    let transport = transport::from_settings(&config.transport, Logger::root().child("transport"))?;
    let app = App::from_config(&manager, transport).await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Interrupt received, shutting down..."),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = stop_tx.send(true);
    });

    let server_task = if config.server.enabled {
        let state = app.http_state();
        let bind = config.server.bind.clone();
        let mut stop = stop_rx.clone();
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = stop.changed().await;
            };
            if let Err(e) = server::serve(&bind, state, shutdown).await {
                tracing::error!("HTTP channel failed: {}", e);
            }
        }))
    } else {
        None
    };

    let mut stop = stop_rx;
    app.run(async move {
        let _ = stop.changed().await;
    })
    .await?;

    if let Some(task) = server_task {
        let _ = task.await;
    }
    tracing::info!("Goodbye");
    Ok(())
}

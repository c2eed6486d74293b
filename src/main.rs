// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::error::Error;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use relational_auth_gate::api::router;
use relational_auth_gate::config::Config;
use relational_auth_gate::logging::init_tracing;
use relational_auth_gate::state::{key_manager, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    // Key source must resolve before serving; the JWKS itself may load lazily.
    let keys = key_manager(&config).await?;
    let shutdown = CancellationToken::new();
    let refresher = keys.spawn_refresh(config.jwks_refresh_interval, shutdown.clone());

    let state = AppState::from_config(&config, keys);
    let token_cache = state.verifier.token_cache().is_some();
    let app = router(state);

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        %addr,
        issuer = %config.issuer,
        extauth_prefix = %config.extauth_prefix,
        token_cache,
        "Relational auth gate listening (docs at /docs)"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Some(handle) = refresher {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "JWKS refresher did not stop cleanly");
        }
    }
    tracing::info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
    tracing::info!("Shutdown signal received");
}

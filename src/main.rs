// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, time::Duration};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use custody_server::{
    api::router, config::AppConfig, logging::init_tracing, reaper::RecoveryReaper,
    state::AppState,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Time in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    init_tracing();

    // Install the ring crypto provider for rustls (must be done before any TLS operations)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .expect("Failed to parse bind address");
    let tls = config.tls.clone();
    let execution_window = config.recovery_execution_window;
    let sweep_interval = config.recovery_sweep_interval;

    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "Failed to initialize application state");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let reaper = RecoveryReaper::new(
        state.storage_handle(),
        state.index_handle(),
        execution_window,
        sweep_interval,
    );
    let reaper_task = tokio::spawn(reaper.run(shutdown.clone()));

    let handle: Handle<SocketAddr> = Handle::new();
    tokio::spawn(shutdown_on_signal(handle.clone(), shutdown.clone()));

    let app = router(state);
    let served = match tls {
        Some(tls) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .expect("Failed to load TLS certificate and key");
            info!(%addr, "Custody server listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, rustls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        None => {
            info!(%addr, "Custody server listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
    };
    if let Err(e) = served {
        error!(error = %e, "Server failed");
    }

    shutdown.cancel();
    if let Err(e) = reaper_task.await {
        error!(error = %e, "Recovery reaper task failed");
    }
    info!("Shutdown complete");
}

async fn shutdown_on_signal(handle: Handle<SocketAddr>, shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
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
                error!(error = %e, "Failed to listen for SIGTERM");
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

    info!("Shutdown signal received");
    shutdown.cancel();
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}

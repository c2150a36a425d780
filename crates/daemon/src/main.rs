// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon entrypoint.
//!
//! The CLI forks this binary detached with `CLIER_DAEMON_MODE=1`,
//! `CLIER_CONFIG_PATH`, and `CLIER_PROJECT_ROOT` set. Exit code 0 means
//! a clean shutdown; anything non-zero is a fatal startup error.

use clier_core::Config;
use clier_daemon::listener::ListenCtx;
use clier_daemon::{env, lifecycle, Listener};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info};

fn main() {
    let code = run();
    std::process::exit(code);
}

fn run() -> i32 {
    if !env::daemon_mode() {
        eprintln!("clierd must be launched by the CLI with {}=1", env::DAEMON_MODE);
        return 2;
    }

    let config_path = match env::required_path(env::CONFIG_PATH) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("{e}");
            return 2;
        }
    };
    let project_root = match env::required_path(env::PROJECT_ROOT) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("{e}");
            return 2;
        }
    };

    // Children default their cwd to the project root.
    if let Err(e) = std::env::set_current_dir(&project_root) {
        eprintln!("cannot enter project root {}: {e}", project_root.display());
        return 1;
    }

    let paths = lifecycle::Paths::for_project(&project_root);
    let _log_guard = init_tracing(&paths);

    let config = match Config::from_json_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("config load failed: {e}");
            return 1;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("runtime init failed: {e}");
            return 1;
        }
    };
    runtime.block_on(serve(paths, config, config_path))
}

async fn serve(paths: lifecycle::Paths, config: Config, config_path: std::path::PathBuf) -> i32 {
    let (state, listener) = match lifecycle::startup(paths, config, config_path).await {
        Ok(result) => result,
        Err(e) => {
            error!("startup failed: {e}");
            return 1;
        }
    };
    let state = Arc::new(state);
    let shutdown_notify = Arc::new(Notify::new());

    let ctx = Arc::new(ListenCtx {
        state: Arc::clone(&state),
        shutdown: Arc::clone(&shutdown_notify),
    });
    tokio::spawn(Listener::new(listener, ctx).run());

    wait_for_exit(&shutdown_notify).await;
    lifecycle::shutdown(&state).await;
    0
}

#[cfg(unix)]
async fn wait_for_exit(shutdown: &Notify) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(e) => {
            error!("signal handler failed: {e}");
            shutdown.notified().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = shutdown.notified() => info!("shutdown requested over IPC"),
    }
}

#[cfg(not(unix))]
async fn wait_for_exit(shutdown: &Notify) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = shutdown.notified() => info!("shutdown requested over IPC"),
    }
}

/// Tracing to `.clier/daemon.log`, env-filtered, non-blocking.
fn init_tracing(paths: &lifecycle::Paths) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(&paths.clier_dir).ok()?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.daemon_log_path)
        .ok()?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}

// src/lib.rs

pub mod adapter;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod handler;
pub mod logging;
pub mod types;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapter::build_adapter;
use crate::cli::CliArgs;
use crate::config::{load_and_validate, ConfigFile};
use crate::engine::{ShutdownHandle, StopKind, WatchLoop};
use crate::errors::Result;
use crate::fs::RealFileSystem;
use crate::handler::build_handler;
use crate::types::BaselineStorageMode;
use crate::watch::{BaselineStore, FileBaselineStore, MemoryBaselineStore};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the resource adapter and reaction handler
/// - the baseline store
/// - the watch loop
/// - Ctrl-C / SIGTERM handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_and_validate(&config_path)?;

    let base_dir = config_root_dir(&config_path);
    let root = resolve(&base_dir, cfg.adapter.root.as_deref().unwrap_or(Path::new(".")));
    cfg.baseline.path = resolve(&base_dir, &cfg.baseline.path);
    cfg.failure_log = cfg.failure_log.map(|p| resolve(&base_dir, &p));

    if args.dry_run {
        print_dry_run(&cfg, &root);
        return Ok(());
    }

    let adapter = build_adapter(&cfg.adapter, root.clone())?;
    let handler = build_handler(&cfg.handler)?;
    let store: Box<dyn BaselineStore> = match cfg.baseline.storage {
        BaselineStorageMode::File => Box::new(FileBaselineStore::new(
            cfg.baseline.path.clone(),
            Arc::new(RealFileSystem),
        )),
        BaselineStorageMode::Memory => Box::new(MemoryBaselineStore::new()),
    };

    let (shutdown, shutdown_rx) = ShutdownHandle::channel();
    spawn_signal_listener(shutdown);

    info!(root = ?root, adapter = ?cfg.adapter.kind, handler = ?cfg.handler.kind, "starting watch");
    let watch_loop = WatchLoop::new(&cfg, adapter, handler, store, shutdown_rx, args.once)?;
    let report = watch_loop.run().await?;

    if args.once {
        println!(
            "changes delivered: {}, terminal failures: {}, units observed: {}",
            report.stats.delivered, report.stats.terminal_failures, report.units_observed
        );
    }
    if !report.degraded.is_empty() {
        warn!(units = ?report.degraded, "units left degraded by terminal dispatch failures");
    }

    Ok(())
}

/// Figure out the directory relative paths in the config are resolved from.
///
/// - If the config path has a non-empty parent (e.g. "configs/Changewatch.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Changewatch.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// First signal drains, the second forces.
fn spawn_signal_listener(shutdown: ShutdownHandle) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = wait_for_stop_signal().await {
                warn!(error = %e, "failed to listen for stop signals");
                return;
            }
            match shutdown.escalate() {
                StopKind::Graceful => {
                    info!("stop signal received; draining (signal again to force)")
                }
                StopKind::Force => {
                    warn!("second stop signal received; forcing stop");
                    return;
                }
            }
        }
    });
}

#[cfg(unix)]
async fn wait_for_stop_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Simple dry-run output: print the effective settings.
fn print_dry_run(cfg: &ConfigFile, root: &Path) {
    println!("changewatch dry-run");
    println!();

    println!("[watch]");
    println!("  poll_interval = {:?}", cfg.watch.poll_interval);
    println!("  quiet_window = {:?}", cfg.watch.quiet_window);
    match cfg.watch.max_wait {
        Some(max_wait) => println!("  max_wait = {max_wait:?}"),
        None => println!("  max_wait = (none)"),
    }
    println!("  absence_confirm_count = {}", cfg.watch.absence_confirm_count);

    println!("[dispatch]");
    println!("  retry_base_delay = {:?}", cfg.dispatch.retry_base_delay);
    println!("  retry_max_delay = {:?}", cfg.dispatch.retry_max_delay);
    println!("  max_attempts = {}", cfg.dispatch.max_attempts);
    println!("  handler_timeout = {:?}", cfg.dispatch.handler_timeout);
    println!("  concurrency = {}", cfg.dispatch.concurrency);

    println!("[shutdown]");
    println!("  drain_mode = {:?}", cfg.shutdown.drain_mode);
    println!("  drain_grace_timeout = {:?}", cfg.shutdown.drain_grace_timeout);

    println!("[adapter]");
    println!("  kind = {:?}", cfg.adapter.kind);
    println!("  root = {}", root.display());
    println!("  include = {:?}", cfg.adapter.include);
    if !cfg.adapter.exclude.is_empty() {
        println!("  exclude = {:?}", cfg.adapter.exclude);
    }
    println!("  observe_timeout = {:?}", cfg.adapter.observe_timeout);
    println!("  reconnect_attempts = {}", cfg.adapter.reconnect_attempts);

    println!("[handler]");
    println!("  kind = {:?}", cfg.handler.kind);
    if let Some(cmd) = &cfg.handler.cmd {
        println!("  cmd = {cmd}");
    }

    println!("[baseline]");
    println!("  storage = {:?}", cfg.baseline.storage);
    if cfg.baseline.storage == BaselineStorageMode::File {
        println!("  path = {}", cfg.baseline.path.display());
    }
    if let Some(path) = &cfg.failure_log {
        println!("[failures]");
        println!("  path = {}", path.display());
    }

    debug!("dry-run complete (nothing watched)");
}

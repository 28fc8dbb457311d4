//! # Server binary
//!
//! Parses CLI flags, loads any existing snapshot, runs the accept loop and
//! the expiration collector side by side, and saves a snapshot on shutdown.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use hkv_common::clock::SystemClock;
use hkv_engine::{collector, Store};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hkv_server::connection;
use hkv_server::dispatch::Dispatcher;

const DEFAULT_PORT: u16 = 6379;

struct Config {
    port: u16,
    save_prefix: Option<PathBuf>,
}

impl Config {
    fn from_args() -> Result<Option<Self>, String> {
        let mut port = DEFAULT_PORT;
        let mut save_prefix = None;

        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-h" | "--help" => return Ok(None),
                "--port" => {
                    let raw = args.next().ok_or("--port needs a value")?;
                    port = raw.parse().map_err(|_| format!("invalid --port value: {raw}"))?;
                }
                "--save" => {
                    let raw = args.next().ok_or("--save needs a path prefix")?;
                    save_prefix = Some(PathBuf::from(raw));
                }
                other => return Err(format!("unknown argument: {other}")),
            }
        }

        Ok(Some(Config { port, save_prefix }))
    }
}

fn print_help() {
    println!("hkv-server [--port <port>] [--save <path-prefix>]");
    println!();
    println!("  --port <port>   TCP port to listen on (default {DEFAULT_PORT})");
    println!("  --save <prefix> snapshot file prefix; loaded at startup, saved at shutdown");
    println!("  -h, --help      print this message");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::from_args() {
        Ok(Some(config)) => config,
        Ok(None) => {
            print_help();
            return Ok(());
        }
        Err(msg) => {
            eprintln!("{msg}");
            print_help();
            std::process::exit(2);
        }
    };

    let store = Arc::new(Store::new(Arc::new(SystemClock), config.save_prefix.clone()));
    store.load().context("failed to load snapshot at startup")?;

    let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(SystemClock)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collector_handle = tokio::spawn(collector::run(store.clone(), shutdown_rx));

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    info!(port = config.port, "hkv-server listening");

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted?;
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    if let Err(err) = connection::handle_connection(stream, dispatcher, peer_addr).await {
                        warn!(%err, %peer_addr, "connection ended with an error");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = collector_handle.await;

    if let Err(err) = store.save() {
        error!(%err, "failed to save snapshot at shutdown");
    }

    Ok(())
}

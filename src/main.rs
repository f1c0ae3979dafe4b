//! Transparent HTTP forward proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                    FORWARD PROXY                      │
//!                      │                                                       │
//!   Client Request     │  ┌──────────┐    ┌──────────┐    ┌──────────────┐    │
//!   ───────────────────┼─▶│   net    │───▶│  client  │───▶│     http     │    │
//!                      │  │ listener │    │  driver  │    │  inspector   │    │
//!                      │  └──────────┘    └──────────┘    └──────┬───────┘    │
//!                      │                                         │            │
//!                      │                                         ▼            │
//!                      │                  ┌──────────┐    ┌──────────────┐    │
//!                      │                  │   dns    │◀───│   session    │    │
//!                      │                  │  cache   │    │ state machine│    │
//!                      │                  └──────────┘    └──────┬───────┘    │
//!                      │                                         │            │
//!   Client Response    │                  ┌──────────┐           ▼            │
//!   ◀──────────────────┼──────────────────│ download │◀──── upstream :80 ◀────┼── Origin
//!                      │                  └──────────┘  upload ────────────▶  │
//!                      └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```text
//! forward-proxy [-port <n>]
//! ```
//!
//! The default port is 50055. Further settings come from the TOML file named
//! by `FORWARD_PROXY_CONFIG`; `RUST_LOG` overrides the configured log level.

use std::ffi::OsString;
use std::net::SocketAddr;

use clap::Parser;

use forward_proxy::config::load_from_env;
use forward_proxy::lifecycle::{signals, Shutdown};
use forward_proxy::net::Listener;
use forward_proxy::observability::{logging, metrics};
use forward_proxy::ProxyServer;

#[derive(Parser, Debug)]
#[command(name = "forward-proxy")]
#[command(about = "Transparent HTTP forward proxy", long_about = None)]
struct Cli {
    /// TCP port to accept client connections on
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,
}

/// Accept the single-dash `-port` spelling alongside `--port`.
fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| match arg.to_str() {
            Some("-port") => OsString::from("--port"),
            Some(s) if s.starts_with("-port=") => OsString::from(format!("-{}", s)),
            _ => arg,
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));

    let mut config = load_from_env()?;
    if let Some(port) = cli.port {
        config.listener.port = port;
    }

    logging::init(&config.observability);
    tracing::info!("forward-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        port = config.listener.port,
        upstream_port = config.upstream.port,
        resolver_ttl_secs = config.resolver.ttl_secs,
        connect_timeout_secs = config.timeouts.connect_secs,
        idle_timeout_secs = config.timeouts.idle_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = match Listener::bind(&config.listener).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "Could not listen on port {}", config.listener.port);
            eprintln!("Could not listen on port {}: {}", config.listener.port, e);
            std::process::exit(1);
        }
    };

    let shutdown = Shutdown::new();
    let server = ProxyServer::new(config);
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        _ = signals::terminate() => {
            shutdown.trigger();
            server_task.await??;
        }
        result = &mut server_task => result??,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

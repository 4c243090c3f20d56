//! stdio-bridge - expose a line-delimited JSON-RPC stdio child over HTTP.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stdio_bridge::bridge::Bridge;
use stdio_bridge::config::{apply_env_overrides, BridgeConfig, ConfigLoader};
use stdio_bridge::http::HttpServer;
use stdio_bridge::process::{ChildCommand, ProcessSupervisor, DEFAULT_STOP_TIMEOUT};
use stdio_bridge::rpc::Correlator;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser)]
#[command(
    name = "stdio-bridge",
    about = "Expose a line-delimited JSON-RPC stdio child process over HTTP",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port (overrides config and PORT).
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen host (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Child command and arguments, replacing the configured child.
    #[arg(last = true)]
    child: Vec<String>,
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn load_config(cli: &Cli) -> Result<BridgeConfig, stdio_bridge::config::ConfigError> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path.clone()),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load()?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = &cli.host {
        config.server.host.clone_from(host);
    }
    if let Some((program, args)) = cli.child.split_first() {
        config.child.program.clone_from(program);
        config.child.args = args.to_vec();
    }
    Ok(config)
}

/// Cancel `token` on Ctrl-C or SIGTERM.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
                        _ = term.recv() => tracing::info!("Received SIGTERM"),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    tracing::info!("Received SIGINT");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received SIGINT");
        }
        token.cancel();
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let correlator = Arc::new(Correlator::new(config.rpc.request_timeout()));
    let command = ChildCommand::from_config(&config.child, &config.auth);
    let supervisor = Arc::new(
        ProcessSupervisor::new(command, correlator)
            .with_restart_policy(config.restart.policy())
            .with_max_line_bytes(config.rpc.max_line_bytes),
    );
    let bridge = Arc::new(Bridge::new(Arc::clone(&supervisor)));

    tracing::info!(
        program = %config.child.program,
        auth = config.auth.is_enabled(),
        "Starting stdio bridge"
    );
    if let Err(e) = supervisor.start().await {
        // Keep serving; /health reports 503 until an operator intervenes.
        tracing::error!(error = %e, "Failed to start child process");
    }

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let server = HttpServer::new(bridge, config.auth.clone())
        .with_config(config.server.clone())
        .with_shutdown(shutdown.clone());
    let result = server.run().await;

    shutdown.cancel();
    supervisor.stop(DEFAULT_STOP_TIMEOUT).await;

    match result {
        Ok(()) => {
            tracing::info!("Bridge stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "HTTP server failed");
            ExitCode::FAILURE
        }
    }
}

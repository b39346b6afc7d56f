#![forbid(unsafe_code)]

//! `toolbridge` — one-shot operator CLI for the compliance tool server.
//!
//! Loads configuration, connects to the tool server, invokes a single
//! operation, prints the JSON result, and disconnects. Interrupt/terminate
//! signals are wired here, once, to a single clean disconnect — the library
//! registers no process-wide handlers of its own.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use toolbridge::{AppError, BridgeConfig, Result, ToolServerClient};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "toolbridge", about = "Invoke a compliance tool-server operation", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Domain operation to invoke (e.g., `list_profiles`).
    operation: String,

    /// Operation arguments as a JSON object. Defaults to `{}`.
    arguments: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = BridgeConfig::load_from_path(&args.config)?;

    let arguments: Value = match args.arguments.as_deref() {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|err| AppError::Config(format!("arguments must be valid JSON: {err}")))?,
        None => Value::Object(serde_json::Map::new()),
    };

    let (client, mut events) = ToolServerClient::start(config);

    // Surface lifecycle events in the log while the invocation runs.
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(?event, "session event");
        }
    });

    client.connect().await?;

    let outcome = tokio::select! {
        result = client.send_request(&args.operation, arguments) => result,
        () = shutdown_signal() => {
            info!("shutdown signal received, disconnecting");
            Err(AppError::Disconnected("interrupted by signal".into()))
        }
    };

    client.disconnect().await.ok();
    client.shutdown();
    event_task.abort();

    match outcome {
        Ok(result) => {
            let rendered = serde_json::to_string_pretty(&result)
                .unwrap_or_else(|_| result.to_string());
            println!("{rendered}");
            Ok(())
        }
        Err(err) => {
            error!(%err, operation = %args.operation, "invocation failed");
            Err(err)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

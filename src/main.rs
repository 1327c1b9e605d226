use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use mira::agent::{Disposition, Dispatcher, NoopProgress, TurnInput};
use mira::config::{DispatcherConfig, IpcConfig, ServiceConfig};
use mira::ipc::{Channel, IpcClient, IpcMessage, MessageStatus};
use mira::service::BackendService;

#[derive(Parser)]
#[command(name = "mira")]
#[command(about = "Mira - guided beauty assistant backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve requests from a shared-memory channel
    Serve {
        /// Base name of the request/response segments
        #[arg(long, env = "MIRA_IPC_NAME")]
        ipc_name: Option<String>,
        /// Directory holding the segments
        #[arg(long, env = "MIRA_SHM_DIR")]
        shm_dir: Option<PathBuf>,
        /// Create the segments instead of waiting for a front end to
        #[arg(long)]
        create: bool,
    },
    /// Chat on stdin/stdout without IPC
    Chat,
    /// Send one message to a running backend and print the reply
    Ask {
        text: String,
        #[arg(long, env = "MIRA_IPC_NAME")]
        ipc_name: Option<String>,
        #[arg(long, env = "MIRA_SHM_DIR")]
        shm_dir: Option<PathBuf>,
        #[arg(long, default_value = "default")]
        thread: String,
        /// Seconds to wait for the reply
        #[arg(long, default_value_t = 120)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            ipc_name,
            shm_dir,
            create,
        } => serve(ipc_config(ipc_name, shm_dir)?, create).await,
        Commands::Chat => chat().await,
        Commands::Ask {
            text,
            ipc_name,
            shm_dir,
            thread,
            timeout,
        } => ask(ipc_config(ipc_name, shm_dir)?, text, thread, timeout).await,
    }
}

fn ipc_config(name: Option<String>, shm_dir: Option<PathBuf>) -> Result<IpcConfig> {
    let mut config = IpcConfig::from_env().context("invalid IPC configuration")?;
    if let Some(name) = name {
        config.name = name;
    }
    if let Some(dir) = shm_dir {
        config.shm_dir = dir;
    }
    Ok(config)
}

async fn serve(ipc: IpcConfig, create: bool) -> Result<()> {
    eprintln!("Mira v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   IPC: {} in {}", ipc.name, ipc.shm_dir.display());

    BackendService::serve_offline(&ipc, create, shutdown_signal())
        .await
        .with_context(|| format!("backend on IPC channel {} failed", ipc.name))?;
    Ok(())
}

async fn chat() -> Result<()> {
    let dispatcher = Dispatcher::offline(DispatcherConfig::from_env()?);
    let mut thread = dispatcher.new_chat();

    eprintln!("Mira v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   /new starts a new chat, /clear forgets this one, /quit exits.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprint!("> ");
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" => break,
            "/new" => {
                thread = dispatcher.new_chat();
                eprintln!("Started a new chat.");
            }
            "/clear" => {
                dispatcher.clear_history(&thread).await?;
                eprintln!("History cleared.");
            }
            text => {
                let outcome = dispatcher
                    .handle_turn(&thread, TurnInput::text(text), &NoopProgress)
                    .await?;
                println!("\n{}\n", outcome.reply);
                if let Disposition::Suspended { flow, step } = &outcome.disposition {
                    eprintln!("   [{flow} waiting at {step}]");
                }
            }
        }
        eprint!("> ");
    }
    Ok(())
}

async fn ask(ipc: IpcConfig, text: String, thread: String, timeout: u64) -> Result<()> {
    let channel = Channel::attach(&ipc.shm_dir, &ipc.name)
        .with_context(|| format!("no backend channel named {}", ipc.name))?;
    let client = IpcClient::new(channel, ServiceConfig::from_env()?.poll_interval);
    let request = IpcMessage::service_request(thread, text);

    let response = client
        .request(&request, Duration::from_secs(timeout), |partial| {
            eprint!("\r{partial}");
        })
        .await?;
    eprintln!();
    match response.status {
        MessageStatus::Error => {
            println!("{}", response.response_text);
            anyhow::bail!("backend error: {}", response.error_message)
        }
        _ => {
            println!("{}", response.response_text);
            Ok(())
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

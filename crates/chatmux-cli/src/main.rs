use anyhow::{Context, Result};
use chatmux_core::{ChatGateway, ChatMessage, TokenStream};
use chatmux_server::GatewayServer;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::ChatmuxConfig;

#[derive(Parser)]
#[command(name = "chatmux")]
#[command(version)]
#[command(about = "chatmux: one streaming chat endpoint over many LLM providers")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve,

    /// Stream a one-shot answer to stdout
    Ask {
        /// The message to send
        message: String,

        /// Optional system prompt
        #[arg(long)]
        system: Option<String>,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Initialize config directory and default config
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --debug
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.debug { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Serve => cmd_serve(&cli.config).await,
        Commands::Ask { message, system } => cmd_ask(&cli.config, message, system).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("chatmux initialized at {}", config_dir.display());
    println!("Edit {} to configure your providers.", config_path.display());
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = ChatmuxConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg.masked())?);
    Ok(())
}

fn build_gateway(cfg: &ChatmuxConfig) -> Result<ChatGateway> {
    let registry = chatmux_providers::build_registry(&cfg.providers)?;
    let gateway = ChatGateway::new(registry, cfg.failover.to_failover_config())?;
    info!("Gateway ready with {} providers", gateway.provider_count());
    Ok(gateway)
}

async fn cmd_serve(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = ChatmuxConfig::load(config_path)?;
    let bind = cfg.bind_addr()?;
    let gateway = build_gateway(&cfg)?;

    if cfg.server.auth_token.is_empty() {
        warn!("server.auth_token is empty; the gateway accepts unauthenticated requests");
    }

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
        }
        on_signal.cancel();
    });

    GatewayServer::new(bind, gateway, cfg.server.auth_token.clone())
        .run(shutdown)
        .await
}

async fn cmd_ask(config_path: &Option<PathBuf>, message: String, system: Option<String>) -> Result<()> {
    let cfg = ChatmuxConfig::load(config_path)?;
    let gateway = build_gateway(&cfg)?;

    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(message));

    let tokens = gateway.chat(messages)?;
    let ctrl_c = async {
        // Without a signal handler, never interrupt
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    stream_to(tokens, &mut std::io::stdout(), ctrl_c).await
}

/// Write tokens to `out` as they arrive, until the stream ends or
/// `interrupt` completes
async fn stream_to<W: Write>(
    mut tokens: TokenStream,
    out: &mut W,
    interrupt: impl Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            biased;
            _ = &mut interrupt => {
                warn!("Interrupted");
                break;
            }
            item = tokens.next() => match item {
                Some(Ok(token)) => {
                    write!(out, "{}", token.text)?;
                    out.flush()?;
                }
                Some(Err(err)) => {
                    writeln!(out)?;
                    return Err(err.into());
                }
                None => break,
            },
        }
    }
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatmux_core::{GatewayError, Token};
    use std::time::Duration;

    fn token(seq: u64, text: &str) -> Result<Token, GatewayError> {
        Ok(Token {
            seq,
            text: text.to_string(),
        })
    }

    #[tokio::test]
    async fn test_stream_to_writes_every_token() {
        let tokens = TokenStream::new(futures::stream::iter(vec![
            token(0, "hello"),
            token(1, " world"),
        ]));
        let mut out = Vec::new();
        stream_to(tokens, &mut out, std::future::pending()).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "hello world\n");
    }

    #[tokio::test]
    async fn test_stream_to_stops_on_interrupt() {
        let tokens = TokenStream::new(
            futures::stream::iter(vec![token(0, "partial")]).chain(futures::stream::pending()),
        );
        let mut out = Vec::new();
        stream_to(tokens, &mut out, tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "partial\n");
    }

    #[tokio::test]
    async fn test_stream_to_surfaces_interruption() {
        let tokens = TokenStream::new(futures::stream::iter(vec![
            token(0, "t0"),
            Err(GatewayError::StreamInterrupted {
                provider: "a".to_string(),
                delivered: 1,
                reason: "reset".to_string(),
            }),
        ]));
        let mut out = Vec::new();
        let err = stream_to(tokens, &mut out, std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GatewayError>(),
            Some(GatewayError::StreamInterrupted { delivered: 1, .. })
        ));
        assert_eq!(String::from_utf8(out).unwrap(), "t0\n");
    }
}

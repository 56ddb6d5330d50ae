//! # skein
//!
//! `skein serve` runs a WebSocket (and optionally datagram) server with a
//! couple of demo routes; `skein call` dials a server, sends one event and
//! prints the reply.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use skein_client::{Client, ClientConfig, Status};
use skein_router::{Handler, HandlerError, Router};
use skein_server::{Server, ServerConfig, ServerContext, metrics};
use skein_settings::SkeinSettings;
use tracing::{info, warn};

/// Event-routed socket runtime.
#[derive(Parser, Debug)]
#[command(name = "skein", about = "Event-routed socket runtime")]
struct Cli {
    /// Settings file (defaults to `~/.skein/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a server.
    Serve(ServeArgs),
    /// Send one event to a server and print the reply.
    Call(CallArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// WebSocket port (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Also serve datagrams on this port.
    #[arg(long)]
    udp_port: Option<u16>,

    /// Expose Prometheus metrics at `/metrics`.
    #[arg(long)]
    metrics: bool,
}

#[derive(Args, Debug)]
struct CallArgs {
    /// Server URL (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Event to send.
    #[arg(long, default_value = "echo")]
    event: String,

    /// Body to send.
    #[arg(long, default_value = "")]
    body: String,

    /// Connect and reply deadline in milliseconds.
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,
}

/// Replies with the request body under the same event.
struct Echo;

#[async_trait]
impl Handler<ServerContext> for Echo {
    async fn handle(&self, ctx: &mut ServerContext) -> Result<(), HandlerError> {
        ctx.session.reply(ctx.id, &ctx.event, &ctx.body).await?;
        Ok(())
    }
}

/// Pushes the body to every connection as `news/<topic>` and tells the
/// sender how many received it.
struct Broadcast;

#[async_trait]
impl Handler<ServerContext> for Broadcast {
    async fn handle(&self, ctx: &mut ServerContext) -> Result<(), HandlerError> {
        let topic = ctx.param("topic").unwrap_or_default().to_owned();
        let delivered = ctx.session.emit_all(&format!("news/{topic}"), &ctx.body).await;
        let body = serde_json::to_vec(&serde_json::json!({ "delivered": delivered }))
            .map_err(HandlerError::failed)?;
        ctx.session.reply(ctx.id, &ctx.event, &body).await?;
        Ok(())
    }
}

fn routes(ignore_case: bool) -> Result<Router<ServerContext>> {
    let mut router = Router::new().ignore_case(ignore_case);
    router.route("echo", Echo)?;
    router.route("broadcast/*topic", Broadcast)?;
    Ok(router)
}

fn load(path: Option<&PathBuf>) -> Result<SkeinSettings> {
    let path = path.cloned().unwrap_or_else(skein_settings::settings_path);
    skein_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))
}

async fn serve(settings: &SkeinSettings, args: ServeArgs) -> Result<()> {
    let mut config = ServerConfig::from(&settings.server);
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.udp_port.is_some() {
        config.udp_port = args.udp_port;
    }

    let mut builder = Server::builder()
        .config(config)
        .router(routes(settings.server.ignore_case)?)
        .on_open(|session| {
            info!(conn_id = session.id(), peer = ?session.connection().peer(), "client connected");
        })
        .on_close(|id, reason| info!(conn_id = id, %reason, "client disconnected"))
        .on_error(|e| warn!(error = %e, "server error"));
    if args.metrics {
        let handle = metrics::install_recorder().context("failed to install metrics recorder")?;
        builder = builder.metrics(handle);
    }
    let server = builder.build()?;
    let handle = server.start().await.context("failed to bind server")?;
    info!(addr = %handle.local_addr, udp = ?handle.udp_addr, "skein listening");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    let outcome = handle.shutdown().await;
    info!(?outcome, "shutdown complete");
    Ok(())
}

async fn call(settings: &SkeinSettings, args: CallArgs) -> Result<()> {
    let mut config = ClientConfig::from(&settings.client);
    if let Some(url) = args.url {
        config.url = url;
    }
    config.reconnect = false;
    let deadline = Duration::from_millis(args.timeout_ms);

    let client = Client::builder()
        .config(config)
        .on_open(|client| info!(url = %client.config().url, "connected"))
        .on_close(|reason| info!(%reason, "disconnected"))
        .on_error(|e| warn!(error = %e, "client error"))
        .build()?;
    let task = client.start();

    let mut status = client.watch_status();
    let _ = tokio::time::timeout(deadline, status.wait_for(|s| *s == Status::Open))
        .await
        .context("timed out connecting")?
        .context("client stopped")?;

    let reply = client
        .async_emit(&args.event, args.body.as_bytes(), deadline)
        .await;
    client.close();
    let _ = task.await;

    let reply = reply?;
    println!("{}", String::from_utf8_lossy(&reply.body));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(cli.settings.as_ref())?;

    if settings.logging.json {
        skein_core::logging::init_subscriber_json(&settings.logging.level);
    } else {
        skein_core::logging::init_subscriber(&settings.logging.level);
    }

    match cli.command {
        Command::Serve(args) => serve(&settings, args).await,
        Command::Call(args) => call(&settings, args).await,
    }
}

// SensNet node: negotiates a role with its peer and serves sensor clients.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use sensnet_node::console::{spawn_stdin_reader, ConsoleHandle};
use sensnet_node::{config, Console, Exit, Supervisor};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "sensnet-node", version, about = "SensNet location/status server node")]
struct Cli {
    /// Address to bind and to look for the peer on.
    bind_addr: Option<IpAddr>,
    /// Peer rendezvous port.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    peer_port: Option<u16>,
    /// Port sensor clients connect to.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    client_port: Option<u16>,
    /// Config file (default: ~/.config/sensnet/config.toml, then /etc/sensnet/config.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, cfg: &mut config::Config) {
        if let Some(addr) = self.bind_addr {
            cfg.bind_addr = addr;
        }
        if let Some(port) = self.peer_port {
            cfg.peer_port = port;
        }
        if let Some(port) = self.client_port {
            cfg.client_port = port;
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(exit) => {
            info!("exiting ({:?})", exit);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<Exit> {
    let mut cfg = config::load(cli.config.as_deref()).context("loading config")?;
    cli.apply(&mut cfg);
    cfg.validate()?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    rt.block_on(async {
        let (handle, mut console) = Console::channel();
        spawn_stdin_reader(handle.clone()).context("starting console")?;
        tokio::spawn(kill_on_signal(handle));
        let exit = Supervisor::new(cfg).run(&mut console).await?;
        Ok::<_, anyhow::Error>(exit)
    })
}

/// Ctrl+C or SIGTERM act like typing `kill`.
async fn kill_on_signal(handle: ConsoleHandle) {
    if let Err(e) = shutdown_signal().await {
        error!("signal handler: {}", e);
        return;
    }
    info!("signal received, shutting down");
    handle.send_line("kill");
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

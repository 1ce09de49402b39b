mod buffer;
mod client;
mod config;
mod sim;

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;

use fray::{ConsoleNotifier, DEFAULT_PORT, TICRATE};

use client::{ConnectionState, GameClient};
use config::ClientConfig;
use sim::MirrorSimulation;

#[derive(Parser)]
#[command(name = "fray-client")]
#[command(about = "Headless fray game client")]
struct Args {
    #[arg(short, long, help = "Server host or host:port")]
    server: Option<String>,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value = "player")]
    name: String,

    #[arg(long, default_value = "base")]
    skin: String,

    #[arg(long, help = "Record inbound traffic to this demo file")]
    record: Option<PathBuf>,

    #[arg(long, help = "Play back a demo file instead of connecting")]
    play: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ClientConfig {
        name: args.name,
        skin: args.skin,
        demo_path: args.record,
        ..ClientConfig::default()
    };

    let mut client = GameClient::new(config, MirrorSimulation::default(), Box::new(ConsoleNotifier))?;

    if let Some(demo) = args.play {
        return client.play_demo(&demo);
    }

    let Some(server) = args.server else {
        bail!("either --server or --play is required");
    };
    let addr = resolve(&server, args.port)?;
    client.connect(addr)?;

    let tick_duration = Duration::from_secs_f64(1.0 / TICRATE as f64);
    let mut last_tick = Instant::now();
    let mut accumulator = Duration::ZERO;

    loop {
        client.pump_network()?;

        let now = Instant::now();
        accumulator += now - last_tick;
        last_tick = now;
        while accumulator >= tick_duration {
            accumulator -= tick_duration;
            client.run_tic();
        }

        if client.state() == ConnectionState::Disconnected {
            log::info!("session over");
            return Ok(());
        }
    }
}

fn resolve(server: &str, default_port: u16) -> Result<SocketAddr> {
    let candidate = if server.contains(':') {
        server.to_string()
    } else {
        format!("{server}:{default_port}")
    };
    candidate
        .to_socket_addrs()
        .with_context(|| format!("resolving {candidate}"))?
        .next()
        .with_context(|| format!("no addresses for {candidate}"))
}

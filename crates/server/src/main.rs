mod config;
mod headless;
mod queue;
mod server;
mod vote;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use fray::{DEFAULT_PORT, GameSettings, GameType, MAX_CLIENTS};

use config::ServerConfig;
use headless::HeadlessSimulation;
use server::GameServer;

#[derive(Parser)]
#[command(name = "fray-server")]
#[command(about = "Authoritative fray game server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = MAX_CLIENTS)]
    max_clients: usize,

    #[arg(long, default_value_t = 16, help = "Players allowed in the game at once")]
    max_players: u8,

    #[arg(long, value_enum, default_value = "deathmatch")]
    game_mode: GameMode,

    #[arg(long, default_value_t = 0)]
    map_number: u32,

    #[arg(long, default_value_t = 0, help = "Frag limit, 0 disables")]
    frag_limit: u32,

    #[arg(long, default_value_t = 0, help = "Time limit in minutes, 0 disables")]
    time_limit: u32,

    #[arg(long, help = "Record all inbound traffic to this demo file")]
    demo: Option<PathBuf>,

    #[arg(long, help = "Scratch file for full-state transfers")]
    scratch: Option<PathBuf>,

    #[arg(long, help = "Moderator password for auth requests")]
    password: Option<String>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum GameMode {
    Coop,
    Deathmatch,
    TeamDeathmatch,
    Ctf,
}

impl From<GameMode> for GameType {
    fn from(mode: GameMode) -> GameType {
        match mode {
            GameMode::Coop => GameType::Cooperative,
            GameMode::Deathmatch => GameType::Deathmatch,
            GameMode::TeamDeathmatch => GameType::TeamDeathmatch,
            GameMode::Ctf => GameType::CaptureTheFlag,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let settings = GameSettings {
        game_type: args.game_mode.into(),
        max_players: args.max_players,
        frag_limit: args.frag_limit,
        time_limit: args.time_limit,
        ..GameSettings::default()
    };

    let mut config = ServerConfig {
        max_clients: args.max_clients,
        settings,
        map_number: args.map_number,
        demo_path: args.demo,
        password: args.password,
        ..ServerConfig::default()
    };
    if let Some(scratch) = args.scratch {
        config.scratch_path = scratch;
    }

    let mut server = GameServer::new(&bind_addr, config, HeadlessSimulation::new())?;
    log::info!("server listening on {}", server.local_addr());

    server.run()
}

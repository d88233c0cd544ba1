use std::collections::BTreeMap;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use arena::prelude::*;
use arena_tick::TickConfig;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

/// Side length of the square grid.
const GRID: i32 = 20;
/// How long the lobby stays open after the first player joined.
const LOBBY_GRACE: Duration = Duration::from_secs(3);
/// Simulation steps per round.
const ROUND_TICKS: u64 = 200;
const SIM_RATE_HZ: u32 = 10;
const START_LENGTH: i32 = 3;

// ---------------------------------------------------------------------------
// Game types
// ---------------------------------------------------------------------------

struct Snake {
    /// Head first.
    body: Vec<Segment>,
    heading: Direction,
    color: String,
}

/// A toy world: every player steers a fixed-length snake that wraps
/// around the edges.
struct World {
    snakes: BTreeMap<String, Snake>,
}

impl World {
    fn new(names: &[String], colors: &[String]) -> Self {
        let snakes = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let row = (2 + 2 * i as i32).rem_euclid(GRID);
                let body = (0..START_LENGTH).rev().map(|col| (col, row)).collect();
                let color = colors
                    .get(i % colors.len().max(1))
                    .cloned()
                    .unwrap_or_else(|| "white".to_owned());
                let snake = Snake {
                    body,
                    heading: Direction::Right,
                    color,
                };
                (name.clone(), snake)
            })
            .collect();
        Self { snakes }
    }

    /// Turns `name`'s snake. Reversing onto itself is ignored.
    fn steer(&mut self, name: &str, direction: Direction) {
        if let Some(snake) = self.snakes.get_mut(name) {
            if direction != snake.heading.opposite() {
                snake.heading = direction;
            }
        }
    }

    fn step(&mut self) {
        for snake in self.snakes.values_mut() {
            let (dx, dy) = snake.heading.delta();
            let (x, y) = snake.body[0];
            snake.body.insert(0, ((x + dx).rem_euclid(GRID), (y + dy).rem_euclid(GRID)));
            snake.body.pop();
        }
    }

    fn entities(&self) -> Vec<EntityMessage> {
        self.snakes
            .iter()
            .map(|(name, snake)| EntityMessage {
                entity_id: name.clone(),
                body: snake.body.clone(),
                color: snake.color.clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

fn run_server(addr: &str) -> Result<(), ArenaError> {
    let lobby = LobbyConfig::default();
    let colors = lobby.available_colors.clone();
    let mut server = ArenaServer::new(ServerConfig::new(addr), lobby);
    let bound = server.start()?;
    info!(addr = %bound, "lobby open");

    while !server.wait_for_players(1, Duration::from_secs(5)) {
        info!("waiting for players");
    }
    thread::sleep(LOBBY_GRACE);

    let names: Vec<String> = server
        .joined_players()
        .into_iter()
        .map(|(_, name)| name)
        .collect();
    server.start_playing()?;
    info!(players = ?names, "round started");

    let mut world = World::new(&names, &colors);
    let tick = TickConfig::with_rate(SIM_RATE_HZ).tick_duration();
    for _ in 0..ROUND_TICKS {
        for (_, command) in server.player_commands() {
            world.steer(&command.player_name, command.command);
        }
        world.step();
        if let Err(e) = server.send_game_state(world.entities()) {
            warn!(error = %e, "dropped a world update");
        }
        thread::sleep(tick);
    }

    info!("round over");
    server.start_lobby()?;
    server.stop();
    Ok(())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

const STEERING: [Direction; 4] = [
    Direction::Right,
    Direction::Down,
    Direction::Left,
    Direction::Up,
];
const UPDATES_PER_TURN: usize = 5;

fn run_client(addr: &str, name: &str) -> Result<(), ArenaError> {
    let mut client = ArenaClient::new(ArenaClientConfig::new(addr));
    client.connect()?;
    client.join_lobby(name)?;

    let info = client.get_lobby_info()?;
    info!(players = ?info.player_names, highscores = ?info.highscores, "in lobby");

    while !client.wait_game_ready() {
        if !client.is_connected() {
            return Err(ArenaError::Disconnected);
        }
    }
    info!("game started");

    let mut updates = 0usize;
    while client.is_connected() {
        let Some(world) = client.get_world_update() else {
            continue;
        };
        updates += 1;
        if let Some(me) = world.entities.iter().find(|e| e.entity_id == name) {
            info!(head = ?me.body.first(), "moved");
        }
        if updates % UPDATES_PER_TURN == 0 {
            let direction = STEERING[(updates / UPDATES_PER_TURN) % STEERING.len()];
            if let Err(e) = client.send_command(name, direction) {
                warn!(error = %e, "command not sent");
            }
        }
    }

    info!(updates, "server closed the game");
    client.disconnect();
    Ok(())
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(author, version, about = "Snake arena over the arena networking crates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Host a lobby and run one round.
    Server {
        /// Address to listen on
        #[arg(default_value = DEFAULT_ADDR)]
        addr: String,
    },
    /// Join a server and play until it closes the game.
    Client {
        /// Server address
        #[arg(default_value = DEFAULT_ADDR)]
        addr: String,
        /// Player name shown in the lobby
        #[arg(default_value = "player")]
        name: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let result = match &cli.command {
        Command::Server { addr } => run_server(addr),
        Command::Client { addr, name } => run_client(addr, name),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "demo failed");
            ExitCode::FAILURE
        }
    }
}

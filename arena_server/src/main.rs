//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p arena_server --bin server -- [--addr 127.0.0.1:7892] \
//!     [--tick-hz 30] [--maps-dir maps] [--map crater.json]
//!
//! The server listens for client connections, runs a fixed timestep
//! simulation, and broadcasts snapshots to connected clients.
//!
//! Console commands:
//!   status  - Show server status
//!   quit    - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use arena_server::GameServer;
use arena_shared::config::ArenaConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> ArenaConfig {
    let mut cfg = ArenaConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(30);
                i += 2;
            }
            "--maps-dir" if i + 1 < args.len() => {
                cfg.maps_dir = args[i + 1].clone();
                i += 2;
            }
            "--map" if i + 1 < args.len() => {
                cfg.map_file = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, map = %cfg.map_file, "Starting server");

    let mut server = GameServer::new(cfg.clone()).await.context("create server")?;
    let local = server.local_addr();
    info!(%local, "Server ready");

    // Console input channel fed by a stdin reader thread.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'quit' to exit.");
    println!();

    let tick_interval = std::time::Duration::from_secs_f32(1.0 / server.cfg.tick_hz as f32);
    let mut next_tick = tokio::time::Instant::now();

    loop {
        while let Ok(line) = console_rx.try_recv() {
            match line.as_str() {
                "status" => {
                    println!("Tick: {}", server.world().tick());
                    println!("Players: {}/{}", server.player_count(), server.cfg.max_players);
                    for p in server.world().players() {
                        println!(
                            "  {} ({}) ship={} health={} fuel={}",
                            p.name, p.team, p.ship.id.0, p.ship.health, p.ship.fuel
                        );
                    }
                }
                "quit" | "exit" => {
                    info!("Server shutting down");
                    return Ok(());
                }
                other => println!("Unknown command '{}'", other),
            }
        }

        server.step().await?;

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
}

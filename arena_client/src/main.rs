//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p arena_client -- [--addr 127.0.0.1:7892] [--maps-dir maps] \
//!     [--name Player] [--team Green]
//!
//! The client connects, loads the announced map from the maps directory,
//! and mirrors the server's world. Rendering and keyboard capture live
//! outside this crate; the console stands in for both here.
//!
//! Console commands:
//!   status        - Show session status
//!   keys <LRAFS>  - Hold an input combo (e.g. `keys LA`); `keys -` releases
//!   spawn         - Request a respawn when dead
//!   menu          - Open the base refit menu (while docked)
//!   row           - Toggle between the gun and special menu rows
//!   next / prev   - Cycle the selected weapon
//!   done          - Close the menu
//!   quit          - Disconnect and exit

use std::env;
use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use arena_client::{GameClient, SessionState};
use arena_shared::config::ArenaConfig;
use arena_shared::ship::{InputKeys, Team};
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
            "--maps-dir" if i + 1 < args.len() => {
                cfg.maps_dir = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            "--team" if i + 1 < args.len() => {
                cfg.team = match args[i + 1].as_str() {
                    "Blue" | "blue" => Team::Blue,
                    "Red" | "red" => Team::Red,
                    _ => Team::Green,
                };
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

fn parse_keys(combo: &str) -> InputKeys {
    let mut keys = InputKeys::empty();
    for ch in combo.chars() {
        match ch.to_ascii_uppercase() {
            'L' => keys |= InputKeys::LEFT,
            'R' => keys |= InputKeys::RIGHT,
            'A' => keys |= InputKeys::ACCEL,
            'F' => keys |= InputKeys::FIRE,
            'S' => keys |= InputKeys::SPECIAL,
            _ => {}
        }
    }
    keys
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting client");

    let mut client = GameClient::connect(&cfg).await.context("connect")?;
    if client.state() == SessionState::ConnFailed {
        println!("{}", client.fail_text());
        return Ok(());
    }

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

    println!("Connected. Type 'status' for info, 'quit' to exit.");
    println!();

    let tick_interval = Duration::from_secs_f32(1.0 / cfg.tick_hz as f32);
    let mut next_tick = tokio::time::Instant::now();
    let mut held = InputKeys::empty();

    loop {
        client.poll()?;

        if client.state() == SessionState::Loading && client.pending_map_name().is_some() {
            client.load_map().await.context("load map")?;
        }

        while let Ok(line) = console_rx.try_recv() {
            let mut tokens = line.split_whitespace();
            match tokens.next().unwrap_or("") {
                "status" => {
                    println!("State: {:?}", client.state());
                    if let Some(world) = client.world() {
                        println!("Tick: {}", world.tick());
                        for p in world.players() {
                            println!(
                                "  {} ({}) ship={} health={} fuel={}",
                                p.name, p.team, p.ship.id.0, p.ship.health, p.ship.fuel
                            );
                        }
                    }
                }
                "keys" => {
                    held = parse_keys(tokens.next().unwrap_or("-"));
                    println!("Holding {:?}", held);
                }
                "spawn" => client.request_spawn().await?,
                "menu" => client.open_base_menu(),
                "row" => client.menu_toggle_row(),
                "next" => client.menu_cycle(1).await?,
                "prev" => client.menu_cycle(-1).await?,
                "done" => client.close_base_menu().await?,
                "quit" | "exit" => {
                    client.request_quit();
                    client.confirm_quit();
                    println!("Disconnected.");
                    return Ok(());
                }
                other => println!("Unknown command '{}'", other),
            }
        }

        for notice in client.notices.drain(..) {
            println!("{}", notice);
        }

        match client.state() {
            SessionState::Disconnected => {
                println!("Connection lost.");
                break;
            }
            SessionState::ConnFailed => {
                println!("{}", client.fail_text());
                break;
            }
            SessionState::InPlay | SessionState::BaseMenu | SessionState::MaybeQuit => {
                client.send_input(held).await?;
                client.advance();
            }
            SessionState::Connecting | SessionState::Loading => {}
        }

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }

    Ok(())
}

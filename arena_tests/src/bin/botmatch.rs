//! Headless bot match harness.
//!
//! Spins up a server and a handful of scripted clients in one process
//! and runs them for a fixed duration. Useful for eyeballing replication
//! behavior and exercising the tick loop without a UI.
//!
//! Usage:
//!   cargo run -p arena_tests --bin botmatch -- [--bots 3] [--ticks 600]

use std::time::Duration;

use anyhow::Context;
use arena_client::{GameClient, SessionState};
use arena_server::server::bind_ephemeral;
use arena_shared::config::ArenaConfig;
use arena_shared::mask::ArenaMap;
use arena_shared::ship::{InputKeys, Team};
use arena_tests::small_arena;
use tracing::info;

const TEAMS: [Team; 3] = [Team::Green, Team::Blue, Team::Red];

fn parse_args() -> (usize, u32) {
    let args: Vec<String> = std::env::args().collect();
    let mut bots = 3usize;
    let mut ticks = 600u32;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bots" if i + 1 < args.len() => {
                bots = args[i + 1].parse().unwrap_or(3);
                i += 2;
            }
            "--ticks" if i + 1 < args.len() => {
                ticks = args[i + 1].parse().unwrap_or(600);
                i += 2;
            }
            _ => i += 1,
        }
    }
    (bots.max(1), ticks)
}

/// Scripted flight plan: each bot loops through hold-patterns offset by
/// its index, so the match has turning, thrusting, and plenty of fire.
fn bot_keys(bot: usize, tick: u32) -> InputKeys {
    match (tick / 30 + bot as u32) % 5 {
        0 => InputKeys::ACCEL,
        1 => InputKeys::LEFT | InputKeys::ACCEL,
        2 => InputKeys::FIRE,
        3 => InputKeys::RIGHT | InputKeys::ACCEL | InputKeys::FIRE,
        _ => InputKeys::SPECIAL,
    }
}

async fn run_bot(
    cfg: ArenaConfig,
    map: ArenaMap,
    bot: usize,
    ticks: u32,
) -> anyhow::Result<String> {
    let mut client = GameClient::connect(&ArenaConfig {
        player_name: format!("Bot-{}", bot + 1),
        team: TEAMS[bot % TEAMS.len()],
        ..cfg
    })
    .await?;
    anyhow::ensure!(
        client.state() == SessionState::Loading,
        "bot {} login failed: {}",
        bot + 1,
        client.fail_text()
    );

    let tick_interval = Duration::from_secs_f32(1.0 / 30.0);
    for _ in 0..200 {
        client.poll()?;
        if client.pending_map_name().is_some() {
            client.finish_loading(map.clone()).await?;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut tick = 0u32;
    while tick < ticks {
        client.poll()?;
        match client.state() {
            SessionState::InPlay => {
                client.send_input(bot_keys(bot, tick)).await?;
                client.request_spawn().await?;
                client.advance();
                tick += 1;
            }
            SessionState::Disconnected => anyhow::bail!("bot {} lost its connection", bot + 1),
            _ => {}
        }
        tokio::time::sleep(tick_interval).await;
    }

    let ship = client.me().context("bot never joined")?;
    Ok(format!(
        "Bot-{} ({}): health={} fuel={} gun={} special={} entities-mirrored={}",
        bot + 1,
        TEAMS[bot % TEAMS.len()],
        ship.health,
        ship.fuel,
        ship.gun.ammo,
        ship.special.ammo,
        client.world().map(|w| w.objects().count()).unwrap_or(0),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (bots, ticks) = parse_args();
    let map = small_arena();
    let (mut server, cfg) = bind_ephemeral(map.clone()).await?;
    info!(addr = %cfg.server_addr, bots, ticks, "botmatch starting");

    // Server needs headroom past the match length for joins and teardown.
    let server_task = tokio::spawn(async move {
        let result = server.run_for_ticks(ticks + 300).await;
        (server, result)
    });

    let mut handles = Vec::new();
    for bot in 0..bots {
        handles.push(tokio::spawn(run_bot(cfg.clone(), map.clone(), bot, ticks)));
    }

    for handle in handles {
        match handle.await? {
            Ok(summary) => println!("{}", summary),
            Err(e) => println!("bot failed: {e:#}"),
        }
    }

    server_task.abort();
    println!("match over");
    Ok(())
}

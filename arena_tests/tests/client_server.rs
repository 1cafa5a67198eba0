//! Socket-based integration tests for the client ↔ server protocol.
//!
//! Each test binds a server on an ephemeral port, drives it from a
//! background task, and talks to it either through `GameClient` or
//! through a raw reliable connection when the test needs to send
//! something a well-behaved client never would.
//!
//! The mirror is deliberately not advanced inside `wait_for`, so any
//! state change these tests observe arrived over the network.

use std::time::Duration;

use anyhow::Context;
use arena_client::{GameClient, SessionState};
use arena_server::server::{bind_ephemeral, GameServer};
use arena_shared::config::ArenaConfig;
use arena_shared::entity::{EntityId, EntityKind};
use arena_shared::mask::ArenaMap;
use arena_shared::net::{
    decode_from_bytes, encode_to_bytes, LoginStatus, NetMsg, ReliableConn, GAME_VERSION,
    PROTOCOL_VERSION,
};
use arena_shared::ship::{InputKeys, Team, MAX_FUEL};
use arena_tests::small_arena;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// Steps the server in the background. Abort the handle when done.
fn drive(mut server: GameServer, steps: u32) -> JoinHandle<anyhow::Result<GameServer>> {
    tokio::spawn(async move {
        for _ in 0..steps {
            server.step().await?;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        Ok(server)
    })
}

/// Polls the client until a condition holds or the test times out.
async fn wait_for(
    client: &mut GameClient,
    what: &str,
    mut cond: impl FnMut(&GameClient) -> bool,
) -> anyhow::Result<()> {
    for _ in 0..1500 {
        client.poll()?;
        if cond(client) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    anyhow::bail!("timed out waiting for {what}")
}

async fn connect_and_join(
    cfg: &ArenaConfig,
    map: &ArenaMap,
    name: &str,
) -> anyhow::Result<GameClient> {
    let mut client = GameClient::connect(&ArenaConfig {
        server_addr: cfg.server_addr.clone(),
        player_name: name.into(),
        ..ArenaConfig::default()
    })
    .await?;
    anyhow::ensure!(
        client.state() == SessionState::Loading,
        "login failed: {}",
        client.fail_text()
    );
    wait_for(&mut client, "map info", |c| c.pending_map_name().is_some()).await?;
    client.finish_loading(map.clone()).await?;
    wait_for(&mut client, "join", |c| c.state() == SessionState::InPlay).await?;
    Ok(client)
}

fn valid_login(name: &str) -> NetMsg {
    NetMsg::Login {
        name: name.into(),
        team: Team::Red,
        protocol: PROTOCOL_VERSION,
        version: GAME_VERSION,
        udp_port: 1,
    }
}

/// Unit-style check that the wire encoding round-trips.
#[test]
fn protocol_messages_roundtrip() -> anyhow::Result<()> {
    let login = valid_login("Alice");
    assert_eq!(decode_from_bytes(&encode_to_bytes(&login)?)?, login);

    let ret = NetMsg::LoginReturn {
        status: LoginStatus::Success,
        ship: EntityId(1),
        server_version: GAME_VERSION,
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&ret)?)?, ret);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn login_happy_path_enters_play() -> anyhow::Result<()> {
    let map = small_arena();
    let (server, cfg) = bind_ephemeral(map.clone()).await?;
    let server = drive(server, 2000);

    let mut client = GameClient::connect(&ArenaConfig {
        server_addr: cfg.server_addr.clone(),
        player_name: "Alice".into(),
        team: Team::Green,
        ..ArenaConfig::default()
    })
    .await?;
    assert_eq!(client.state(), SessionState::Loading);
    // First id the authoritative world hands out.
    assert_eq!(client.my_ship(), EntityId(1));

    wait_for(&mut client, "map info", |c| c.pending_map_name().is_some()).await?;
    assert_eq!(client.pending_map_name(), Some("proving-grounds"));
    client.finish_loading(map).await?;
    wait_for(&mut client, "join", |c| c.state() == SessionState::InPlay).await?;

    let world = client.world().context("mirror world")?;
    assert_eq!(world.players().len(), 1);
    assert_eq!(world.players()[0].name, "Alice");
    assert_eq!(world.players()[0].team, Team::Green);
    assert!(world.find_ship(EntityId(1)).is_some());

    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn vitals_snapshots_reach_the_mirror() -> anyhow::Result<()> {
    let map = small_arena();
    let (server, cfg) = bind_ephemeral(map.clone()).await?;
    let server = drive(server, 2000);

    let mut client = connect_and_join(&cfg, &map, "Bob").await?;
    client.send_input(InputKeys::ACCEL).await?;

    // The mirror is never advanced here, so the only way fuel can move
    // is the owner-addressed UDP vitals message.
    wait_for(&mut client, "fuel drain via vitals", |c| {
        c.me().is_some_and(|s| s.fuel < MAX_FUEL)
    })
    .await?;

    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gunfire_replicates_bullets_to_the_mirror() -> anyhow::Result<()> {
    let map = small_arena();
    let (server, cfg) = bind_ephemeral(map.clone()).await?;
    let server = drive(server, 2000);

    let mut client = connect_and_join(&cfg, &map, "Carol").await?;
    client.send_input(InputKeys::FIRE).await?;

    wait_for(&mut client, "replicated bullet", |c| {
        c.world().is_some_and(|w| {
            w.objects()
                .any(|e| matches!(e.kind, EntityKind::Bullet { .. }) && e.owner == Some(c.my_ship()))
        })
    })
    .await?;

    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cannonball_removal_is_network_visible() -> anyhow::Result<()> {
    let map = small_arena();
    let (server, cfg) = bind_ephemeral(map.clone()).await?;
    let server = drive(server, 2000);

    let mut client = connect_and_join(&cfg, &map, "Dave").await?;
    client.send_input(InputKeys::SPECIAL).await?;

    wait_for(&mut client, "cannonball creation", |c| {
        c.world()
            .is_some_and(|w| w.objects().any(|e| e.kind == EntityKind::CannonBall))
    })
    .await?;
    client.send_input(InputKeys::empty()).await?;

    // The ball detonates against the ceiling; being RemoteAll, it may
    // only leave the mirror through an explicit removal message.
    wait_for(&mut client, "authorized removal", |c| {
        c.world()
            .is_some_and(|w| !w.objects().any(|e| e.kind == EntityKind::CannonBall))
    })
    .await?;

    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_join_is_announced_to_the_first() -> anyhow::Result<()> {
    let map = small_arena();
    let (server, cfg) = bind_ephemeral(map.clone()).await?;
    let server = drive(server, 2000);

    let mut alice = connect_and_join(&cfg, &map, "Alice").await?;
    let bob = connect_and_join(&cfg, &map, "Bob").await?;

    wait_for(&mut alice, "join announcement", |c| {
        c.world().is_some_and(|w| w.players().len() == 2)
    })
    .await?;
    assert!(alice.notices.iter().any(|n| n.contains("Bob")));

    // Dropping Bob must surface as a departure for Alice.
    drop(bob);
    wait_for(&mut alice, "departure", |c| {
        c.world().is_some_and(|w| w.players().len() == 1)
    })
    .await?;

    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_protocol_login_is_rejected() -> anyhow::Result<()> {
    let (server, cfg) = bind_ephemeral(small_arena()).await?;
    let server = drive(server, 1000);

    let stream = TcpStream::connect(cfg.server_addr.as_str()).await?;
    let mut conn = ReliableConn::new(stream);
    conn.send(&NetMsg::Login {
        name: "Mallory".into(),
        team: Team::Red,
        protocol: PROTOCOL_VERSION + 1,
        version: GAME_VERSION,
        udp_port: 1,
    })
    .await?;

    match conn.recv().await? {
        NetMsg::LoginReturn { status, .. } => assert_eq!(status, LoginStatus::BadProtocol),
        other => panic!("expected LoginReturn, got {other:?}"),
    }

    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_server_turns_logins_away() -> anyhow::Result<()> {
    let mut map = small_arena();
    map.max_players = 1;
    let (server, cfg) = bind_ephemeral(map.clone()).await?;
    let server = drive(server, 2000);

    let _alice = connect_and_join(&cfg, &map, "Alice").await?;

    let stream = TcpStream::connect(cfg.server_addr.as_str()).await?;
    let mut conn = ReliableConn::new(stream);
    conn.send(&valid_login("Eve")).await?;
    match conn.recv().await? {
        NetMsg::LoginReturn { status, .. } => assert_eq!(status, LoginStatus::TooManyUsers),
        other => panic!("expected LoginReturn, got {other:?}"),
    }

    server.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_weapon_swap_drops_the_connection() -> anyhow::Result<()> {
    let map = small_arena();
    let (server, cfg) = bind_ephemeral(map).await?;
    let server = drive(server, 2000);

    let stream = TcpStream::connect(cfg.server_addr.as_str()).await?;
    let mut conn = ReliableConn::new(stream);
    conn.send(&valid_login("Grace")).await?;
    match conn.recv().await? {
        NetMsg::LoginReturn { status, .. } => assert_eq!(status, LoginStatus::Success),
        other => panic!("expected LoginReturn, got {other:?}"),
    }
    match conn.recv().await? {
        NetMsg::MapInfo(_) => {}
        other => panic!("expected MapInfo, got {other:?}"),
    }
    conn.send(&NetMsg::Loaded).await?;
    match conn.recv().await? {
        NetMsg::Joined(joined) => assert_eq!(joined.name, "Grace"),
        other => panic!("expected Joined, got {other:?}"),
    }

    // More ammo than any gun can hold: a protocol violation.
    conn.send(&NetMsg::UpdateWeaps {
        gun: 0,
        special: 0,
        gun_ammo: 9999,
        special_ammo: 0,
    })
    .await?;

    let mut dropped = false;
    for _ in 0..10 {
        match tokio::time::timeout(Duration::from_secs(2), conn.recv()).await {
            Ok(Ok(_)) => continue, // unrelated broadcast
            Ok(Err(_)) => {
                dropped = true;
                break;
            }
            Err(_) => break,
        }
    }
    assert!(dropped, "server should sever the offending connection");

    server.abort();
    Ok(())
}

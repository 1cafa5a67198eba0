//! Server smoke tests.

use arena_server::server::bind_ephemeral;
use arena_tests::small_arena;

#[tokio::test]
async fn server_runs_a_few_ticks() -> anyhow::Result<()> {
    let (mut server, _cfg) = bind_ephemeral(small_arena()).await?;
    server.run_for_ticks(3).await?;
    Ok(())
}

#[tokio::test]
async fn empty_server_survives_gc_and_snapshot_cadence() -> anyhow::Result<()> {
    let (mut server, _cfg) = bind_ephemeral(small_arena()).await?;
    // Crosses a GC sweep (every 32 ticks) and several snapshot cadences
    // with nobody connected.
    for _ in 0..40 {
        server.step().await?;
    }
    assert_eq!(server.player_count(), 0);
    assert_eq!(server.world().tick(), 40);
    Ok(())
}

#[tokio::test]
async fn map_player_cap_overrides_config() -> anyhow::Result<()> {
    let mut map = small_arena();
    map.max_players = 3;
    let (server, cfg) = bind_ephemeral(map).await?;
    assert_eq!(cfg.max_players, 3);
    assert_eq!(server.cfg.max_players, 3);
    Ok(())
}

//! Shared fixtures for the integration tests and the botmatch harness.

use arena_shared::mask::ArenaMap;
use arena_shared::math::Vec2;

/// A small arena: solid border, a docking strip along the floor, and a
/// few spawn cells in the open middle. Gravity off so ships hold still
/// until told otherwise.
pub fn small_arena() -> ArenaMap {
    let (w, h) = (48usize, 32usize);
    let mut rows: Vec<String> = (0..h)
        .map(|y| {
            (0..w)
                .map(|x| {
                    if y == 0 || y == h - 1 || x == 0 || x == w - 1 {
                        '2'
                    } else {
                        '0'
                    }
                })
                .collect()
        })
        .collect();
    for x in 8..24 {
        rows[h - 2].replace_range(x..x + 1, "6");
    }
    for x in [12, 24, 36] {
        rows[16].replace_range(x..x + 1, "8");
    }
    ArenaMap {
        name: "proving-grounds".into(),
        gravity: Vec2::ZERO,
        max_players: 8,
        disallow: Vec::new(),
        rows,
    }
}

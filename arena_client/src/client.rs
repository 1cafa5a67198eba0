//! Client implementation.
//!
//! The client maintains:
//! - A reliable control stream (login handshake, entity lifecycle, intent)
//! - An unreliable datagram socket (ship snapshots and vitals)
//! - A mirrored world fed exclusively by incoming messages
//! - The session state machine wrapped around all of it
//!
//! The mirror never originates entity identifiers. Everything the client
//! sends is player intent: login, the input bitmask, weapon swaps, and
//! respawn requests.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use arena_shared::{
    config::ArenaConfig,
    entity::EntityId,
    mask::ArenaMap,
    net::{
        JoinedInfo, LoginStatus, MapInfo, NetMsg, ReliableConn, ReliableReader, ReliableWriter,
        UnreliableConn, GAME_VERSION, PROTOCOL_VERSION,
    },
    registry::Registry,
    ship::{InputKeys, Player, Ship},
    world::World,
};
use tokio::{net::TcpStream, sync::mpsc};
use tracing::{debug, info, warn};

/// Session state.
///
/// `ConnFailed` is terminal and only reachable from `Connecting`.
/// `BaseMenu` and `MaybeQuit` overlay `InPlay` and return to it; the
/// mirrored simulation keeps running underneath them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Loading,
    InPlay,
    BaseMenu,
    MaybeQuit,
    ConnFailed,
    Disconnected,
}

/// Events from the channel pump tasks to the session.
enum NetEvent {
    Msg(NetMsg),
    Closed,
}

/// High-level game client: one session against one server.
pub struct GameClient {
    state: SessionState,
    /// State an overlay (base menu, quit prompt) returns to.
    last_state: SessionState,

    writer: ReliableWriter,
    events_rx: mpsc::Receiver<NetEvent>,

    /// Mirrored world; present once the map is loaded.
    world: Option<World>,
    registry: Option<Registry>,
    /// Own ship id, assigned by the server at login.
    my_ship: EntityId,

    pending_map: Option<MapInfo>,
    maps_dir: PathBuf,

    /// Login failure detail for the `ConnFailed` screen.
    fail_reason: Option<LoginStatus>,
    server_version: i32,

    /// Last bitmask actually transmitted; input is edge-triggered.
    sent_keys: Option<InputKeys>,
    /// Base-menu cursor: true selects the gun row.
    menu_gun: bool,
    /// Current selections into the server's weapon roster.
    gun_index: usize,
    special_index: usize,

    /// Text notices for the UI (joins, departures).
    pub notices: Vec<String>,
}

impl GameClient {
    /// Connects and runs the login handshake.
    ///
    /// A rejected login still returns a client, parked in `ConnFailed`
    /// with the reason recorded; the server tears the connection down on
    /// its side shortly after. A transport failure is an error.
    pub async fn connect(cfg: &ArenaConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %server_addr, name = %cfg.player_name, "Connecting");

        // Bind UDP first so the login can carry the snapshot port.
        let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let udp = UnreliableConn::connect(bind, server_addr).await?;
        let udp_port = udp.local_addr().context("udp local_addr")?.port();

        let stream = TcpStream::connect(server_addr)
            .await
            .context("tcp connect")?;
        let (mut reader, mut writer) = ReliableConn::new(stream).split();

        writer
            .send(&NetMsg::Login {
                name: cfg.player_name.clone(),
                team: cfg.team,
                protocol: PROTOCOL_VERSION,
                version: GAME_VERSION,
                udp_port,
            })
            .await?;

        // The handshake reply is awaited inline; the pump tasks take over
        // from there.
        let reply = tokio::time::timeout(Duration::from_secs(10), reader.recv())
            .await
            .context("login timed out")??;
        let (status, ship, server_version) = match reply {
            NetMsg::LoginReturn { status, ship, server_version } => (status, ship, server_version),
            other => anyhow::bail!("expected LoginReturn, got {other:?}"),
        };

        let (events_tx, events_rx) = mpsc::channel(256);
        tokio::spawn(reliable_pump(reader, events_tx.clone()));
        tokio::spawn(unreliable_pump(udp, events_tx));

        let state = if status == LoginStatus::Success {
            info!(ship = ship.0, "login accepted, loading");
            SessionState::Loading
        } else {
            warn!(?status, "login rejected");
            SessionState::ConnFailed
        };

        Ok(Self {
            state,
            last_state: SessionState::InPlay,
            writer,
            events_rx,
            world: None,
            registry: None,
            my_ship: ship,
            pending_map: None,
            maps_dir: PathBuf::from(&cfg.maps_dir),
            fail_reason: (status != LoginStatus::Success).then_some(status),
            server_version,
            sent_keys: None,
            menu_gun: true,
            gun_index: 0,
            special_index: 0,
            notices: Vec::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn my_ship(&self) -> EntityId {
        self.my_ship
    }

    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    pub fn registry(&self) -> Option<&Registry> {
        self.registry.as_ref()
    }

    /// Map name announced by the server, while one is pending load.
    pub fn pending_map_name(&self) -> Option<&str> {
        self.pending_map.as_ref().map(|m| m.map.as_str())
    }

    /// Own ship, once joined.
    pub fn me(&self) -> Option<&Ship> {
        self.world.as_ref().and_then(|w| w.find_ship(self.my_ship))
    }

    fn me_mut(&mut self) -> Option<&mut Ship> {
        let my = self.my_ship;
        self.world.as_mut().and_then(|w| w.find_ship_mut(my))
    }

    /// Human-readable login failure for the `ConnFailed` screen.
    pub fn fail_text(&self) -> String {
        match self.fail_reason {
            Some(LoginStatus::BadProtocol) | Some(LoginStatus::BadVersion) => format!(
                "Failed, invalid version. Server is running version {}",
                self.server_version as f32 / 100.0
            ),
            Some(LoginStatus::Banned) => "Failed, this client has been banned.".to_string(),
            Some(LoginStatus::TooManyUsers) => "Failed, the server is full.".to_string(),
            _ => "Failed, unknown reason.".to_string(),
        }
    }

    /// Drains queued network events. Call once per frame, before
    /// advancing the mirror.
    pub fn poll(&mut self) -> anyhow::Result<()> {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                NetEvent::Msg(msg) => self.apply_msg(msg)?,
                NetEvent::Closed => {
                    if self.state != SessionState::ConnFailed {
                        info!("connection lost");
                        self.teardown();
                    }
                }
            }
        }
        Ok(())
    }

    /// Advances the mirrored simulation by one tick.
    pub fn advance(&mut self) {
        if let Some(world) = self.world.as_mut() {
            world.advance();
        }
    }

    /// Applies one server message to the session. Public so tests can
    /// drive the mirror without sockets.
    pub fn apply_msg(&mut self, msg: NetMsg) -> anyhow::Result<()> {
        match msg {
            NetMsg::MapInfo(info) => {
                if self.state == SessionState::Loading {
                    info!(map = %info.map, "map info received");
                    self.pending_map = Some(info);
                }
            }
            NetMsg::Joined(joined) => self.on_joined(joined)?,
            NetMsg::Left { ship } => {
                if let Some(world) = self.world.as_mut() {
                    if let Some(player) = world.remove_player(ship) {
                        self.notices.push(format!("{} has left the game.", player.name));
                    }
                }
            }
            NetMsg::AddObject(spawn) => {
                let registry = self.registry.as_ref().context("AddObject before map load")?;
                let world = self.world.as_mut().context("AddObject before map load")?;
                if world.contains_object(spawn.id) {
                    // Redelivered creation; the first receipt wins.
                    debug!(id = spawn.id.0, "duplicate AddObject ignored");
                } else {
                    let entity = registry.make_entity(&spawn)?;
                    world.add_object_with_id(entity, spawn.id);
                }
            }
            NetMsg::RemObject { id } => {
                if let Some(world) = self.world.as_mut() {
                    world.remove_object(id);
                }
            }
            NetMsg::UpdateShips { ships } => {
                if let Some(world) = self.world.as_mut() {
                    for update in &ships {
                        // A miss is a ship whose Joined we have not seen
                        // yet; the next snapshot heals it.
                        world.apply_ship_update(update);
                    }
                }
            }
            NetMsg::UpdateShip { health, fuel, gun_ammo, special_ammo } => {
                if let Some(ship) = self.me_mut() {
                    ship.health = health;
                    ship.fuel = fuel;
                    ship.gun.ammo = gun_ammo;
                    ship.special.ammo = special_ammo;
                    if health > 0 {
                        // A respawn is observable as restored vitals.
                        ship.dead = false;
                    }
                }
            }
            NetMsg::UpdateWeaps { gun, special, gun_ammo, special_ammo } => {
                self.on_update_weaps(gun, special, gun_ammo, special_ammo)?;
            }
            other => {
                warn!(?other, "unexpected message, disconnecting");
                self.teardown();
            }
        }
        Ok(())
    }

    fn on_joined(&mut self, joined: JoinedInfo) -> anyhow::Result<()> {
        let registry = self.registry.as_ref().context("Joined before map load")?;
        let mut player = Player::new(joined.name.clone(), joined.team);
        player.ship.id = joined.ship;
        player.ship.pos = joined.pos;
        player.ship.old_pos = joined.pos;
        player.ship.vel = joined.vel;
        player.ship.gun = registry.make_gun(0)?;
        player.ship.special = registry.make_special(0)?;
        player.inputs = InputKeys::from_bits_truncate(joined.keys);
        player.logged_in = true;

        let world = self.world.as_mut().context("Joined before map load")?;
        world.add_player(player);
        if joined.ship == self.my_ship {
            self.state = SessionState::InPlay;
            info!(ship = joined.ship.0, "entered play");
        } else {
            self.notices
                .push(format!("{} has joined the {} team!", joined.name, joined.team));
        }
        Ok(())
    }

    fn on_update_weaps(
        &mut self,
        gun: u8,
        special: u8,
        gun_ammo: i32,
        special_ammo: i32,
    ) -> anyhow::Result<()> {
        let registry = self.registry.as_ref().context("UpdateWeaps before map load")?;
        let mut new_gun = registry.make_gun(gun as usize)?;
        let mut new_special = registry.make_special(special as usize)?;
        new_gun.ammo = gun_ammo;
        new_special.ammo = special_ammo;
        self.gun_index = gun as usize;
        self.special_index = special as usize;
        let ship = self.me_mut().context("UpdateWeaps before joining")?;
        ship.gun = new_gun;
        ship.special = new_special;
        Ok(())
    }

    /// Builds the mirrored world for the announced map and acks
    /// readiness. `load_map` is the from-disk convenience; tests pass a
    /// map in directly.
    pub async fn finish_loading(&mut self, map: ArenaMap) -> anyhow::Result<()> {
        let info = self.pending_map.take().context("no map info pending")?;
        let registry = Registry::from_names(&info.guns, &info.specials)?;
        let mask = map.mask()?;
        self.registry = Some(registry);
        self.world = Some(World::new(mask, info.gravity, false));
        self.gun_index = 0;
        self.special_index = 0;
        self.writer.send(&NetMsg::Loaded).await?;
        info!(map = %info.map, "map loaded");
        Ok(())
    }

    /// Loads the pending map from the maps directory by its server-sent
    /// name.
    pub async fn load_map(&mut self) -> anyhow::Result<()> {
        let name = self
            .pending_map
            .as_ref()
            .context("no map info pending")?
            .map
            .clone();
        let path = self.maps_dir.join(format!("{}.json", name));
        let map = ArenaMap::load(&path)?;
        self.finish_loading(map).await
    }

    /// Forwards the player's input bitmask. Edge-triggered: only a
    /// changed mask goes out. Dead ships send nothing; respawn is a
    /// separate request.
    pub async fn send_input(&mut self, keys: InputKeys) -> anyhow::Result<()> {
        if self.state != SessionState::InPlay {
            return Ok(());
        }
        let my = self.my_ship;
        let Some(player) = self.world.as_mut().and_then(|w| w.player_by_ship_mut(my)) else {
            return Ok(());
        };
        if player.ship.health <= 0 || self.sent_keys == Some(keys) {
            return Ok(());
        }
        player.inputs = keys;
        self.sent_keys = Some(keys);
        self.writer.send(&NetMsg::Input { keys: keys.bits() }).await
    }

    /// Asks the server for a respawn. Only meaningful for a dead ship.
    pub async fn request_spawn(&mut self) -> anyhow::Result<()> {
        if self.state == SessionState::InPlay && self.me().is_some_and(|s| s.dead) {
            self.writer.send(&NetMsg::SpawnMe).await?;
        }
        Ok(())
    }

    /// Opens the refit menu. Only available while parked on the home
    /// base with a live hull.
    pub fn open_base_menu(&mut self) {
        if self.state == SessionState::InPlay
            && self.me().is_some_and(|s| s.on_base && s.health > 0)
        {
            self.last_state = self.state;
            self.state = SessionState::BaseMenu;
            self.menu_gun = true;
        }
    }

    /// Whether the menu cursor is on the gun row.
    pub fn menu_on_gun_row(&self) -> bool {
        self.menu_gun
    }

    /// Moves the menu cursor between the gun and special rows.
    pub fn menu_toggle_row(&mut self) {
        if self.state == SessionState::BaseMenu {
            self.menu_gun = !self.menu_gun;
        }
    }

    /// Cycles the selected slot through the roster with wraparound,
    /// carrying ammo over, and reports the change to the server.
    pub async fn menu_cycle(&mut self, offset: isize) -> anyhow::Result<()> {
        if self.state != SessionState::BaseMenu {
            return Ok(());
        }
        let on_gun = self.menu_gun;
        let registry = self.registry.as_ref().context("menu before map load")?;
        let (count, index) = if on_gun {
            (registry.gun_count(), self.gun_index)
        } else {
            (registry.special_count(), self.special_index)
        };
        let next = (index as isize + offset).rem_euclid(count as isize) as usize;
        let kind = if on_gun {
            registry.gun_kind(next)
        } else {
            registry.special_kind(next)
        }
        .context("weapon index out of range")?;

        {
            let ship = self.me_mut().context("menu before joining")?;
            if on_gun {
                ship.gun = ship.gun.swapped_to(kind);
            } else {
                ship.special = ship.special.swapped_to(kind);
            }
        }
        if on_gun {
            self.gun_index = next;
        } else {
            self.special_index = next;
        }
        self.send_weapon_selection().await
    }

    /// Closes the menu, reporting the final selection.
    pub async fn close_base_menu(&mut self) -> anyhow::Result<()> {
        if self.state == SessionState::BaseMenu {
            self.state = self.last_state;
            self.send_weapon_selection().await?;
        }
        Ok(())
    }

    async fn send_weapon_selection(&mut self) -> anyhow::Result<()> {
        let (gun_ammo, special_ammo) = {
            let ship = self.me().context("no own ship")?;
            (ship.gun.ammo, ship.special.ammo)
        };
        self.writer
            .send(&NetMsg::UpdateWeaps {
                gun: self.gun_index as u8,
                special: self.special_index as u8,
                gun_ammo,
                special_ammo,
            })
            .await
    }

    /// Asks for quit confirmation.
    pub fn request_quit(&mut self) {
        if matches!(self.state, SessionState::InPlay | SessionState::BaseMenu) {
            self.last_state = SessionState::InPlay;
            self.state = SessionState::MaybeQuit;
        }
    }

    /// Confirms the quit prompt and tears the session down.
    pub fn confirm_quit(&mut self) {
        if self.state == SessionState::MaybeQuit {
            self.teardown();
        }
    }

    /// Dismisses the quit prompt and returns to play.
    pub fn cancel_quit(&mut self) {
        if self.state == SessionState::MaybeQuit {
            self.state = self.last_state;
        }
    }

    /// Drops all session state. Pending messages die with the pump
    /// tasks; the mirrored world is discarded whole.
    fn teardown(&mut self) {
        self.state = SessionState::Disconnected;
        self.world = None;
        self.registry = None;
        self.pending_map = None;
        self.sent_keys = None;
    }
}

async fn reliable_pump(mut reader: ReliableReader, events: mpsc::Sender<NetEvent>) {
    loop {
        match reader.recv().await {
            Ok(msg) => {
                if events.send(NetEvent::Msg(msg)).await.is_err() {
                    break;
                }
            }
            Err(_) => {
                let _ = events.send(NetEvent::Closed).await;
                break;
            }
        }
    }
}

async fn unreliable_pump(udp: UnreliableConn, events: mpsc::Sender<NetEvent>) {
    loop {
        match udp.recv().await {
            Ok(msg) => {
                if events.send(NetEvent::Msg(msg)).await.is_err() {
                    break;
                }
            }
            // A lost or garbled datagram is superseded by the next one.
            Err(e) => {
                debug!(error = %e, "udp recv");
                if events.is_closed() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

//! Authoritative game server.
//!
//! Owns the canonical world and the connection table. Each tick:
//! - drain incoming messages (login flow, input, weapon swaps),
//! - advance the simulation by one fixed step,
//! - announce replicated entity creations/removals reliably,
//! - every 8th tick, broadcast the ship snapshot plus per-player vitals
//!   over UDP.
//!
//! Determinism notes:
//! - Keep simulation in a fixed timestep.
//! - Avoid wall-clock-dependent branching in gameplay code.
//! - Broadcasts enumerate a roster snapshot collected up front.

use anyhow::Context;
use arena_shared::{
    config::ArenaConfig,
    entity::EntityId,
    mask::ArenaMap,
    net::{
        clamp_name, ConnId, JoinedInfo, LoginStatus, MapInfo, NetMsg, ReliableListener,
        ReliableWriter, ShipUpdate, GAME_VERSION, PROTOCOL_VERSION,
    },
    registry::Registry,
    ship::{InputKeys, Player},
    world::{World, WorldEvent},
};
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::Path,
    time::Duration,
};
use tokio::{
    net::UdpSocket,
    sync::mpsc,
    time::Instant,
};
use tracing::{debug, info, warn};

/// Grace period between a login rejection and the forced disconnect, so
/// the rejection message lands first.
const REJECT_DROP_DELAY: Duration = Duration::from_secs(5);

/// Messages from the acceptor/reader tasks to the tick loop.
enum NetEvent {
    Connected {
        conn: ConnId,
        writer: ReliableWriter,
        peer: SocketAddr,
    },
    Msg {
        conn: ConnId,
        msg: NetMsg,
    },
    Closed {
        conn: ConnId,
    },
}

/// Per-connection state.
struct ClientConn {
    writer: ReliableWriter,
    peer: SocketAddr,
    /// Snapshot destination; known once the login message arrives.
    udp_peer: Option<SocketAddr>,
    /// Player created at login, parked here until the map-loaded ack.
    pending: Option<Player>,
    /// Ship id reserved at login.
    ship: Option<EntityId>,
    logged_in: bool,
    /// Rejected logins are dropped once this deadline passes.
    drop_at: Option<Instant>,
}

/// Game server.
pub struct GameServer {
    pub cfg: ArenaConfig,
    map: ArenaMap,
    registry: Registry,
    world: World,
    clients: HashMap<ConnId, ClientConn>,

    udp: UdpSocket,
    local_addr: SocketAddr,
    events_rx: mpsc::Receiver<NetEvent>,
}

impl GameServer {
    /// Creates a server from config, loading the map from disk.
    pub async fn new(cfg: ArenaConfig) -> anyhow::Result<Self> {
        let path = Path::new(&cfg.maps_dir).join(&cfg.map_file);
        let map = ArenaMap::load(&path)?;
        Self::with_map(cfg, map).await
    }

    /// Creates a server around an in-memory map (tests, generated maps).
    pub async fn with_map(mut cfg: ArenaConfig, map: ArenaMap) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let tcp = ReliableListener::bind(addr).await?;
        let local_addr = tcp.local_addr()?;
        cfg.server_addr = local_addr.to_string();
        let udp = UdpSocket::bind(local_addr).await.context("udp bind")?;

        let registry = Registry::standard_without(&map.disallow)?;
        let mask = map.mask()?;
        let world = World::new(mask, map.gravity, true);
        // The map's cap wins over the config default.
        cfg.max_players = map.max_players.max(1);

        let (events_tx, events_rx) = mpsc::channel(256);
        tokio::spawn(accept_loop(tcp, events_tx));

        info!(addr = %local_addr, map = %map.name, "Server listening");
        Ok(Self {
            cfg,
            map,
            registry,
            world,
            clients: HashMap::new(),
            udp,
            local_addr,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Logged-in player count.
    pub fn player_count(&self) -> usize {
        self.world.players().len()
    }

    /// Runs the server for a number of ticks at the configured rate.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(1.0 / self.cfg.tick_hz as f32);
        let mut next = Instant::now();
        for _ in 0..ticks {
            next += dt;
            self.step().await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one fixed simulation step.
    pub async fn step(&mut self) -> anyhow::Result<()> {
        self.drain_net().await?;
        self.expire_rejected().await;
        self.world.advance();
        self.flush_replication().await?;
        if self.world.tick() & 7 == 0 {
            self.send_snapshots().await?;
        }
        Ok(())
    }

    async fn drain_net(&mut self) -> anyhow::Result<()> {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                NetEvent::Connected { conn, writer, peer } => {
                    debug!(conn = conn.0, %peer, "connection opened");
                    self.clients.insert(
                        conn,
                        ClientConn {
                            writer,
                            peer,
                            udp_peer: None,
                            pending: None,
                            ship: None,
                            logged_in: false,
                            drop_at: None,
                        },
                    );
                }
                NetEvent::Msg { conn, msg } => {
                    if let Err(e) = self.handle_msg(conn, msg).await {
                        warn!(conn = conn.0, error = %e, "protocol violation, dropping");
                        self.drop_client(conn).await;
                    }
                }
                NetEvent::Closed { conn } => {
                    debug!(conn = conn.0, "connection closed");
                    self.drop_client(conn).await;
                }
            }
        }
        Ok(())
    }

    async fn expire_rejected(&mut self) {
        let now = Instant::now();
        let expired: Vec<ConnId> = self
            .clients
            .iter()
            .filter(|(_, c)| c.drop_at.is_some_and(|t| t <= now))
            .map(|(id, _)| *id)
            .collect();
        for conn in expired {
            self.drop_client(conn).await;
        }
    }

    async fn handle_msg(&mut self, conn: ConnId, msg: NetMsg) -> anyhow::Result<()> {
        if !self.clients.contains_key(&conn) {
            return Ok(()); // already dropped this tick
        }
        match msg {
            NetMsg::Login { name, team, protocol, version, udp_port } => {
                self.on_login(conn, name, team, protocol, version, udp_port).await
            }
            NetMsg::Loaded => self.on_loaded(conn).await,
            NetMsg::Input { keys } => self.on_input(conn, keys),
            NetMsg::SpawnMe => self.on_spawn_me(conn).await,
            NetMsg::UpdateWeaps { gun, special, gun_ammo, special_ammo } => {
                self.on_update_weaps(conn, gun, special, gun_ammo, special_ammo)
            }
            other => anyhow::bail!("unexpected message from client: {other:?}"),
        }
    }

    async fn on_login(
        &mut self,
        conn: ConnId,
        name: String,
        team: arena_shared::ship::Team,
        protocol: u8,
        version: i32,
        udp_port: u16,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(!self.client(conn)?.logged_in, "duplicate login");
        anyhow::ensure!(self.client(conn)?.pending.is_none(), "login while pending");

        let name = clamp_name(&name);
        let status = if protocol != PROTOCOL_VERSION {
            LoginStatus::BadProtocol
        } else if version != GAME_VERSION {
            LoginStatus::BadVersion
        } else if self.player_count() as u32 >= self.cfg.max_players {
            LoginStatus::TooManyUsers
        } else if self.cfg.banned.iter().any(|b| b == &name) {
            LoginStatus::Banned
        } else {
            LoginStatus::Success
        };

        if status != LoginStatus::Success {
            info!(conn = conn.0, %name, ?status, "login rejected");
            let client = self.client_mut(conn)?;
            client.drop_at = Some(Instant::now() + REJECT_DROP_DELAY);
            let reply = NetMsg::LoginReturn {
                status,
                ship: EntityId(0),
                server_version: GAME_VERSION,
            };
            let _ = self.client_mut(conn)?.writer.send(&reply).await;
            return Ok(());
        }

        let ship_id = self.world.allocate_id();
        let mut player = Player::new(name.clone(), team);
        player.ship.id = ship_id;

        let map_info = NetMsg::MapInfo(MapInfo {
            map: self.map.name.clone(),
            gravity: self.world.gravity,
            guns: self.registry.gun_names(),
            specials: self.registry.special_names(),
        });
        let client = self.client_mut(conn)?;
        let udp_ip = client.peer.ip();
        client.udp_peer = Some(SocketAddr::new(udp_ip, udp_port));
        client.pending = Some(player);
        client.ship = Some(ship_id);
        client
            .writer
            .send(&NetMsg::LoginReturn {
                status: LoginStatus::Success,
                ship: ship_id,
                server_version: GAME_VERSION,
            })
            .await?;
        self.client_mut(conn)?.writer.send(&map_info).await?;

        info!(conn = conn.0, %name, ship = ship_id.0, "login accepted");
        Ok(())
    }

    async fn on_loaded(&mut self, conn: ConnId) -> anyhow::Result<()> {
        let mut player = self
            .client_mut(conn)?
            .pending
            .take()
            .context("Loaded before login")?;

        let spawn = self.world.find_spawn_point().context("map has no spawn points")?;
        player.ship.spawn(spawn);
        player.ship.gun = self.registry.make_gun(0)?;
        player.ship.special = self.registry.make_special(0)?;
        player.logged_in = true;

        let joined = NetMsg::Joined(joined_info(&player));
        let others: Vec<NetMsg> = self
            .world
            .players()
            .iter()
            .map(|p| NetMsg::Joined(joined_info(p)))
            .collect();

        info!(name = %player.name, ship = player.ship.id.0, "player entered play");
        self.world.add_player(player);
        self.client_mut(conn)?.logged_in = true;

        self.broadcast(&joined).await;
        for msg in &others {
            let _ = self.client_mut(conn)?.writer.send(msg).await;
        }
        Ok(())
    }

    fn on_input(&mut self, conn: ConnId, keys: u8) -> anyhow::Result<()> {
        let ship = self.logged_in_ship(conn)?;
        let player = self
            .world
            .player_by_ship_mut(ship)
            .context("input for unknown ship")?;
        player.inputs = InputKeys::from_bits_truncate(keys);
        Ok(())
    }

    async fn on_spawn_me(&mut self, conn: ConnId) -> anyhow::Result<()> {
        let ship = self.logged_in_ship(conn)?;
        let spawn = self.world.find_spawn_point().context("map has no spawn points")?;
        let gun = self.registry.make_gun(0)?;
        let special = self.registry.make_special(0)?;
        let (gun_ammo, special_ammo) = (gun.ammo, special.ammo);
        {
            let s = self
                .world
                .find_ship_mut(ship)
                .context("respawn for unknown ship")?;
            s.spawn(spawn);
            s.gun = gun;
            s.special = special;
        }
        // Fresh ships fly the default loadout; tell the owner.
        let reply = NetMsg::UpdateWeaps {
            gun: 0,
            special: 0,
            gun_ammo,
            special_ammo,
        };
        let _ = self.client_mut(conn)?.writer.send(&reply).await;
        Ok(())
    }

    fn on_update_weaps(
        &mut self,
        conn: ConnId,
        gun: u8,
        special: u8,
        gun_ammo: i32,
        special_ammo: i32,
    ) -> anyhow::Result<()> {
        let ship = self.logged_in_ship(conn)?;
        let mut new_gun = self.registry.make_gun(gun as usize)?;
        let mut new_special = self.registry.make_special(special as usize)?;
        anyhow::ensure!(
            gun_ammo <= new_gun.max_ammo && special_ammo <= new_special.max_ammo,
            "weapon swap exceeds max ammo"
        );
        anyhow::ensure!(gun_ammo >= 0 && special_ammo >= 0, "negative ammo");
        new_gun.ammo = gun_ammo;
        new_special.ammo = special_ammo;
        let s = self
            .world
            .find_ship_mut(ship)
            .context("weapon swap for unknown ship")?;
        s.gun = new_gun;
        s.special = new_special;
        Ok(())
    }

    fn client(&self, conn: ConnId) -> anyhow::Result<&ClientConn> {
        self.clients.get(&conn).context("unknown connection")
    }

    fn client_mut(&mut self, conn: ConnId) -> anyhow::Result<&mut ClientConn> {
        self.clients.get_mut(&conn).context("unknown connection")
    }

    fn logged_in_ship(&self, conn: ConnId) -> anyhow::Result<EntityId> {
        let client = self.client(conn)?;
        anyhow::ensure!(client.logged_in, "message before entering play");
        client.ship.context("no ship bound to connection")
    }

    /// Tears down a connection: roster, world, and the departure notice.
    async fn drop_client(&mut self, conn: ConnId) {
        let Some(client) = self.clients.remove(&conn) else {
            return;
        };
        if let Some(ship) = client.ship {
            if self.world.remove_player(ship).is_some() {
                info!(ship = ship.0, "player left");
                self.broadcast(&NetMsg::Left { ship }).await;
            }
        }
    }

    /// Sends a reliable message to every logged-in client. A failed send
    /// marks the connection for teardown on the next drain.
    async fn broadcast(&mut self, msg: &NetMsg) {
        let targets: Vec<ConnId> = self
            .clients
            .iter()
            .filter(|(_, c)| c.logged_in)
            .map(|(id, _)| *id)
            .collect();
        let mut failed = Vec::new();
        for conn in targets {
            if let Some(client) = self.clients.get_mut(&conn) {
                if client.writer.send(msg).await.is_err() {
                    failed.push(conn);
                }
            }
        }
        for conn in failed {
            // Box::pin avoids infinitely-sized recursion through Left
            // broadcasts during teardown.
            Box::pin(self.drop_client(conn)).await;
        }
    }

    /// Announces entity creations and authorized removals from this tick.
    async fn flush_replication(&mut self) -> anyhow::Result<()> {
        for event in self.world.drain_events() {
            match event {
                WorldEvent::ObjectAdded(id) => {
                    let Some(spawn) = self
                        .world
                        .find_object(id)
                        .and_then(|e| self.registry.wire_spawn(e))
                    else {
                        continue;
                    };
                    self.broadcast(&NetMsg::AddObject(spawn)).await;
                }
                WorldEvent::ObjectRemoved(id) => {
                    self.broadcast(&NetMsg::RemObject { id }).await;
                }
            }
        }
        Ok(())
    }

    /// Ship snapshot plus owner-addressed vitals, over UDP.
    async fn send_snapshots(&mut self) -> anyhow::Result<()> {
        let ships: Vec<ShipUpdate> = self
            .world
            .players()
            .iter()
            .map(|p| ShipUpdate {
                ship: p.ship.id,
                pos: p.ship.pos,
                vel: p.ship.vel,
                angle: p.ship.angle,
                keys: p.inputs.bits(),
            })
            .collect();
        let batch = serde_json::to_vec(&NetMsg::UpdateShips { ships })?;

        // Stable roster snapshot before any sends.
        let targets: Vec<(SocketAddr, Vec<u8>)> = self
            .clients
            .values()
            .filter(|c| c.logged_in)
            .filter_map(|c| {
                let udp = c.udp_peer?;
                let ship = c.ship?;
                let p = self.world.players().iter().find(|p| p.ship.id == ship)?;
                let vitals = serde_json::to_vec(&NetMsg::UpdateShip {
                    health: p.ship.health,
                    fuel: p.ship.fuel,
                    gun_ammo: p.ship.gun.ammo,
                    special_ammo: p.ship.special.ammo,
                })
                .ok()?;
                Some((udp, vitals))
            })
            .collect();

        for (udp_peer, vitals) in targets {
            let _ = self.udp.send_to(&batch, udp_peer).await;
            let _ = self.udp.send_to(&vitals, udp_peer).await;
        }
        Ok(())
    }
}

fn joined_info(player: &Player) -> JoinedInfo {
    JoinedInfo {
        name: player.name.clone(),
        team: player.team,
        ship: player.ship.id,
        pos: player.ship.pos,
        vel: player.ship.vel,
        keys: player.inputs.bits(),
    }
}

async fn accept_loop(tcp: ReliableListener, events: mpsc::Sender<NetEvent>) {
    loop {
        let Ok((conn, peer)) = tcp.accept().await else {
            break;
        };
        let id = ConnId::new_unique();
        let (mut reader, writer) = conn.split();
        if events
            .send(NetEvent::Connected { conn: id, writer, peer })
            .await
            .is_err()
        {
            break;
        }
        let events = events.clone();
        tokio::spawn(async move {
            loop {
                match reader.recv().await {
                    Ok(msg) => {
                        if events.send(NetEvent::Msg { conn: id, msg }).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        let _ = events.send(NetEvent::Closed { conn: id }).await;
                        break;
                    }
                }
            }
        });
    }
}

/// Helper for tests: bind to an ephemeral port around an in-memory map.
pub async fn bind_ephemeral(map: ArenaMap) -> anyhow::Result<(GameServer, ArenaConfig)> {
    let cfg = ArenaConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        ..Default::default()
    };
    let server = GameServer::with_map(cfg, map).await?;
    let cfg = server.cfg.clone();
    Ok((server, cfg))
}

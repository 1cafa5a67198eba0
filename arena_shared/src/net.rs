//! Networking primitives and the replication message catalog.
//!
//! Goals:
//! - Provide a simple reliable (TCP) and unreliable (UDP) channel.
//! - Provide the typed messages that keep a client's mirrored world
//!   consistent with the server's.
//! - Keep serialization explicit and versionable.
//!
//! Channel assignment: handshake, entity creation/removal, and player
//! intent ride the reliable stream; periodic ship snapshots ride UDP,
//! where losing one is fine because the next supersedes it.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream, UdpSocket,
    },
    time,
};

use crate::{
    entity::{EntityId, Rgb},
    math::Vec2,
    ship::Team,
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Game build version; divide by 100 for the display number.
pub const GAME_VERSION: i32 = 10;

/// Player names are clamped to this many bytes.
pub const MAX_NAME_LEN: usize = 64;

static NEXT_CONN_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connection on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId(pub u32);

impl ConnId {
    pub fn new_unique() -> Self {
        ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Clamps a player name to `MAX_NAME_LEN` bytes on a char boundary.
pub fn clamp_name(name: &str) -> String {
    let mut end = name.len().min(MAX_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// Login outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginStatus {
    Success,
    BadProtocol,
    BadVersion,
    TooManyUsers,
    Banned,
}

/// Map information sent to clients after a successful login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MapInfo {
    pub map: String,
    pub gravity: Vec2,
    /// Selectable gun kinds, in server order; indices are wire currency.
    pub guns: Vec<String>,
    /// Selectable special kinds, in server order.
    pub specials: Vec<String>,
}

/// Announcement of a player entering play.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinedInfo {
    pub name: String,
    pub team: Team,
    pub ship: EntityId,
    pub pos: Vec2,
    pub vel: Vec2,
    pub keys: u8,
}

/// One-shot entity creation record: kind tag plus the fields every wire
/// kind needs. `color` only matters for owner-colored bullets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ObjectSpawn {
    pub kind: u8,
    pub id: EntityId,
    pub angle: u8,
    pub pos: Vec2,
    pub vel: Vec2,
    pub owner: EntityId,
    pub color: Rgb,
}

/// One ship's slice of a snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ShipUpdate {
    pub ship: EntityId,
    pub pos: Vec2,
    pub vel: Vec2,
    pub angle: u8,
    pub keys: u8,
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Client to server ───
    Login {
        name: String,
        team: Team,
        protocol: u8,
        version: i32,
        /// Where this client listens for snapshots.
        udp_port: u16,
    },
    /// Acks that the map is loaded and the player may enter play.
    Loaded,
    /// Input bitmask; sent on change, high priority.
    Input {
        keys: u8,
    },
    /// Respawn request from a dead ship.
    SpawnMe,

    // ─── Server to client ───
    LoginReturn {
        status: LoginStatus,
        ship: EntityId,
        server_version: i32,
    },
    MapInfo(MapInfo),
    Joined(JoinedInfo),
    Left {
        ship: EntityId,
    },
    /// One-shot entity creation. Receipt must be idempotent: a spawn for
    /// an already-known id is ignored.
    AddObject(ObjectSpawn),
    /// Authorized removal of a replicated entity.
    RemObject {
        id: EntityId,
    },
    /// Snapshot of all logged-in ships. UDP; state, not deltas.
    UpdateShips {
        ships: Vec<ShipUpdate>,
    },
    /// Owner-addressed vitals. UDP.
    UpdateShip {
        health: i32,
        fuel: i32,
        gun_ammo: i32,
        special_ammo: i32,
    },

    // ─── Either way ───
    /// Weapon selection change with resulting ammo counts.
    UpdateWeaps {
        gun: u8,
        special: u8,
        gun_ammo: i32,
        special_ammo: i32,
    },
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let frame = frame_msg(msg)?;
        self.stream.write_all(&frame).await.context("tcp write")?;
        Ok(())
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .context("tcp read len")?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
        Ok(msg)
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned read/write halves so a reader task
    /// can pump messages while the owner keeps sending.
    pub fn split(self) -> (ReliableReader, ReliableWriter) {
        let (read, write) = self.stream.into_split();
        (ReliableReader { read }, ReliableWriter { write })
    }
}

/// Read half of a split reliable connection.
#[derive(Debug)]
pub struct ReliableReader {
    read: OwnedReadHalf,
}

impl ReliableReader {
    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        let mut len_buf = [0u8; 4];
        self.read
            .read_exact(&mut len_buf)
            .await
            .context("tcp read len")?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        self.read
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
        Ok(msg)
    }
}

/// Write half of a split reliable connection.
#[derive(Debug)]
pub struct ReliableWriter {
    write: OwnedWriteHalf,
}

impl ReliableWriter {
    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let frame = frame_msg(msg)?;
        self.write.write_all(&frame).await.context("tcp write")?;
        Ok(())
    }
}

fn frame_msg(msg: &NetMsg) -> anyhow::Result<BytesMut> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Unreliable channel over UDP.
#[derive(Debug)]
pub struct UnreliableConn {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UnreliableConn {
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await.context("udp bind")?;
        socket.connect(peer).await.context("udp connect")?;
        Ok(Self { socket, peer })
    }

    pub async fn send(&self, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(msg).context("serialize udp msg")?;
        self.socket.send(&payload).await.context("udp send")?;
        Ok(())
    }

    pub async fn recv(&self) -> anyhow::Result<NetMsg> {
        let mut buf = vec![0u8; 64 * 1024];
        let n = self.socket.recv(&mut buf).await.context("udp recv")?;
        let msg = serde_json::from_slice(&buf[..n]).context("deserialize udp msg")?;
        Ok(msg)
    }

    /// Receives a datagram within the given timeout.
    pub async fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Option<NetMsg>> {
        let mut buf = vec![0u8; 64 * 1024];
        match time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                let msg = serde_json::from_slice(&buf[..n]).context("deserialize udp msg")?;
                Ok(Some(msg))
            }
            Ok(Err(e)) => Err(e).context("udp recv")?,
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netmsg_roundtrip_bytes() {
        let msg = NetMsg::Login {
            name: "Alice".into(),
            team: Team::Green,
            protocol: PROTOCOL_VERSION,
            version: GAME_VERSION,
            udp_port: 50000,
        };
        let bytes = encode_to_bytes(&msg).unwrap();
        let back = decode_from_bytes(&bytes).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn snapshot_roundtrip() {
        let msg = NetMsg::UpdateShips {
            ships: vec![ShipUpdate {
                ship: EntityId(3),
                pos: Vec2::new(10.0, 20.0),
                vel: Vec2::new(0.5, -0.25),
                angle: 192,
                keys: 0b10101,
            }],
        };
        let back = decode_from_bytes(&encode_to_bytes(&msg).unwrap()).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn clamp_name_respects_char_boundaries() {
        let long = "x".repeat(80);
        assert_eq!(clamp_name(&long).len(), MAX_NAME_LEN);
        let accented = "é".repeat(40); // 2 bytes each, boundary falls mid-char
        let clamped = clamp_name(&accented);
        assert!(clamped.len() <= MAX_NAME_LEN);
        assert!(accented.starts_with(&clamped));
    }
}

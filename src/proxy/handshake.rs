//! Client handshake module
//!
//! Runs the first exchange on every accepted socket: the encryption seed,
//! then either an account login (a fresh session, or the login dance for
//! an attach) or a game login (a socket returning through the rewritten
//! relay). Once the socket is classified it is handed to a connection
//! task and this module is out of the picture.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::error::{NetworkError, ProtocolError, Result, UogateError};
use crate::protocol::codec::{ids, Frame, FrameDecoder};
use crate::protocol::packets::{
    AccountLogin, GameLogin, Relay, ServerList, ServerListEntry, ServerSelect, WirePacket,
};
use crate::proxy::connection::{Connection, ConnectionEvent};
use crate::proxy::registry::ConnectionRegistry;

/// Time budget for the whole handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// The seed material a client opens with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedInfo {
    /// Classic four raw bytes
    Raw(u32),
    /// Extended seed packet with the client version
    Extended {
        /// The seed value
        seed: u32,
        /// Version reported in the packet
        version: String,
    },
}

impl SeedInfo {
    /// The seed value regardless of form
    pub fn seed(&self) -> u32 {
        match self {
            SeedInfo::Raw(seed) => *seed,
            SeedInfo::Extended { seed, .. } => *seed,
        }
    }
}

/// Split the seed off the front of the handshake buffer
///
/// Returns `Ok(None)` when more bytes are needed. Clients either open
/// with four raw seed bytes or with the extended seed packet (0xEF)
/// carrying the version.
pub fn take_seed(buf: &mut BytesMut) -> std::result::Result<Option<SeedInfo>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    if buf[0] == ids::EXTENDED_SEED {
        if buf.len() < 21 {
            return Ok(None);
        }
        let frame = buf.split_to(21);
        let seed = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let mut parts = [0u32; 4];
        for (i, part) in parts.iter_mut().enumerate() {
            let at = 5 + i * 4;
            *part = u32::from_be_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]]);
        }
        let version = format!("{}.{}.{}.{}", parts[0], parts[1], parts[2], parts[3]);
        return Ok(Some(SeedInfo::Extended { seed, version }));
    }

    if buf.len() < 4 {
        return Ok(None);
    }
    let bytes = buf.split_to(4);
    Ok(Some(SeedInfo::Raw(u32::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3],
    ]))))
}

/// Run the handshake on a fresh socket and route it
pub async fn handle_socket(
    stream: TcpStream,
    address: SocketAddr,
    config: Arc<ProxyConfig>,
    registry: Arc<ConnectionRegistry>,
) {
    if let Err(e) = timeout(
        HANDSHAKE_TIMEOUT,
        run_handshake(stream, address, config, registry),
    )
    .await
    .unwrap_or(Err(UogateError::Network(NetworkError::Timeout)))
    {
        debug!(address = %address, error = %e, "handshake aborted");
    }
}

async fn run_handshake(
    mut stream: TcpStream,
    address: SocketAddr,
    config: Arc<ProxyConfig>,
    registry: Arc<ConnectionRegistry>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut buf = BytesMut::with_capacity(256);

    // The seed comes first on every socket
    let seed = loop {
        if let Some(seed) = take_seed(&mut buf)? {
            break seed;
        }
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(UogateError::Network(NetworkError::ConnectionClosed));
        }
    };
    debug!(address = %address, seed = format_args!("{:#010x}", seed.seed()), "client seed");

    // Then the login packet that classifies the socket
    let decoder = FrameDecoder::new();
    loop {
        let frame = next_frame(&decoder, &mut stream, &mut buf).await?;
        match frame.id {
            ids::ACCOUNT_LOGIN => {
                let login = AccountLogin::parse(&frame)?;
                return route_account_login(stream, address, buf, login, seed, config, registry)
                    .await;
            }
            ids::GAME_LOGIN => {
                let login = GameLogin::parse(&frame)?;
                return route_game_login(stream, address, buf, login, registry).await;
            }
            other => {
                debug!(
                    address = %address,
                    packet = format_args!("{other:#04x}"),
                    "pre-login packet ignored"
                );
            }
        }
    }
}

async fn next_frame(
    decoder: &FrameDecoder,
    stream: &mut TcpStream,
    buf: &mut BytesMut,
) -> Result<Frame> {
    loop {
        if let Some(frame) = decoder.decode(buf)? {
            return Ok(frame);
        }
        if stream.read_buf(buf).await? == 0 {
            return Err(UogateError::Network(NetworkError::ConnectionClosed));
        }
    }
}

/// An account login: join a live session's login dance, or start a new
/// session
async fn route_account_login(
    mut stream: TcpStream,
    address: SocketAddr,
    leftover: BytesMut,
    login: AccountLogin,
    seed: SeedInfo,
    config: Arc<ProxyConfig>,
    registry: Arc<ConnectionRegistry>,
) -> Result<()> {
    if let Some(handle) = registry.find_by_credentials(&login.username, &login.password) {
        // A second client for an existing session: the proxy plays login
        // server itself and relays the client back to its own port.
        info!(
            address = %address,
            connection = handle.id,
            "attach login, answering locally"
        );

        let bind = config.bind_addr();
        let list = ServerList {
            entries: vec![ServerListEntry {
                index: 0,
                name: "uogate".to_string(),
                ip: bind_ip(bind).octets(),
            }],
        };
        stream.write_all(&list.to_frame().data).await?;

        let decoder = FrameDecoder::new();
        let mut buf = leftover;
        loop {
            let frame = next_frame(&decoder, &mut stream, &mut buf).await?;
            if frame.id == ids::SERVER_SELECT {
                let _ = ServerSelect::parse(&frame)?;
                break;
            }
            debug!(packet = format_args!("{:#04x}", frame.id), "ignored during attach login");
        }

        let relay = Relay {
            ip: bind_ip(bind).octets(),
            port: bind.port(),
            auth_id: handle.auth_id(),
        };
        stream.write_all(&relay.to_frame().data).await?;
        // The client drops this socket and returns with a game login
        return Ok(());
    }

    info!(address = %address, username = %login.username, "new session");
    Connection::spawn(
        config,
        registry,
        stream,
        address,
        login,
        seed.seed(),
        leftover,
    );
    Ok(())
}

/// A game login: hand the socket to the session it belongs to
async fn route_game_login(
    stream: TcpStream,
    address: SocketAddr,
    leftover: BytesMut,
    login: GameLogin,
    registry: Arc<ConnectionRegistry>,
) -> Result<()> {
    let Some(handle) =
        registry.find_for_game_login(login.auth_id, &login.username, &login.password)
    else {
        warn!(
            address = %address,
            auth_id = format_args!("{:#010x}", login.auth_id),
            "game login with no matching session"
        );
        return Err(UogateError::Network(NetworkError::SessionNotFound));
    };

    handle
        .events
        .send(ConnectionEvent::Attach {
            stream,
            address,
            login,
            leftover,
        })
        .await
        .map_err(|_| UogateError::Network(NetworkError::ConnectionClosed))?;
    Ok(())
}

/// The address clients are told to connect to
fn bind_ip(bind: SocketAddr) -> Ipv4Addr {
    match bind.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => ip,
        _ => Ipv4Addr::LOCALHOST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_seed_raw() {
        let mut buf = BytesMut::from(&[0x12u8, 0x34, 0x56, 0x78, 0x80][..]);
        let seed = take_seed(&mut buf).unwrap().unwrap();
        assert_eq!(seed, SeedInfo::Raw(0x12345678));
        // The login byte stays in the buffer
        assert_eq!(buf.as_ref(), &[0x80]);
    }

    #[test]
    fn test_take_seed_raw_needs_four_bytes() {
        // 0x12 is not the extended marker, so four raw bytes are expected
        let mut buf = BytesMut::from(&[0x12u8, 0x34][..]);
        assert!(take_seed(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_take_seed_extended() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0xef]);
        buf.extend_from_slice(&0xdeadbeefu32.to_be_bytes());
        for part in [7u32, 0, 34, 23] {
            buf.extend_from_slice(&part.to_be_bytes());
        }
        buf.extend_from_slice(&[0x80]); // next packet

        let seed = take_seed(&mut buf).unwrap().unwrap();
        assert_eq!(
            seed,
            SeedInfo::Extended {
                seed: 0xdeadbeef,
                version: "7.0.34.23".to_string()
            }
        );
        assert_eq!(buf.as_ref(), &[0x80]);
    }

    #[test]
    fn test_take_seed_extended_partial() {
        let mut buf = BytesMut::from(&[0xefu8, 0x00, 0x00][..]);
        assert!(take_seed(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_take_seed_empty() {
        let mut buf = BytesMut::new();
        assert!(take_seed(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_bind_ip_fallback() {
        assert_eq!(
            bind_ip("0.0.0.0:2593".parse().unwrap()),
            Ipv4Addr::LOCALHOST
        );
        assert_eq!(
            bind_ip("192.168.0.9:2593".parse().unwrap()),
            Ipv4Addr::new(192, 168, 0, 9)
        );
    }
}

//! Attached client module
//!
//! One real game client bound to a connection: the handle the connection
//! task keeps in its ordered list, plus the reader and writer tasks that
//! bridge the client's socket to the connection's event channel.

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::protocol::codec::{Frame, FrameDecoder};
use crate::protocol::translate;
use crate::protocol::ProtocolVersion;
use crate::proxy::connection::ConnectionEvent;
use crate::proxy::walk::ClientId;

/// Depth of the per-client outbound queue
const OUTBOUND_QUEUE: usize = 256;

/// Handle to one attached game client
#[derive(Debug)]
pub struct AttachedClient {
    /// Client identity within the connection
    pub id: ClientId,
    /// Remote address
    pub address: SocketAddr,
    /// Dialect this client speaks
    pub dialect: ProtocolVersion,
    /// Set while the client still owes a character select before replay
    pub pending_play: bool,
    outbound: mpsc::Sender<Frame>,
    zombie: bool,
}

impl AttachedClient {
    /// Bind a fresh socket to the connection: spawns the reader and writer
    /// tasks and returns the handle
    ///
    /// `leftover` carries bytes the handshake already pulled off the
    /// socket; the reader frames them before touching the stream.
    pub fn spawn(
        id: ClientId,
        stream: TcpStream,
        address: SocketAddr,
        dialect: ProtocolVersion,
        leftover: BytesMut,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);

        tokio::spawn(run_reader(id, read_half, leftover, events));
        tokio::spawn(run_writer(id, write_half, outbound_rx));

        Self {
            id,
            address,
            dialect,
            pending_play: false,
            outbound: outbound_tx,
            zombie: false,
        }
    }

    /// Whether this client is still routable
    pub fn is_zombie(&self) -> bool {
        self.zombie
    }

    /// Mark the client non-routable; it stays listed until its socket
    /// closes so broadcast iteration stays stable
    pub fn zombify(&mut self) {
        if !self.zombie {
            debug!(client = self.id, "client zombified");
            self.zombie = true;
        }
    }

    /// Queue a server-origin frame for this client, translating to its
    /// dialect
    ///
    /// A full or closed outbound queue zombifies the client rather than
    /// blocking the connection task.
    pub fn send(&mut self, frame: &Frame) {
        if self.zombie {
            return;
        }
        let frame = translate::downgrade(frame, self.dialect);
        if self.outbound.try_send(frame).is_err() {
            warn!(client = self.id, "outbound queue stalled");
            self.zombify();
        }
    }

    /// Queue a frame without dialect translation (handshake material that
    /// is already in the client's dialect)
    pub fn send_raw(&mut self, frame: Frame) {
        if self.zombie {
            return;
        }
        if self.outbound.try_send(frame).is_err() {
            warn!(client = self.id, "outbound queue stalled");
            self.zombify();
        }
    }
}

/// Read frames off the client socket into the connection's event channel
async fn run_reader(
    id: ClientId,
    mut read_half: OwnedReadHalf,
    mut buf: BytesMut,
    events: mpsc::Sender<ConnectionEvent>,
) {
    let decoder = FrameDecoder::new();
    buf.reserve(4096);

    loop {
        match decoder.decode(&mut buf) {
            Ok(Some(frame)) => {
                trace!(client = id, packet = format_args!("{:#04x}", frame.id), "client frame");
                if events
                    .send(ConnectionEvent::ClientPacket { client: id, frame })
                    .await
                    .is_err()
                {
                    return;
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(client = id, error = %e, "client stream desynchronized");
                break;
            }
        }

        match read_half.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(client = id, error = %e, "client read error");
                break;
            }
        }
    }

    let _ = events.send(ConnectionEvent::ClientClosed { client: id }).await;
}

/// Drain the outbound queue onto the client socket
async fn run_writer(id: ClientId, mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_half.write_all(&frame.data).await {
            debug!(client = id, error = %e, "client write error");
            return;
        }
    }
}

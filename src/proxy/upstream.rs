//! Upstream link module
//!
//! The proxy's client side: one TCP connection to the real login or game
//! server. Sends the encryption seed on connect, frames the inbound byte
//! stream, and writes outbound frames.

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::{NetworkError, Result, UogateError};
use crate::protocol::codec::{Frame, FrameDecoder};
use crate::protocol::ProtocolVersion;

/// One connection to the real server
#[derive(Debug)]
pub struct UpstreamLink {
    /// Address this link is connected to
    pub address: SocketAddr,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    decoder: FrameDecoder,
    buf: BytesMut,
}

impl UpstreamLink {
    /// Connect and send the four-byte encryption seed
    pub async fn connect(address: SocketAddr, seed: u32) -> Result<Self> {
        debug!(address = %address, "connecting upstream");
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;

        let (reader, mut writer) = stream.into_split();
        writer.write_all(&seed.to_be_bytes()).await?;

        Ok(Self {
            address,
            reader,
            writer,
            decoder: FrameDecoder::new(),
            buf: BytesMut::with_capacity(8192),
        })
    }

    /// Switch the framing dialect (after the client version is known)
    pub fn set_protocol(&mut self, protocol: ProtocolVersion) {
        self.decoder.set_protocol(protocol);
    }

    /// Read the next whole packet from the server
    pub async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buf)? {
                trace!(id = format_args!("{:#04x}", frame.id), len = frame.len(), "upstream frame");
                return Ok(frame);
            }

            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(UogateError::Network(NetworkError::ConnectionClosed));
            }
        }
    }

    /// Write one frame to the server
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        self.writer.write_all(&frame.data).await?;
        Ok(())
    }

    /// Write raw bytes to the server (seed-less handshake material)
    pub async fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }
}

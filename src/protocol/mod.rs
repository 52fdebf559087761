//! Protocol module
//!
//! Everything about the bytes on the wire:
//! - Packet buffer with the protocol's big-endian primitives
//! - Framing against the packet-length table
//! - Typed packet structs with decode/encode
//! - Dialect 6/7 translation for mixed client populations

pub mod buffer;
pub mod codec;
pub mod packets;
pub mod translate;

/// Protocol dialect spoken by a peer
///
/// The two dialects differ in the ground-item packet shape and the width of
/// a handful of fixed packets; version 7 is the canonical internal form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// 6.x clients
    V6,
    /// 7.x clients
    #[default]
    V7,
}

impl ProtocolVersion {
    /// Derive the dialect from a reported client version string
    pub fn from_client_version(version: &str) -> Self {
        match version.split('.').next().and_then(|s| s.parse::<u32>().ok()) {
            Some(major) if major >= 7 => ProtocolVersion::V7,
            Some(_) => ProtocolVersion::V6,
            None => ProtocolVersion::V7,
        }
    }
}

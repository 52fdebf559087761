//! World mirror module
//!
//! This module tracks the server-side world as observed on the wire:
//! - Serial classification (mobile vs item bands)
//! - Item store with parent links and subtree removal
//! - Mobile store with cached state packets
//! - The mirror itself, applying protocol events to both stores

pub mod item;
pub mod mirror;
pub mod mobile;
pub mod serial;

pub use item::{Item, ItemPlacement, ItemStore};
pub use mirror::WorldMirror;
pub use mobile::{Mobile, MobileStore};
pub use serial::{classify, Serial, SerialClass};

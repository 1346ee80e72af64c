//! midden - wire protocol and client API for the packrat broker

pub mod client;
pub mod wire;

pub use client::{Client, ClientError};
pub use wire::{read_message, Message, MessageKind, WireError};

/// every valid frame starts with these two bytes
pub const MAGIC: [u8; 2] = [0x55, 0x99];

/// port the broker listens on unless told otherwise
pub const DEFAULT_PORT: u16 = 8888;

/// retry budget value meaning "infinite, never decrement"
pub const RETRY_FOREVER: u8 = 255;

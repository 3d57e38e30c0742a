//! The broadcast stage: wire protocol, per-client state and the
//! fan-out server.

pub mod client;
pub mod server;
pub mod wire;

pub use client::ClientInfo;
pub use server::{BroadcastServer, ClientCallback, ServerStats};
pub use wire::{Message, MessageKind, StreamCodec, PROTOCOL_VERSION};

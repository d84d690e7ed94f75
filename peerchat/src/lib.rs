//! `PeerChat` -- per-room chat relay over a publish/subscribe transport.

pub mod config;
pub mod console;
pub mod room;
pub mod transport;

//! `PeerChat` hub server library.
//!
//! Exposes the hub for use in tests and embedding. The hub accepts
//! WebSocket connections, tracks topic membership, and fans published
//! payloads out to every subscriber of a topic.

pub mod config;
pub mod hub;

//! Shared wire definitions for `PeerChat`.

pub mod envelope;
pub mod hub;
pub mod topic;

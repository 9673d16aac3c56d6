//! Pairlink relay — rendezvous relay for two-party p2p signaling.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! matches two WebSocket connections by a shared channel identifier,
//! announces `START_PEERING` when the pair completes, and forwards opaque
//! signaling payloads between exactly the two matched connections.

pub mod channels;
pub mod config;
pub mod relay;
pub mod sweep;

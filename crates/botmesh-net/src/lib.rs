//! `botmesh-net` – The Wire
//!
//! WebSocket transport for the mesh. Components keep one persistent
//! session to the registry daemon; registration, heartbeats, discovery,
//! invocation relay, and dependency notifications all flow over that
//! session as JSON frames. Components never listen on their own sockets —
//! the registry relays calls between sessions and pushes targeted events
//! back out.
//!
//! # Modules
//!
//! - [`protocol`] – the [`Frame`] enum and its JSON encoding.
//! - [`server`] – [`RegistryServer`]: accept loop, per-session tasks, the
//!   invocation relay, and the event router.
//! - [`client`] – [`ComponentSession`] / [`MeshClient`]: the
//!   component-side session with heartbeat ticker and bounded-interval
//!   re-registration after connection loss.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{ComponentSession, MeshClient, SessionConfig};
pub use protocol::Frame;
pub use server::RegistryServer;

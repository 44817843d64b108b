//! `botmesh-registry` – The Directory
//!
//! The authoritative record of every component in the mesh: who exists,
//! what interfaces they expose, where they live, and whether they are
//! currently reachable. State transitions are driven by the heartbeat
//! monitor and explicit shutdown requests, never by callers, and no
//! transition is silent — every one lands on the registry event bus.
//!
//! # Modules
//!
//! - [`config`] – [`LivenessConfig`]: heartbeat interval, missed-probe
//!   limit, and down-grace period as configuration, not constants.
//! - [`events`] – [`RegistryEvent`] and the broadcast [`RegistryEventBus`].
//! - [`table`] – [`RegistrationTable`]: the record store with per-record
//!   locking and the cascade bookkeeping.
//! - [`monitor`] – [`HeartbeatMonitor`]: one independent probe task per
//!   watched identity.
//! - [`registry`] – [`Registry`]: the facade tying table and monitor
//!   together; what servers and in-process harnesses construct.

pub mod config;
pub mod events;
pub mod monitor;
pub mod registry;
pub mod table;

pub use config::LivenessConfig;
pub use events::{RegistryEvent, RegistryEventBus};
pub use monitor::{HeartbeatAnswer, HeartbeatMonitor};
pub use registry::Registry;
pub use table::{RegistrationOutcome, RegistrationTable};

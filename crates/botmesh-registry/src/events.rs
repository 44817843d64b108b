//! Registry event bus.
//!
//! Every state transition in the registration table produces exactly one
//! [`RegistryEvent`] on a [`tokio::sync::broadcast`] channel. Subscribers
//! (the hook runner, the wire server, test harnesses) each get every event;
//! a slow subscriber lags without blocking the others.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use botmesh_types::{ComponentInfo, Constraint};

/// Default buffered-event capacity before slow subscribers start lagging.
const DEFAULT_CAPACITY: usize = 256;

/// A state transition or reference-tracking change in the registry.
///
/// `holder`-carrying variants are targeted: they concern one specific
/// component, and routers deliver them only to that component's session.
/// The rest are mesh-wide observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegistryEvent {
    /// A fresh registration was accepted (record in `Connecting`).
    Registered { info: ComponentInfo },
    /// First heartbeat observed, or a `Down` record completed a fresh
    /// registration handshake.
    ComponentUp { key: String },
    /// The monitor declared the component down after consecutive missed
    /// probes.
    ComponentDown { key: String },
    /// Explicit deregistration (graceful shutdown).
    Deregistered { key: String },
    /// A `Down` record exhausted its grace period and was removed.
    ComponentRemoved { key: String },
    /// `holder` acquired a reference to the component behind `server_key`.
    ClientAttached { server_key: String, client_key: String },
    /// `holder` released its reference to `server_key`.
    ClientDetached { server_key: String, client_key: String },
    /// A dependency `holder` holds a reference to went down. Fired exactly
    /// once per down transition per holder.
    DependencyDown {
        holder: String,
        dependency_key: String,
        constraints: Vec<Constraint>,
    },
    /// A previously-down dependency completed a fresh registration
    /// handshake. The holder's pseudo-reference is already valid again when
    /// this fires; it is not reissued.
    DependencyUp {
        holder: String,
        dependency: ComponentInfo,
        constraints: Vec<Constraint>,
    },
}

impl RegistryEvent {
    /// The component this event is targeted at, if it is a targeted event.
    pub fn target(&self) -> Option<&str> {
        match self {
            RegistryEvent::DependencyDown { holder, .. }
            | RegistryEvent::DependencyUp { holder, .. } => Some(holder),
            RegistryEvent::ClientAttached { server_key, .. }
            | RegistryEvent::ClientDetached { server_key, .. } => Some(server_key),
            _ => None,
        }
    }
}

/// Shared broadcast channel for [`RegistryEvent`]s. Clone it cheaply — all
/// clones share the same underlying channel.
#[derive(Clone, Debug)]
pub struct RegistryEventBus {
    sender: broadcast::Sender<RegistryEvent>,
}

impl RegistryEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to every current subscriber.
    ///
    /// Returns the number of receivers that were handed the event. Zero
    /// subscribers is a normal condition (a registry may run headless), not
    /// an error.
    pub fn publish(&self, event: RegistryEvent) -> usize {
        match self.sender.send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                warn!(?event, "registry event dropped: no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.sender.subscribe()
    }
}

impl Default for RegistryEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

//! [`NotificationHooks`] – the callback contract every component implements.
//!
//! The hook runner calls these serially, in event order, on the task that
//! delivers the component's notifications. An implementation must not block
//! indefinitely: a stalled hook stalls every later notification for that
//! component (other components are unaffected).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use botmesh_registry::RegistryEvent;
use botmesh_types::{ComponentInfo, Constraint, Credentials};

/// Reactions to connect/disconnect events in both directions: components
/// attaching to *this* component (client side) and dependencies *this*
/// component holds references to (server side).
///
/// Every method has a no-op default so implementations override only what
/// they care about.
#[async_trait]
pub trait NotificationHooks: Send + Sync {
    /// Another component acquired a reference to this one.
    async fn on_client_connect(&self, client_key: &str) {
        let _ = client_key;
    }

    /// A client released its reference (or went away). Return `true` to
    /// drop any per-client state kept for it.
    async fn on_client_disconnect(&self, client_key: &str) -> bool {
        let _ = client_key;
        true
    }

    /// A dependency this component holds a reference to was declared down.
    /// `constraints` describe which dependency changed.
    async fn on_dependency_down(&self, server_key: &str, constraints: &[Constraint]) {
        let _ = (server_key, constraints);
    }

    /// A previously-down dependency completed a fresh registration
    /// handshake. The existing pseudo-reference already works again when
    /// this runs; it is not reissued, and `handle` is informational.
    async fn on_dependency_up(
        &self,
        server_key: &str,
        handle: &ComponentInfo,
        constraints: &[Constraint],
    ) {
        let _ = (server_key, handle, constraints);
    }

    /// A remote shutdown was requested with the presented credentials.
    /// Return `true` to permit it. The default permits unconditionally;
    /// deployments that gate shutdown compare against their own blob.
    async fn on_shutdown_requested(&self, credentials: &Credentials) -> bool {
        let _ = credentials;
        true
    }
}

/// Hooks that do nothing; useful for components with no reactions and for
/// tests.
pub struct NoopHooks;

#[async_trait]
impl NotificationHooks for NoopHooks {}

/// Feeds targeted [`RegistryEvent`]s into one component's hooks.
pub struct HookRunner;

impl HookRunner {
    /// Spawn the delivery task for the component behind `key`.
    ///
    /// The task exits when the event bus closes. Lagged subscriptions are
    /// logged and skipped rather than terminating delivery.
    pub fn spawn(
        key: String,
        hooks: Arc<dyn NotificationHooks>,
        mut events: broadcast::Receiver<RegistryEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(component = %key, lagged_by = n, "hook runner lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                deliver(&key, hooks.as_ref(), event).await;
            }
            debug!(component = %key, "hook runner exiting");
        })
    }
}

async fn deliver(key: &str, hooks: &dyn NotificationHooks, event: RegistryEvent) {
    match event {
        RegistryEvent::DependencyDown {
            holder,
            dependency_key,
            constraints,
        } if holder == key => {
            hooks.on_dependency_down(&dependency_key, &constraints).await;
        }
        RegistryEvent::DependencyUp {
            holder,
            dependency,
            constraints,
        } if holder == key => {
            hooks
                .on_dependency_up(&dependency.identity.key(), &dependency, &constraints)
                .await;
        }
        RegistryEvent::ClientAttached {
            server_key,
            client_key,
        } if server_key == key => {
            hooks.on_client_connect(&client_key).await;
        }
        RegistryEvent::ClientDetached {
            server_key,
            client_key,
        } if server_key == key => {
            let _remove = hooks.on_client_disconnect(&client_key).await;
        }
        _ => {}
    }
}

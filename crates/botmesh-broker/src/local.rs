//! [`LocalMesh`] – in-process directory and invoker.
//!
//! Hosts components that live in the same process as the registry:
//! dispatch goes straight to the target's [`Dispatcher`] with no wire in
//! between. The transport crate provides the remote twin of this type;
//! both sit behind the same [`Directory`]/[`Invoker`] seams, so brokers
//! and references cannot tell the difference.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use botmesh_dispatch::Dispatcher;
use botmesh_registry::{HeartbeatAnswer, Registry};
use botmesh_types::{ComponentIdentity, ComponentInfo, MeshError, Value};

use crate::broker::{Directory, Invoker};

/// In-process mesh: a registry plus the dispatchers of locally hosted
/// components.
pub struct LocalMesh {
    registry: Arc<Registry>,
    dispatchers: RwLock<HashMap<String, Arc<Dispatcher>>>,
}

impl LocalMesh {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            dispatchers: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Register `identity` and serve its calls with `dispatcher`.
    pub fn host(&self, identity: ComponentIdentity, dispatcher: Dispatcher) -> Result<(), MeshError> {
        let key = identity.key();
        self.registry
            .register(identity, dispatcher.catalog().clone(), "in-process", 0)?;
        self.dispatchers
            .write()
            .expect("dispatcher map lock poisoned")
            .insert(key, Arc::new(dispatcher));
        Ok(())
    }

    /// Re-run the registration handshake for a down identity, replacing
    /// its dispatcher (a restarted component brings a fresh one).
    pub fn rehost(
        &self,
        identity: ComponentIdentity,
        dispatcher: Dispatcher,
    ) -> Result<(), MeshError> {
        self.host(identity, dispatcher)
    }

    /// Gracefully deregister a hosted component.
    pub fn unhost(&self, key: &str) {
        self.registry.deregister(key);
        self.dispatchers
            .write()
            .expect("dispatcher map lock poisoned")
            .remove(key);
    }

    /// Spawn a heartbeat pump for a hosted component: ticks at the
    /// configured interval until the registry stops recognizing the
    /// identity. Abort the handle to simulate a crash.
    pub fn start_heartbeats(&self, key: &str) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let interval = registry.config().heartbeat_interval();
        let key = key.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if registry.heartbeat(&key) == HeartbeatAnswer::Unknown {
                    debug!(component = %key, "registry no longer recognizes us, pump exiting");
                    return;
                }
            }
        })
    }

    /// Push a hosted component straight to `Down`, skipping the probe
    /// deadline. Supervisor/test convenience; normal outages come from the
    /// heartbeat monitor.
    pub fn force_down(&self, key: &str) {
        self.registry.table().mark_down(key);
    }
}

#[async_trait]
impl Directory for LocalMesh {
    async fn lookup(
        &self,
        component_type: &str,
        name: Option<&str>,
    ) -> Result<Option<ComponentInfo>, MeshError> {
        Ok(self.registry.lookup(component_type, name))
    }

    async fn track_reference(
        &self,
        holder_key: &str,
        dependency_key: &str,
    ) -> Result<(), MeshError> {
        self.registry.track_reference(holder_key, dependency_key)
    }

    async fn release_reference(
        &self,
        holder_key: &str,
        dependency_key: &str,
    ) -> Result<(), MeshError> {
        self.registry.release_reference(holder_key, dependency_key);
        Ok(())
    }
}

#[async_trait]
impl Invoker for LocalMesh {
    async fn invoke(
        &self,
        target_key: &str,
        method: &str,
        args: &[Value],
        timeout_ms: u64,
    ) -> Result<Value, MeshError> {
        let identity = ComponentIdentity::parse_key(target_key)?;
        let info = self
            .registry
            .lookup(identity.component_type(), Some(identity.name()))
            .ok_or_else(|| MeshError::ConnectionLost(target_key.to_string()))?;
        if !info.state.is_live() {
            return Err(MeshError::ConnectionLost(target_key.to_string()));
        }
        let dispatcher = self
            .dispatchers
            .read()
            .expect("dispatcher map lock poisoned")
            .get(target_key)
            .cloned()
            .ok_or_else(|| MeshError::ConnectionLost(target_key.to_string()))?;

        let run = async { dispatcher.invoke(method, args) };
        let result = if timeout_ms > 0 {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(MeshError::RemoteInvocationFailed {
                        method: method.to_string(),
                        detail: format!(
                            "local wait aborted after {timeout_ms} ms; the callee may still be executing"
                        ),
                        connection_lost: false,
                    });
                }
            }
        } else {
            run.await
        };

        if result.is_ok() {
            // A served call counts as liveness, independent of heartbeats.
            self.registry.touch_activity(target_key);
        }
        result
    }
}

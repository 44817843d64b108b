//! [`ReferenceBroker`] – resolves type-based discovery requests into
//! callable [`Reference`]s.
//!
//! The broker never talks wire protocol itself; it works through two
//! seams, [`Directory`] (lookup + reference tracking) and [`Invoker`]
//! (actually calling a resolved target), implemented in-process by
//! [`LocalMesh`][crate::local::LocalMesh] and over the wire by the
//! transport crate.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use botmesh_types::{ComponentInfo, MeshError, Value};

use crate::reference::Reference;

/// Read access to the registration table, wherever it lives.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Find a record by type, and name when given. `Ok(None)` means "no
    /// such component right now", which blocking acquisition treats as
    /// "keep waiting".
    async fn lookup(
        &self,
        component_type: &str,
        name: Option<&str>,
    ) -> Result<Option<ComponentInfo>, MeshError>;

    /// Arm the down-cascade: `holder_key` now holds a reference to
    /// `dependency_key`.
    async fn track_reference(&self, holder_key: &str, dependency_key: &str)
    -> Result<(), MeshError>;

    /// Disarm it again; future outages of `dependency_key` no longer
    /// notify the holder.
    async fn release_reference(
        &self,
        holder_key: &str,
        dependency_key: &str,
    ) -> Result<(), MeshError>;
}

/// Delivery of a resolved call to its target.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Invoke `method` on the component behind `target_key`.
    ///
    /// `timeout_ms` bounds the local wait only; `0` means wait forever.
    /// When the timeout fires the remote side may still be executing —
    /// this is fire-and-abandon, not remote cancellation.
    async fn invoke(
        &self,
        target_key: &str,
        method: &str,
        args: &[Value],
        timeout_ms: u64,
    ) -> Result<Value, MeshError>;
}

/// Hands out pseudo-references on behalf of one holder component.
pub struct ReferenceBroker {
    holder_key: String,
    directory: Arc<dyn Directory>,
    invoker: Arc<dyn Invoker>,
    poll_interval: std::time::Duration,
}

impl ReferenceBroker {
    pub fn new(
        holder_key: impl Into<String>,
        directory: Arc<dyn Directory>,
        invoker: Arc<dyn Invoker>,
        poll_interval: std::time::Duration,
    ) -> Self {
        Self {
            holder_key: holder_key.into(),
            directory,
            invoker,
            poll_interval,
        }
    }

    pub fn holder_key(&self) -> &str {
        &self.holder_key
    }

    /// Acquire a reference to a component of `component_type`, optionally
    /// by instance `name`.
    ///
    /// * `blocking == false` – returns immediately. The reference may not
    ///   be resolved yet; it silently starts working once the table
    ///   reports a live match.
    /// * `blocking == true, timeout_ms > 0` – retries lookup on the
    ///   configured poll interval until a live match appears, then fails
    ///   with [`MeshError::ReferenceTimeout`].
    /// * `blocking == true, timeout_ms == 0` – retries indefinitely. This
    ///   can suspend the caller for the component's entire lifetime if the
    ///   dependency never appears; callers wanting caller-side
    ///   cancellation race this future against their own timer or drop it.
    pub async fn get_reference(
        &self,
        component_type: &str,
        name: Option<&str>,
        blocking: bool,
        timeout_ms: u64,
    ) -> Result<Reference, MeshError> {
        let reference = Reference::new(
            self.holder_key.clone(),
            component_type,
            name,
            Arc::clone(&self.directory),
            Arc::clone(&self.invoker),
        );
        if !blocking {
            debug!(
                holder = %self.holder_key,
                component_type,
                "handing out deferred reference"
            );
            return Ok(reference);
        }

        let started = Instant::now();
        loop {
            if let Some(info) = self.directory.lookup(component_type, name).await? {
                if info.state.is_live() {
                    let key = info.identity.key();
                    self.directory
                        .track_reference(&self.holder_key, &key)
                        .await?;
                    reference.note_resolved(&key);
                    debug!(holder = %self.holder_key, target = %key, "reference resolved");
                    return Ok(reference);
                }
            }
            if timeout_ms > 0 && started.elapsed().as_millis() as u64 >= timeout_ms {
                return Err(MeshError::ReferenceTimeout {
                    component_type: component_type.to_string(),
                    waited_ms: timeout_ms,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Release a reference: the holder drops out of the dependency's
    /// cascade set and should discard the handle.
    pub async fn release(&self, reference: &Reference) -> Result<(), MeshError> {
        if let Some(key) = reference.last_resolved_key() {
            self.directory
                .release_reference(&self.holder_key, &key)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botmesh_registry::{LivenessConfig, Registry};
    use botmesh_types::ComponentIdentity;
    use botmesh_dispatch::Catalog;
    use std::time::Duration;

    use crate::local::LocalMesh;

    fn identity(t: &str, n: &str) -> ComponentIdentity {
        ComponentIdentity::new(t, n).unwrap()
    }

    fn broker_for(mesh: &Arc<LocalMesh>, holder: &str) -> ReferenceBroker {
        ReferenceBroker::new(
            holder,
            Arc::clone(mesh) as Arc<dyn Directory>,
            Arc::clone(mesh) as Arc<dyn Invoker>,
            Duration::from_millis(10),
        )
    }

    fn register_plain(mesh: &LocalMesh, t: &str, n: &str) {
        mesh.host(
            identity(t, n),
            botmesh_dispatch::Dispatcher::new(t, Catalog::new()),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn blocking_acquisition_succeeds_when_target_is_up() {
        let registry = Registry::new(LivenessConfig::for_testing());
        let mesh = Arc::new(LocalMesh::new(registry));
        register_plain(&mesh, "Velocity", "v1");
        register_plain(&mesh, "Planner", "p1");

        let broker = broker_for(&mesh, "Planner$p1");
        let reference = broker
            .get_reference("Velocity", None, true, 1000)
            .await
            .unwrap();
        assert_eq!(reference.last_resolved_key().as_deref(), Some("Velocity$v1"));
    }

    #[tokio::test]
    async fn blocking_acquisition_times_out_when_nothing_appears() {
        let registry = Registry::new(LivenessConfig::for_testing());
        let mesh = Arc::new(LocalMesh::new(registry));
        register_plain(&mesh, "Planner", "p1");

        let broker = broker_for(&mesh, "Planner$p1");
        let started = Instant::now();
        let result = broker.get_reference("Velocity", None, true, 100).await;
        assert!(matches!(result, Err(MeshError::ReferenceTimeout { .. })));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn blocking_acquisition_picks_up_a_late_arrival() {
        let registry = Registry::new(LivenessConfig::for_testing());
        let mesh = Arc::new(LocalMesh::new(registry));
        register_plain(&mesh, "Planner", "p1");

        let broker = broker_for(&mesh, "Planner$p1");
        let mesh_late = Arc::clone(&mesh);
        let register_later = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            register_plain(&mesh_late, "Velocity", "v1");
        });

        let reference = broker
            .get_reference("Velocity", None, true, 2000)
            .await
            .unwrap();
        assert_eq!(reference.last_resolved_key().as_deref(), Some("Velocity$v1"));
        register_later.await.unwrap();
    }

    #[tokio::test]
    async fn non_blocking_acquisition_returns_an_unresolved_handle() {
        let registry = Registry::new(LivenessConfig::for_testing());
        let mesh = Arc::new(LocalMesh::new(registry));
        register_plain(&mesh, "Planner", "p1");

        let broker = broker_for(&mesh, "Planner$p1");
        let reference = broker
            .get_reference("Velocity", None, false, 0)
            .await
            .unwrap();
        assert!(reference.last_resolved_key().is_none());
    }

    #[tokio::test]
    async fn blocking_forever_can_be_cancelled_by_the_caller() {
        let registry = Registry::new(LivenessConfig::for_testing());
        let mesh = Arc::new(LocalMesh::new(registry));
        register_plain(&mesh, "Planner", "p1");

        let broker = broker_for(&mesh, "Planner$p1");
        // Caller-side cancellation is just racing the future.
        let result = tokio::time::timeout(
            Duration::from_millis(80),
            broker.get_reference("Velocity", None, true, 0),
        )
        .await;
        assert!(result.is_err(), "the acquisition itself must still be pending");
    }

    #[tokio::test]
    async fn named_acquisition_ignores_other_instances() {
        let registry = Registry::new(LivenessConfig::for_testing());
        let mesh = Arc::new(LocalMesh::new(registry));
        register_plain(&mesh, "Velocity", "v1");
        register_plain(&mesh, "Planner", "p1");

        let broker = broker_for(&mesh, "Planner$p1");
        let result = broker
            .get_reference("Velocity", Some("v2"), true, 100)
            .await;
        assert!(matches!(result, Err(MeshError::ReferenceTimeout { .. })));
    }

    #[tokio::test]
    async fn release_disarms_the_cascade() {
        let registry = Registry::new(LivenessConfig::for_testing());
        let mesh = Arc::new(LocalMesh::new(Arc::clone(&registry)));
        register_plain(&mesh, "Velocity", "v1");
        register_plain(&mesh, "Planner", "p1");

        let broker = broker_for(&mesh, "Planner$p1");
        let reference = broker
            .get_reference("Velocity", None, true, 1000)
            .await
            .unwrap();
        broker.release(&reference).await.unwrap();

        let mut rx = registry.subscribe();
        // Simulate the monitor declaring the dependency down.
        mesh.force_down("Velocity$v1");
        let mut saw_dependency_down = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, botmesh_registry::RegistryEvent::DependencyDown { .. }) {
                saw_dependency_down = true;
            }
        }
        assert!(!saw_dependency_down, "released holder must not be notified");
    }
}

//! [`Registry`] – the facade servers and in-process harnesses construct.
//!
//! Ties the [`RegistrationTable`] and [`HeartbeatMonitor`] together so a
//! registration is always watched and a deregistration always unwatched.

use std::sync::Arc;

use tokio::sync::broadcast;

use botmesh_dispatch::Catalog;
use botmesh_types::{ComponentIdentity, ComponentInfo, MeshError};

use crate::config::LivenessConfig;
use crate::events::RegistryEvent;
use crate::monitor::{HeartbeatAnswer, HeartbeatMonitor};
use crate::table::{RegistrationOutcome, RegistrationTable};

/// The central directory process's core: record store plus liveness
/// probing, behind one handle.
pub struct Registry {
    table: Arc<RegistrationTable>,
    monitor: HeartbeatMonitor,
}

impl Registry {
    /// Build a registry. Must be called from within a tokio runtime, since
    /// registrations spawn probe tasks.
    pub fn new(config: LivenessConfig) -> Arc<Self> {
        let table = Arc::new(RegistrationTable::new(config.clone()));
        let monitor = HeartbeatMonitor::new(Arc::clone(&table), config);
        Arc::new(Self { table, monitor })
    }

    /// Register a component and start probing it.
    pub fn register(
        &self,
        identity: ComponentIdentity,
        catalog: Catalog,
        host: impl Into<String>,
        port: u16,
    ) -> Result<RegistrationOutcome, MeshError> {
        let key = identity.key();
        let outcome = self.table.register(identity, catalog, host, port)?;
        self.monitor.watch(&key);
        Ok(outcome)
    }

    pub fn heartbeat(&self, key: &str) -> HeartbeatAnswer {
        self.monitor.record_heartbeat(key)
    }

    /// Graceful shutdown: stop probing, drop the record, notify holders.
    pub fn deregister(&self, key: &str) -> bool {
        self.monitor.unwatch(key);
        self.table.deregister(key)
    }

    pub fn lookup(&self, component_type: &str, name: Option<&str>) -> Option<ComponentInfo> {
        self.table.lookup(component_type, name)
    }

    pub fn catalog(&self, key: &str) -> Option<Arc<Catalog>> {
        self.table.catalog(key)
    }

    pub fn touch_activity(&self, key: &str) {
        self.table.touch_activity(key)
    }

    pub fn track_reference(&self, holder_key: &str, dependency_key: &str) -> Result<(), MeshError> {
        self.table.track_reference(holder_key, dependency_key)
    }

    pub fn release_reference(&self, holder_key: &str, dependency_key: &str) {
        self.table.release_reference(holder_key, dependency_key)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.table.events().subscribe()
    }

    pub fn config(&self) -> &LivenessConfig {
        self.table.config()
    }

    /// The underlying table. Transition hooks on it belong to the monitor;
    /// going around it is for supervisors and test harnesses.
    pub fn table(&self) -> &Arc<RegistrationTable> {
        &self.table
    }

    pub fn component_count(&self) -> usize {
        self.table.len()
    }

    /// Abort all probe tasks. The table stays readable.
    pub fn shutdown(&self) {
        self.monitor.shutdown();
    }
}

//! [`RegistrationTable`] – the authoritative component record store.
//!
//! The map itself is guarded by a read/write lock; each record carries its
//! own mutex so one record can be mutated without blocking unrelated
//! lookups. Lock order is always map-then-record, and no record lock is
//! ever held while waiting for another structure.
//!
//! State transitions go through [`RegistrationTable::mark_alive`],
//! [`RegistrationTable::mark_down`], and the registration/deregistration
//! paths; every transition publishes a [`RegistryEvent`] — none is silent.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use botmesh_dispatch::Catalog;
use botmesh_types::{ComponentIdentity, ComponentInfo, Constraint, LivenessState, MeshError};

use crate::config::LivenessConfig;
use crate::events::{RegistryEvent, RegistryEventBus};
use crate::monitor::HeartbeatAnswer;

/// How a successful registration was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// A brand-new record was inserted in `Connecting`.
    Fresh,
    /// A `Down` record completed the re-registration handshake and is `Up`
    /// again. Existing pseudo-references to it resume working as-is.
    Recovered,
}

/// Monotonic probe-relevant view of one record, taken under its lock.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProbeSnapshot {
    pub state: LivenessState,
    /// Time since the last heartbeat *or* served invocation, whichever is
    /// more recent — an actively used connection is never spuriously down.
    pub silent_for: Duration,
    pub down_for: Option<Duration>,
}

struct ComponentRecord {
    info: ComponentInfo,
    catalog: Arc<Catalog>,
    /// Registration sequence number; nameless lookups prefer the highest.
    seq: u64,
    last_heartbeat: Instant,
    last_activity: Instant,
    down_since: Option<Instant>,
    /// Keys of components this record currently holds references to.
    references: HashSet<String>,
    /// Dependencies whose down transition has already been notified to
    /// this record; cleared when the dependency recovers or the reference
    /// is released.
    notified_down: HashSet<String>,
}

/// The registry's record store. Shared via `Arc`; all methods take `&self`.
pub struct RegistrationTable {
    records: RwLock<HashMap<String, Arc<Mutex<ComponentRecord>>>>,
    events: RegistryEventBus,
    config: LivenessConfig,
    seq: AtomicU64,
}

impl RegistrationTable {
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            events: RegistryEventBus::default(),
            config,
            seq: AtomicU64::new(0),
        }
    }

    pub fn events(&self) -> &RegistryEventBus {
        &self.events
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Register a component instance.
    ///
    /// A live duplicate fails with [`MeshError::DuplicateIdentity`]; the
    /// registry never silently overwrites a live record. A `Down` record
    /// with the same identity is recovered in place: it moves back to `Up`,
    /// holders that were told it went down are told it is back, and
    /// existing pseudo-references resume working without reissue.
    pub fn register(
        &self,
        identity: ComponentIdentity,
        catalog: Catalog,
        host: impl Into<String>,
        port: u16,
    ) -> Result<RegistrationOutcome, MeshError> {
        let key = identity.key();
        let now = Instant::now();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let host = host.into();

        let mut map = self.records.write().expect("registry map lock poisoned");

        if let Some(existing) = map.get(&key) {
            let mut rec = existing.lock().expect("registry record lock poisoned");
            if rec.info.state.is_live() {
                warn!(component = %key, "rejected duplicate registration");
                return Err(MeshError::DuplicateIdentity(key));
            }
            // Down → Up recovery handshake.
            rec.info.state = LivenessState::Up;
            rec.info.host = host;
            rec.info.port = port;
            rec.info.registered_at = Utc::now();
            rec.catalog = Arc::new(catalog);
            rec.seq = seq;
            rec.last_heartbeat = now;
            rec.last_activity = now;
            rec.down_since = None;
            let info = rec.info.clone();
            drop(rec);

            let constraints = vec![Constraint::server(identity.component_type())];
            let holders = collect_and_clear_notified(&map, &key);
            info!(component = %key, holders = holders.len(), "component recovered");
            self.events.publish(RegistryEvent::ComponentUp { key: key.clone() });
            for holder in holders {
                self.events.publish(RegistryEvent::DependencyUp {
                    holder,
                    dependency: info.clone(),
                    constraints: constraints.clone(),
                });
            }
            return Ok(RegistrationOutcome::Recovered);
        }

        let record = ComponentRecord {
            info: ComponentInfo {
                identity: identity.clone(),
                interfaces: vec![identity.component_type().to_string()],
                host,
                port,
                state: LivenessState::Connecting,
                registered_at: Utc::now(),
            },
            catalog: Arc::new(catalog),
            seq,
            last_heartbeat: now,
            last_activity: now,
            down_since: None,
            references: HashSet::new(),
            notified_down: HashSet::new(),
        };
        let info = record.info.clone();
        map.insert(key.clone(), Arc::new(Mutex::new(record)));
        drop(map);

        info!(component = %key, "component registered");
        self.events.publish(RegistryEvent::Registered { info });
        Ok(RegistrationOutcome::Fresh)
    }

    /// Record a heartbeat. Monitor-only transition hook.
    ///
    /// Repeated heartbeats on an `Up` record refresh its timestamp and
    /// nothing else. A `Down` or unknown identity answers
    /// [`HeartbeatAnswer::Unknown`], telling the component to re-run the
    /// registration handshake.
    pub fn mark_alive(&self, key: &str) -> HeartbeatAnswer {
        let map = self.records.read().expect("registry map lock poisoned");
        let Some(record) = map.get(key) else {
            return HeartbeatAnswer::Unknown;
        };
        let mut rec = record.lock().expect("registry record lock poisoned");
        match rec.info.state {
            LivenessState::Up => {
                rec.last_heartbeat = Instant::now();
                HeartbeatAnswer::Alive
            }
            LivenessState::Connecting => {
                rec.info.state = LivenessState::Up;
                rec.last_heartbeat = Instant::now();
                drop(rec);
                drop(map);
                debug!(component = %key, "first heartbeat, component up");
                self.events.publish(RegistryEvent::ComponentUp {
                    key: key.to_string(),
                });
                HeartbeatAnswer::Alive
            }
            _ => HeartbeatAnswer::Unknown,
        }
    }

    /// Transition a record to `Down` after missed probes. Monitor-only.
    ///
    /// Cascades exactly one `DependencyDown` to every holder whose
    /// reference-set contains `key` and that has not already been notified
    /// for this outage.
    pub fn mark_down(&self, key: &str) -> bool {
        let map = self.records.read().expect("registry map lock poisoned");
        let Some(record) = map.get(key) else {
            return false;
        };
        let component_type;
        {
            let mut rec = record.lock().expect("registry record lock poisoned");
            if !rec.info.state.may_transition_to(LivenessState::Down) {
                return false;
            }
            rec.info.state = LivenessState::Down;
            rec.down_since = Some(Instant::now());
            component_type = rec.info.identity.component_type().to_string();
        }

        let constraints = vec![Constraint::server(&component_type)];
        let holders = collect_and_mark_notified(&map, key);
        drop(map);

        warn!(component = %key, holders = holders.len(), "component down");
        self.events.publish(RegistryEvent::ComponentDown {
            key: key.to_string(),
        });
        for holder in holders {
            self.events.publish(RegistryEvent::DependencyDown {
                holder,
                dependency_key: key.to_string(),
                constraints: constraints.clone(),
            });
        }
        true
    }

    /// Remove a record immediately regardless of state (graceful
    /// shutdown). Holders with live references receive a final
    /// `DependencyDown` so they can degrade.
    pub fn deregister(&self, key: &str) -> bool {
        let mut map = self.records.write().expect("registry map lock poisoned");
        let Some(record) = map.remove(key) else {
            return false;
        };
        let (was_live, component_type) = {
            let rec = record.lock().expect("registry record lock poisoned");
            (
                rec.info.state.is_live(),
                rec.info.identity.component_type().to_string(),
            )
        };
        let holders = if was_live {
            collect_and_mark_notified(&map, key)
        } else {
            Vec::new()
        };
        drop(map);

        info!(component = %key, "component deregistered");
        self.events.publish(RegistryEvent::Deregistered {
            key: key.to_string(),
        });
        let constraints = vec![Constraint::server(&component_type)];
        for holder in holders {
            self.events.publish(RegistryEvent::DependencyDown {
                holder,
                dependency_key: key.to_string(),
                constraints: constraints.clone(),
            });
        }
        true
    }

    /// Remove a record that has sat in `Down` past the grace period.
    /// Monitor-only. Returns whether the record was removed.
    pub fn remove_if_expired(&self, key: &str) -> bool {
        let mut map = self.records.write().expect("registry map lock poisoned");
        let Some(record) = map.get(key) else {
            return false;
        };
        {
            let rec = record.lock().expect("registry record lock poisoned");
            let expired = rec.info.state == LivenessState::Down
                && rec
                    .down_since
                    .map(|t| t.elapsed() >= self.config.down_grace())
                    .unwrap_or(false);
            if !expired {
                return false;
            }
        }
        map.remove(key);
        drop(map);

        info!(component = %key, "down grace period elapsed, record removed");
        self.events.publish(RegistryEvent::ComponentRemoved {
            key: key.to_string(),
        });
        true
    }

    /// Find a record by type, and name when given.
    ///
    /// A named lookup returns the record in any state short of removal, so
    /// a caller can distinguish "down" from "gone". A nameless lookup
    /// returns an arbitrary *live* record of the type, preferring the most
    /// recently registered.
    pub fn lookup(&self, component_type: &str, name: Option<&str>) -> Option<ComponentInfo> {
        let map = self.records.read().expect("registry map lock poisoned");
        if let Some(name) = name {
            let key = format!(
                "{component_type}{}{name}",
                botmesh_types::KEY_SEPARATOR
            );
            let record = map.get(&key)?;
            let rec = record.lock().expect("registry record lock poisoned");
            return Some(rec.info.clone());
        }

        let mut best: Option<(u64, ComponentInfo)> = None;
        for record in map.values() {
            let rec = record.lock().expect("registry record lock poisoned");
            if !rec.info.state.is_live() {
                continue;
            }
            let matches = rec.info.identity.component_type() == component_type
                || rec.info.interfaces.iter().any(|i| i == component_type);
            if !matches {
                continue;
            }
            if best.as_ref().map(|(seq, _)| rec.seq > *seq).unwrap_or(true) {
                best = Some((rec.seq, rec.info.clone()));
            }
        }
        best.map(|(_, info)| info)
    }

    /// The catalog a component published at registration.
    pub fn catalog(&self, key: &str) -> Option<Arc<Catalog>> {
        let map = self.records.read().expect("registry map lock poisoned");
        let record = map.get(key)?;
        let rec = record.lock().expect("registry record lock poisoned");
        Some(Arc::clone(&rec.catalog))
    }

    /// Refresh a record's activity timestamp after a served invocation, so
    /// an actively used connection is never spuriously marked down.
    pub fn touch_activity(&self, key: &str) {
        let map = self.records.read().expect("registry map lock poisoned");
        if let Some(record) = map.get(key) {
            let mut rec = record.lock().expect("registry record lock poisoned");
            rec.last_activity = Instant::now();
        }
    }

    /// Record that `holder_key` now holds a reference to `dependency_key`,
    /// arming the down-cascade toward the holder.
    pub fn track_reference(
        &self,
        holder_key: &str,
        dependency_key: &str,
    ) -> Result<(), MeshError> {
        let map = self.records.read().expect("registry map lock poisoned");
        let record = map
            .get(holder_key)
            .ok_or_else(|| MeshError::UnknownComponent(holder_key.to_string()))?;
        {
            let mut rec = record.lock().expect("registry record lock poisoned");
            if !rec.references.insert(dependency_key.to_string()) {
                // Already tracked; attaching again is idempotent.
                return Ok(());
            }
        }
        drop(map);
        self.events.publish(RegistryEvent::ClientAttached {
            server_key: dependency_key.to_string(),
            client_key: holder_key.to_string(),
        });
        Ok(())
    }

    /// Drop `holder_key`'s reference to `dependency_key`; future down
    /// cascades for the dependency no longer notify this holder.
    pub fn release_reference(&self, holder_key: &str, dependency_key: &str) {
        let map = self.records.read().expect("registry map lock poisoned");
        let Some(record) = map.get(holder_key) else {
            return;
        };
        let released = {
            let mut rec = record.lock().expect("registry record lock poisoned");
            rec.notified_down.remove(dependency_key);
            rec.references.remove(dependency_key)
        };
        drop(map);
        if released {
            self.events.publish(RegistryEvent::ClientDetached {
                server_key: dependency_key.to_string(),
                client_key: holder_key.to_string(),
            });
        }
    }

    /// Probe view for the heartbeat monitor.
    pub(crate) fn probe_snapshot(&self, key: &str) -> Option<ProbeSnapshot> {
        let map = self.records.read().expect("registry map lock poisoned");
        let record = map.get(key)?;
        let rec = record.lock().expect("registry record lock poisoned");
        let freshest = rec.last_heartbeat.max(rec.last_activity);
        Some(ProbeSnapshot {
            state: rec.info.state,
            silent_for: freshest.elapsed(),
            down_for: rec.down_since.map(|t| t.elapsed()),
        })
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("registry map lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Under the map lock: find every record holding a reference to
/// `dependency_key` that has not yet been told it is down; set its
/// notified flag and return the holder keys.
fn collect_and_mark_notified(
    map: &HashMap<String, Arc<Mutex<ComponentRecord>>>,
    dependency_key: &str,
) -> Vec<String> {
    let mut holders = Vec::new();
    for (holder_key, record) in map {
        if holder_key == dependency_key {
            continue;
        }
        let mut rec = record.lock().expect("registry record lock poisoned");
        if rec.references.contains(dependency_key)
            && rec.notified_down.insert(dependency_key.to_string())
        {
            holders.push(holder_key.clone());
        }
    }
    holders
}

/// Under the map lock: clear the notified flag on every holder of
/// `dependency_key`, returning the holders that were flagged (they get a
/// `DependencyUp`).
fn collect_and_clear_notified(
    map: &HashMap<String, Arc<Mutex<ComponentRecord>>>,
    dependency_key: &str,
) -> Vec<String> {
    let mut holders = Vec::new();
    for (holder_key, record) in map {
        if holder_key == dependency_key {
            continue;
        }
        let mut rec = record.lock().expect("registry record lock poisoned");
        if rec.notified_down.remove(dependency_key) {
            holders.push(holder_key.clone());
        }
    }
    holders
}

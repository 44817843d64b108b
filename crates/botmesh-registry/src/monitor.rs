//! [`HeartbeatMonitor`] – per-connection liveness probing.
//!
//! Every watched identity gets its own probe task on a timer, so one slow
//! or dead peer never delays probing of the others. A record fails only
//! after the configured number of consecutive missed probes; a single miss
//! is jitter, not an outage. All transitions for one identity come from its
//! probe task (plus the registration recovery path), so they are totally
//! ordered; no ordering holds across identities.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::config::LivenessConfig;
use crate::table::RegistrationTable;

/// Registry answer to a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAnswer {
    /// The record is live; its deadline was reset.
    Alive,
    /// The registry does not consider this identity alive; the component
    /// must re-run the registration handshake.
    Unknown,
}

/// Spawns and owns one probe task per watched identity.
pub struct HeartbeatMonitor {
    table: Arc<RegistrationTable>,
    config: LivenessConfig,
    probes: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new(table: Arc<RegistrationTable>, config: LivenessConfig) -> Self {
        Self {
            table,
            config,
            probes: Mutex::new(HashMap::new()),
        }
    }

    /// Start probing `key`. Must be called from within a tokio runtime.
    ///
    /// Re-watching an identity (re-registration) replaces its probe task.
    pub fn watch(&self, key: &str) {
        let table = Arc::clone(&self.table);
        let config = self.config.clone();
        let handle = tokio::spawn(probe_loop(table, config, key.to_string()));
        let mut probes = self.probes.lock().expect("monitor lock poisoned");
        if let Some(old) = probes.insert(key.to_string(), handle) {
            old.abort();
        }
    }

    /// Stop probing `key` (graceful deregistration).
    pub fn unwatch(&self, key: &str) {
        let mut probes = self.probes.lock().expect("monitor lock poisoned");
        if let Some(handle) = probes.remove(key) {
            handle.abort();
        }
    }

    /// Forward a heartbeat to the table. The transition (if any) happens
    /// under the record lock; the probe task only ever observes it.
    pub fn record_heartbeat(&self, key: &str) -> HeartbeatAnswer {
        self.table.mark_alive(key)
    }

    /// Abort every probe task.
    pub fn shutdown(&self) {
        let mut probes = self.probes.lock().expect("monitor lock poisoned");
        for (_, handle) in probes.drain() {
            handle.abort();
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One identity's probe loop: tick, look, decide.
///
/// Exits when the record disappears (deregistration or grace-period
/// removal).
async fn probe_loop(table: Arc<RegistrationTable>, config: LivenessConfig, key: String) {
    let mut ticker = tokio::time::interval(config.heartbeat_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(snapshot) = table.probe_snapshot(&key) else {
            debug!(component = %key, "record gone, probe task exiting");
            return;
        };
        use botmesh_types::LivenessState::*;
        match snapshot.state {
            Connecting | Up => {
                if snapshot.silent_for > config.probe_deadline() {
                    table.mark_down(&key);
                }
            }
            Down => {
                if snapshot
                    .down_for
                    .map(|d| d >= config.down_grace())
                    .unwrap_or(false)
                {
                    table.remove_if_expired(&key);
                    return;
                }
            }
            Unknown | Removed => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RegistryEvent;
    use botmesh_dispatch::Catalog;
    use botmesh_types::{ComponentIdentity, LivenessState};
    use std::time::Duration;

    fn setup(config: LivenessConfig) -> (Arc<RegistrationTable>, HeartbeatMonitor) {
        let table = Arc::new(RegistrationTable::new(config.clone()));
        let monitor = HeartbeatMonitor::new(Arc::clone(&table), config);
        (table, monitor)
    }

    fn register(table: &RegistrationTable, t: &str, n: &str) {
        table
            .register(
                ComponentIdentity::new(t, n).unwrap(),
                Catalog::new(),
                "127.0.0.1",
                9400,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn silent_component_goes_down_after_missed_probes() {
        let (table, monitor) = setup(LivenessConfig::for_testing());
        register(&table, "Velocity", "v1");
        monitor.watch("Velocity$v1");
        monitor.record_heartbeat("Velocity$v1");

        let deadline = table.config().probe_deadline();
        tokio::time::sleep(deadline + Duration::from_millis(60)).await;

        let info = table.lookup("Velocity", Some("v1")).unwrap();
        assert_eq!(info.state, LivenessState::Down);
    }

    #[tokio::test]
    async fn heartbeating_component_stays_up() {
        let (table, monitor) = setup(LivenessConfig::for_testing());
        register(&table, "Velocity", "v1");
        monitor.watch("Velocity$v1");

        let interval = table.config().heartbeat_interval();
        for _ in 0..10 {
            assert_eq!(
                monitor.record_heartbeat("Velocity$v1"),
                HeartbeatAnswer::Alive
            );
            tokio::time::sleep(interval).await;
        }
        let info = table.lookup("Velocity", Some("v1")).unwrap();
        assert_eq!(info.state, LivenessState::Up);
    }

    #[tokio::test]
    async fn one_slow_peer_does_not_block_probing_of_others() {
        let (table, monitor) = setup(LivenessConfig::for_testing());
        register(&table, "Velocity", "v1");
        register(&table, "Laser", "l1");
        monitor.watch("Velocity$v1");
        monitor.watch("Laser$l1");

        // v1 heartbeats, l1 stays silent.
        let deadline = table.config().probe_deadline();
        let interval = table.config().heartbeat_interval();
        let ticks = (deadline.as_millis() / interval.as_millis()) as u32 + 4;
        for _ in 0..ticks {
            monitor.record_heartbeat("Velocity$v1");
            tokio::time::sleep(interval).await;
        }

        assert_eq!(
            table.lookup("Velocity", Some("v1")).unwrap().state,
            LivenessState::Up
        );
        assert_eq!(
            table.lookup("Laser", Some("l1")).unwrap().state,
            LivenessState::Down
        );
    }

    #[tokio::test]
    async fn down_record_is_removed_after_grace() {
        let config = LivenessConfig {
            down_grace_ms: 60,
            ..LivenessConfig::for_testing()
        };
        let (table, monitor) = setup(config);
        register(&table, "Velocity", "v1");
        monitor.watch("Velocity$v1");

        let mut rx = table.events().subscribe();
        let deadline = table.config().probe_deadline();
        tokio::time::sleep(deadline + Duration::from_millis(200)).await;

        assert!(table.lookup("Velocity", Some("v1")).is_none());
        let mut saw_down = false;
        let mut saw_removed = false;
        while let Ok(e) = rx.try_recv() {
            match e {
                RegistryEvent::ComponentDown { .. } => saw_down = true,
                RegistryEvent::ComponentRemoved { .. } => saw_removed = true,
                _ => {}
            }
        }
        assert!(saw_down, "expected a ComponentDown event");
        assert!(saw_removed, "expected a ComponentRemoved event");
    }

    #[tokio::test]
    async fn recovery_handshake_brings_record_back_up() {
        let (table, monitor) = setup(LivenessConfig::for_testing());
        register(&table, "Velocity", "v1");
        monitor.watch("Velocity$v1");

        let deadline = table.config().probe_deadline();
        tokio::time::sleep(deadline + Duration::from_millis(60)).await;
        assert_eq!(
            table.lookup("Velocity", Some("v1")).unwrap().state,
            LivenessState::Down
        );

        // Fresh handshake: the same identity re-registers.
        register(&table, "Velocity", "v1");
        monitor.watch("Velocity$v1");
        assert_eq!(
            table.lookup("Velocity", Some("v1")).unwrap().state,
            LivenessState::Up
        );
    }

    #[tokio::test]
    async fn unwatch_stops_the_probe_task() {
        let (table, monitor) = setup(LivenessConfig::for_testing());
        register(&table, "Velocity", "v1");
        monitor.watch("Velocity$v1");
        monitor.unwatch("Velocity$v1");

        let deadline = table.config().probe_deadline();
        tokio::time::sleep(deadline + Duration::from_millis(60)).await;
        // Nobody probed it, so it never transitioned.
        let state = table.lookup("Velocity", Some("v1")).unwrap().state;
        assert_eq!(state, LivenessState::Connecting);
    }

    #[tokio::test]
    async fn served_invocations_count_as_liveness() {
        let (table, monitor) = setup(LivenessConfig::for_testing());
        register(&table, "Velocity", "v1");
        monitor.watch("Velocity$v1");
        monitor.record_heartbeat("Velocity$v1");

        // No further heartbeats, but steady invocation activity.
        let interval = table.config().heartbeat_interval();
        for _ in 0..8 {
            table.touch_activity("Velocity$v1");
            tokio::time::sleep(interval).await;
        }
        assert_eq!(
            table.lookup("Velocity", Some("v1")).unwrap().state,
            LivenessState::Up
        );
    }
}

//! Component identity and liveness.
//!
//! Every component instance is keyed by a [`ComponentIdentity`]: a declared
//! component type (the interface family it implements, e.g. `"Velocity"`)
//! plus an instance name (e.g. `"v1"`). The canonical string key joins the
//! two with [`KEY_SEPARATOR`], so neither half may contain that character.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MeshError;

/// Separator between the type and name halves of a canonical key.
///
/// `"Velocity$v1"` parses back into type `"Velocity"`, name `"v1"`.
pub const KEY_SEPARATOR: char = '$';

/// Immutable identity of one component instance.
///
/// Unique within the registry at any instant; the same identity may be
/// reused after a clean shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentIdentity {
    component_type: String,
    name: String,
}

impl ComponentIdentity {
    /// Build an identity, validating both halves.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidIdentity`] when either half is empty or
    /// contains [`KEY_SEPARATOR`].
    pub fn new(
        component_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, MeshError> {
        let component_type = component_type.into();
        let name = name.into();
        for (label, half) in [("type", &component_type), ("name", &name)] {
            if half.is_empty() {
                return Err(MeshError::InvalidIdentity(format!(
                    "component {label} must not be empty"
                )));
            }
            if half.contains(KEY_SEPARATOR) {
                return Err(MeshError::InvalidIdentity(format!(
                    "component {label} '{half}' must not contain '{KEY_SEPARATOR}'"
                )));
            }
        }
        Ok(Self {
            component_type,
            name,
        })
    }

    /// Parse a canonical `type$name` key back into an identity.
    pub fn parse_key(key: &str) -> Result<Self, MeshError> {
        match key.split_once(KEY_SEPARATOR) {
            Some((t, n)) => Self::new(t, n),
            None => Err(MeshError::InvalidIdentity(format!(
                "key '{key}' has no '{KEY_SEPARATOR}' separator"
            ))),
        }
    }

    /// The declared component type (interface family).
    pub fn component_type(&self) -> &str {
        &self.component_type
    }

    /// The instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical registry key, `type$name`.
    pub fn key(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.component_type, self.name)
    }
}

impl std::fmt::Display for ComponentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.component_type, self.name)
    }
}

/// Liveness state of a registered component.
///
/// The registry drives every record through
/// `Unknown → Connecting → Up → Down → Removed`; a `Down` record returns to
/// `Up` only through a fresh registration handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LivenessState {
    /// Never seen, or state not yet determined.
    Unknown,
    /// Registration accepted, first heartbeat not yet observed.
    Connecting,
    /// Heartbeating within its deadline.
    Up,
    /// Missed the configured number of consecutive probes.
    Down,
    /// Removed from the registry; the key is free for reuse.
    Removed,
}

impl LivenessState {
    /// Whether a record in this state serves lookups and invocations.
    pub fn is_live(self) -> bool {
        matches!(self, LivenessState::Up | LivenessState::Connecting)
    }

    /// Whether `next` is a legal successor state.
    ///
    /// `Down → Up` is legal (fresh registration handshake); everything else
    /// follows the forward chain. `Removed` is terminal.
    pub fn may_transition_to(self, next: LivenessState) -> bool {
        use LivenessState::*;
        matches!(
            (self, next),
            (Unknown, Connecting)
                | (Connecting, Up)
                | (Connecting, Down)
                | (Up, Down)
                | (Down, Up)
                | (Down, Removed)
                | (Connecting, Removed)
                | (Up, Removed)
        )
    }
}

impl std::fmt::Display for LivenessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LivenessState::Unknown => "unknown",
            LivenessState::Connecting => "connecting",
            LivenessState::Up => "up",
            LivenessState::Down => "down",
            LivenessState::Removed => "removed",
        };
        write!(f, "{s}")
    }
}

/// Wire-safe snapshot of a registry record, returned by lookups.
///
/// The registry's internal record also carries monotonic timestamps and the
/// holder reference-set; this view exposes only what a caller needs to reach
/// the component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub identity: ComponentIdentity,
    /// Interface types the component declared at registration.
    pub interfaces: Vec<String>,
    pub host: String,
    pub port: u16,
    pub state: LivenessState,
    pub registered_at: DateTime<Utc>,
}

impl ComponentInfo {
    /// Endpoint address in `host:port` form.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_roundtrip() {
        let id = ComponentIdentity::new("Velocity", "v1").unwrap();
        assert_eq!(id.key(), "Velocity$v1");
        let back = ComponentIdentity::parse_key("Velocity$v1").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn separator_in_type_is_rejected() {
        let result = ComponentIdentity::new("Velo$city", "v1");
        assert!(matches!(result, Err(MeshError::InvalidIdentity(_))));
    }

    #[test]
    fn separator_in_name_is_rejected() {
        let result = ComponentIdentity::new("Velocity", "v$1");
        assert!(matches!(result, Err(MeshError::InvalidIdentity(_))));
    }

    #[test]
    fn empty_halves_are_rejected() {
        assert!(ComponentIdentity::new("", "v1").is_err());
        assert!(ComponentIdentity::new("Velocity", "").is_err());
    }

    #[test]
    fn parse_key_without_separator_fails() {
        assert!(ComponentIdentity::parse_key("Velocity").is_err());
    }

    #[test]
    fn name_may_contain_further_separators_after_the_first() {
        // split_once: everything after the first '$' is the name, which then
        // fails validation if it still contains one.
        assert!(ComponentIdentity::parse_key("Velocity$v$1").is_err());
    }

    #[test]
    fn liveness_forward_chain() {
        use LivenessState::*;
        assert!(Unknown.may_transition_to(Connecting));
        assert!(Connecting.may_transition_to(Up));
        assert!(Up.may_transition_to(Down));
        assert!(Down.may_transition_to(Up));
        assert!(Down.may_transition_to(Removed));
    }

    #[test]
    fn removed_is_terminal() {
        use LivenessState::*;
        for next in [Unknown, Connecting, Up, Down, Removed] {
            assert!(!Removed.may_transition_to(next));
        }
    }

    #[test]
    fn down_is_not_live() {
        assert!(LivenessState::Up.is_live());
        assert!(LivenessState::Connecting.is_live());
        assert!(!LivenessState::Down.is_live());
        assert!(!LivenessState::Removed.is_live());
    }

    #[test]
    fn component_info_roundtrip() {
        let info = ComponentInfo {
            identity: ComponentIdentity::new("Velocity", "v1").unwrap(),
            interfaces: vec!["Velocity".to_string()],
            host: "127.0.0.1".to_string(),
            port: 9400,
            state: LivenessState::Up,
            registered_at: Utc::now(),
        };
        let json = serde_json::to_string(&info).unwrap();
        let back: ComponentInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.identity, info.identity);
        assert_eq!(back.endpoint(), "127.0.0.1:9400");
    }
}

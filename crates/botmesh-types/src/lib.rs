//! `botmesh-types` – The Shared Vocabulary
//!
//! Data model and error taxonomy shared by every BotMesh crate: component
//! identities, liveness states, the language-neutral type tags and values
//! used for dynamic dispatch, and the [`MeshError`] enum that all fallible
//! operations return.
//!
//! # Modules
//!
//! - [`identity`] – [`ComponentIdentity`], [`LivenessState`], and
//!   [`ComponentInfo`], the wire-safe view of a registry record.
//! - [`value`] – [`TypeTag`], [`Value`], [`MethodSignature`], and
//!   [`Constraint`]: everything the widening matcher operates on.
//! - [`credentials`] – the opaque shutdown-authorization blob.

pub mod credentials;
pub mod identity;
pub mod value;

pub use credentials::Credentials;
pub use identity::{ComponentIdentity, ComponentInfo, LivenessState, KEY_SEPARATOR};
pub use value::{Constraint, MethodSignature, TypeTag, Value};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Global error type spanning registration conflicts, discovery timeouts,
/// dispatch failures, and transport faults.
///
/// The variants mirror the caller-facing taxonomy: [`MeshError::NoSuchMethod`]
/// means "you asked for the wrong thing" and is never retryable, while
/// [`MeshError::RemoteInvocationFailed`] means "the right thing failed while
/// running" and may be retried at the caller's discretion.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum MeshError {
    /// A component with the same `{type, name}` is already registered and
    /// alive. The caller must pick a new name; the registry never silently
    /// overwrites a live record.
    #[error("duplicate component identity: {0}")]
    DuplicateIdentity(String),

    /// Blocking discovery gave up before a live match appeared.
    #[error("no live '{component_type}' component appeared within {waited_ms} ms")]
    ReferenceTimeout {
        component_type: String,
        waited_ms: u64,
    },

    /// No cataloged signature matched the method name and argument list.
    #[error("no method '{method}' on '{component_type}' accepts the given {arity} argument(s)")]
    NoSuchMethod {
        component_type: String,
        method: String,
        arity: usize,
    },

    /// The callee's method body failed, or the connection dropped while a
    /// call was in flight (`connection_lost` distinguishes the two).
    #[error("remote invocation of '{method}' failed: {detail}")]
    RemoteInvocationFailed {
        method: String,
        detail: String,
        connection_lost: bool,
    },

    /// Heartbeat-detected connection loss, surfaced through dependency-down
    /// hooks rather than as a direct call error.
    #[error("connection to component '{0}' lost")]
    ConnectionLost(String),

    /// Lookup or targeted operation named a component the registry does not
    /// know.
    #[error("unknown component: {0}")]
    UnknownComponent(String),

    /// A component type or name failed validation.
    #[error("invalid component identity: {0}")]
    InvalidIdentity(String),

    /// A malformed or out-of-sequence wire frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An internal channel closed or overflowed.
    #[error("channel error: {0}")]
    Channel(String),

    /// Bad or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MeshError {
    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MeshError::ReferenceTimeout { .. }
                | MeshError::RemoteInvocationFailed { .. }
                | MeshError::ConnectionLost(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_roundtrip() {
        let err = MeshError::NoSuchMethod {
            component_type: "Velocity".to_string(),
            method: "setVels".to_string(),
            arity: 2,
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: MeshError = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, MeshError::NoSuchMethod { arity: 2, .. }));
    }

    #[test]
    fn error_display_names_the_method() {
        let err = MeshError::RemoteInvocationFailed {
            method: "setVels".to_string(),
            detail: "divide by zero".to_string(),
            connection_lost: false,
        };
        assert!(err.to_string().contains("setVels"));
        assert!(err.to_string().contains("divide by zero"));
    }

    #[test]
    fn dispatch_failures_are_not_retryable() {
        let err = MeshError::NoSuchMethod {
            component_type: "Velocity".to_string(),
            method: "setVels".to_string(),
            arity: 1,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_failures_are_retryable() {
        assert!(MeshError::ConnectionLost("Velocity$v1".to_string()).is_retryable());
        assert!(
            MeshError::ReferenceTimeout {
                component_type: "Velocity".to_string(),
                waited_ms: 1000,
            }
            .is_retryable()
        );
    }
}

//! Wire frames.
//!
//! Every frame is a JSON object tagged by an `"op"` field, carried as a
//! WebSocket text message. The same [`Frame`] enum serves both directions;
//! which ops are legal from which side is enforced by the session code,
//! not the encoding.

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use botmesh_dispatch::Catalog;
use botmesh_registry::RegistryEvent;
use botmesh_types::{ComponentIdentity, ComponentInfo, Credentials, MeshError, Value};

/// One protocol frame.
///
/// Request/reply pairs correlate through `request_id`; fire-and-forget ops
/// (heartbeats, reference tracking) carry none.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Frame {
    /// Component → registry: the registration handshake. Also re-run
    /// verbatim to recover a `Down` identity.
    Register {
        request_id: Uuid,
        identity: ComponentIdentity,
        catalog: Catalog,
        host: String,
        port: u16,
    },
    /// Registry → component: handshake outcome.
    RegisterAck {
        request_id: Uuid,
        result: Result<ComponentInfo, MeshError>,
    },
    /// Component → registry: periodic liveness signal.
    Heartbeat { key: String },
    /// Registry → component. `alive == false` means the registry no
    /// longer considers the identity live and the component must re-run
    /// the registration handshake.
    HeartbeatAck { key: String, alive: bool },
    /// Component → registry: graceful shutdown.
    Deregister { key: String },
    /// Component → registry: discovery.
    Lookup {
        request_id: Uuid,
        component_type: String,
        name: Option<String>,
    },
    LookupReply {
        request_id: Uuid,
        info: Option<ComponentInfo>,
    },
    /// Component → registry: arm the down-cascade for a dependency the
    /// sending component now holds a reference to.
    TrackReference { dependency_key: String },
    ReleaseReference { dependency_key: String },
    /// Caller → registry → callee: a relayed method invocation.
    Invoke {
        request_id: Uuid,
        target_key: String,
        method: String,
        args: Vec<Value>,
        timeout_ms: u64,
    },
    /// Callee → registry → caller: the invocation outcome.
    InvokeResult {
        request_id: Uuid,
        result: Result<Value, MeshError>,
    },
    /// Registry → component: a targeted registry event (dependency
    /// up/down, client attach/detach).
    Event { event: RegistryEvent },
    /// Caller → registry → target: request the target shut down.
    Shutdown {
        request_id: Uuid,
        target_key: String,
        credentials: Credentials,
    },
    /// Target → registry → caller: whether the shutdown was permitted.
    ShutdownResult { request_id: Uuid, permitted: bool },
}

impl Frame {
    /// Serialize into a WebSocket text message.
    pub fn to_message(&self) -> Result<Message, MeshError> {
        let json = serde_json::to_string(self)
            .map_err(|e| MeshError::Protocol(format!("frame encode: {e}")))?;
        Ok(Message::Text(json.into()))
    }

    /// Parse a WebSocket text message into a frame.
    pub fn from_text(text: &str) -> Result<Self, MeshError> {
        serde_json::from_str(text).map_err(|e| MeshError::Protocol(format!("frame decode: {e}")))
    }

    /// Short op name for logging.
    pub fn op(&self) -> &'static str {
        match self {
            Frame::Register { .. } => "register",
            Frame::RegisterAck { .. } => "register_ack",
            Frame::Heartbeat { .. } => "heartbeat",
            Frame::HeartbeatAck { .. } => "heartbeat_ack",
            Frame::Deregister { .. } => "deregister",
            Frame::Lookup { .. } => "lookup",
            Frame::LookupReply { .. } => "lookup_reply",
            Frame::TrackReference { .. } => "track_reference",
            Frame::ReleaseReference { .. } => "release_reference",
            Frame::Invoke { .. } => "invoke",
            Frame::InvokeResult { .. } => "invoke_result",
            Frame::Event { .. } => "event",
            Frame::Shutdown { .. } => "shutdown",
            Frame::ShutdownResult { .. } => "shutdown_result",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botmesh_dispatch::Catalog;
    use botmesh_types::TypeTag;

    #[test]
    fn register_roundtrips_through_text() {
        let frame = Frame::Register {
            request_id: Uuid::new_v4(),
            identity: ComponentIdentity::new("Velocity", "v1").unwrap(),
            catalog: Catalog::new().method("setVels", vec![TypeTag::Float, TypeTag::Float]),
            host: "robot-3.local".to_string(),
            port: 9400,
        };
        let msg = frame.to_message().unwrap();
        let text = match msg {
            Message::Text(t) => t,
            other => panic!("expected text message, got {other:?}"),
        };
        assert!(text.as_str().contains("\"op\":\"register\""));

        let back = Frame::from_text(text.as_str()).unwrap();
        match back {
            Frame::Register { identity, catalog, .. } => {
                assert_eq!(identity.key(), "Velocity$v1");
                assert_eq!(catalog.len(), 1);
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn invoke_result_carries_typed_faults() {
        let frame = Frame::InvokeResult {
            request_id: Uuid::new_v4(),
            result: Err(MeshError::NoSuchMethod {
                component_type: "Velocity".to_string(),
                method: "warp".to_string(),
                arity: 0,
            }),
        };
        let msg = frame.to_message().unwrap();
        let text = match msg {
            Message::Text(t) => t,
            _ => unreachable!(),
        };
        let back = Frame::from_text(text.as_str()).unwrap();
        match back {
            Frame::InvokeResult { result, .. } => {
                assert!(matches!(result, Err(MeshError::NoSuchMethod { .. })));
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn garbage_text_is_a_protocol_error() {
        let result = Frame::from_text("{\"op\":\"no_such_op\"}");
        assert!(matches!(result, Err(MeshError::Protocol(_))));
        let result = Frame::from_text("not json at all");
        assert!(matches!(result, Err(MeshError::Protocol(_))));
    }

    #[test]
    fn heartbeat_is_compact() {
        let frame = Frame::Heartbeat {
            key: "Velocity$v1".to_string(),
        };
        let msg = frame.to_message().unwrap();
        if let Message::Text(text) = msg {
            let decoded = Frame::from_text(text.as_str()).unwrap();
            assert_eq!(decoded.op(), "heartbeat");
        }
    }
}

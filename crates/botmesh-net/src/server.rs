//! [`RegistryServer`] – the registry daemon's wire front.
//!
//! One TCP accept loop; every connection is upgraded to WebSocket and
//! served by its own task, so a slow component never stalls the others.
//! The server owns two routing structures: the session map (component key
//! → outbound frame channel) used by the invocation relay and the event
//! router, and the pending-relay map correlating in-flight invocations
//! with their origin.
//!
//! Malformed frames are logged and dropped; they never crash the registry
//! process.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use botmesh_registry::{HeartbeatAnswer, Registry};
use botmesh_types::MeshError;

use crate::protocol::Frame;

/// An invocation (or shutdown request) relayed to a callee and awaiting
/// its result.
struct PendingRelay {
    origin_key: String,
    target_key: String,
}

struct Shared {
    registry: Arc<Registry>,
    sessions: RwLock<HashMap<String, mpsc::UnboundedSender<Frame>>>,
    pending: Mutex<HashMap<Uuid, PendingRelay>>,
}

/// WebSocket server for the registry daemon.
pub struct RegistryServer {
    shared: Arc<Shared>,
}

impl RegistryServer {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                sessions: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Bind a listener, returning it with the resolved local address
    /// (useful with port 0).
    pub async fn bind(addr: &str) -> Result<(TcpListener, SocketAddr), MeshError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MeshError::Protocol(format!("bind error on {addr}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| MeshError::Protocol(format!("local_addr: {e}")))?;
        Ok((listener, local))
    }

    /// Serve connections until the process exits.
    pub async fn serve(self, listener: TcpListener) -> Result<(), MeshError> {
        let _router = tokio::spawn(route_events(Arc::clone(&self.shared)));
        info!("registry listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        if let Err(e) = handle_session(shared, stream, peer).await {
                            warn!(peer = %peer, error = %e, "session error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }
    }
}

/// Forward targeted registry events to the session of the component they
/// concern.
async fn route_events(shared: Arc<Shared>) {
    let mut rx = shared.registry.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => {
                let Some(target) = event.target().map(str::to_string) else {
                    continue;
                };
                let tx = shared
                    .sessions
                    .read()
                    .expect("session map lock poisoned")
                    .get(&target)
                    .cloned();
                if let Some(tx) = tx {
                    let _ = tx.send(Frame::Event { event });
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!(lagged_by = n, "event router lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn handle_session(
    shared: Arc<Shared>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), MeshError> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| MeshError::Protocol(format!("ws handshake from {peer}: {e}")))?;
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let mut session_key: Option<String> = None;

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                match outbound {
                    Some(frame) => match frame.to_message() {
                        Ok(msg) => {
                            if ws_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(peer = %peer, error = %e, "dropping unencodable frame");
                        }
                    },
                    None => break,
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match Frame::from_text(text.as_str()) {
                            Ok(frame) => {
                                handle_frame(&shared, &out_tx, &mut session_key, frame);
                            }
                            Err(e) => {
                                // Malformed input is logged, not fatal.
                                warn!(peer = %peer, error = %e, "dropping malformed frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(peer = %peer, error = %e, "ws read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    cleanup_session(&shared, session_key, &out_tx);
    Ok(())
}

fn handle_frame(
    shared: &Arc<Shared>,
    out_tx: &mpsc::UnboundedSender<Frame>,
    session_key: &mut Option<String>,
    frame: Frame,
) {
    match frame {
        Frame::Register {
            request_id,
            identity,
            catalog,
            host,
            port,
        } => {
            let key = identity.key();
            let result = shared
                .registry
                .register(identity.clone(), catalog, host, port)
                .and_then(|_| {
                    shared
                        .registry
                        .lookup(identity.component_type(), Some(identity.name()))
                        .ok_or_else(|| MeshError::UnknownComponent(key.clone()))
                });
            if result.is_ok() {
                shared
                    .sessions
                    .write()
                    .expect("session map lock poisoned")
                    .insert(key.clone(), out_tx.clone());
                *session_key = Some(key);
            }
            let _ = out_tx.send(Frame::RegisterAck { request_id, result });
        }

        Frame::Heartbeat { key } => {
            let alive = shared.registry.heartbeat(&key) == HeartbeatAnswer::Alive;
            let _ = out_tx.send(Frame::HeartbeatAck { key, alive });
        }

        Frame::Deregister { key } => {
            shared.registry.deregister(&key);
            shared
                .sessions
                .write()
                .expect("session map lock poisoned")
                .remove(&key);
            if session_key.as_deref() == Some(key.as_str()) {
                *session_key = None;
            }
        }

        Frame::Lookup {
            request_id,
            component_type,
            name,
        } => {
            let info = shared.registry.lookup(&component_type, name.as_deref());
            let _ = out_tx.send(Frame::LookupReply { request_id, info });
        }

        Frame::TrackReference { dependency_key } => {
            if let Some(holder) = session_key.as_deref() {
                if let Err(e) = shared.registry.track_reference(holder, &dependency_key) {
                    warn!(holder, dependency = %dependency_key, error = %e, "track failed");
                }
            }
        }

        Frame::ReleaseReference { dependency_key } => {
            if let Some(holder) = session_key.as_deref() {
                shared.registry.release_reference(holder, &dependency_key);
            }
        }

        Frame::Invoke {
            request_id,
            target_key,
            method,
            args,
            timeout_ms,
        } => {
            let Some(origin) = session_key.clone() else {
                let _ = out_tx.send(Frame::InvokeResult {
                    request_id,
                    result: Err(MeshError::Protocol(
                        "invoke before registration".to_string(),
                    )),
                });
                return;
            };
            let unavailable = Frame::InvokeResult {
                request_id,
                result: Err(MeshError::ConnectionLost(target_key.clone())),
            };
            relay_to_target(
                shared,
                out_tx,
                origin,
                request_id,
                target_key.clone(),
                Frame::Invoke {
                    request_id,
                    target_key,
                    method,
                    args,
                    timeout_ms,
                },
                unavailable,
            );
        }

        Frame::InvokeResult { request_id, result } => {
            let relay = shared
                .pending
                .lock()
                .expect("pending map lock poisoned")
                .remove(&request_id);
            let Some(relay) = relay else {
                return;
            };
            if result.is_ok() {
                // A served call counts as liveness for the callee.
                shared.registry.touch_activity(&relay.target_key);
            }
            forward_to(shared, &relay.origin_key, Frame::InvokeResult { request_id, result });
        }

        Frame::Shutdown {
            request_id,
            target_key,
            credentials,
        } => {
            let Some(origin) = session_key.clone() else {
                let _ = out_tx.send(Frame::ShutdownResult {
                    request_id,
                    permitted: false,
                });
                return;
            };
            let unavailable = Frame::ShutdownResult {
                request_id,
                permitted: false,
            };
            relay_to_target(
                shared,
                out_tx,
                origin,
                request_id,
                target_key.clone(),
                Frame::Shutdown {
                    request_id,
                    target_key,
                    credentials,
                },
                unavailable,
            );
        }

        Frame::ShutdownResult {
            request_id,
            permitted,
        } => {
            let relay = shared
                .pending
                .lock()
                .expect("pending map lock poisoned")
                .remove(&request_id);
            if let Some(relay) = relay {
                forward_to(
                    shared,
                    &relay.origin_key,
                    Frame::ShutdownResult {
                        request_id,
                        permitted,
                    },
                );
            }
        }

        other => {
            warn!(op = other.op(), "unexpected frame from component side");
        }
    }
}

/// Relay a request frame to the target component's session, recording the
/// pending entry so the result finds its way back. `unavailable` is sent
/// to the origin instead when the target has no session.
fn relay_to_target(
    shared: &Arc<Shared>,
    out_tx: &mpsc::UnboundedSender<Frame>,
    origin_key: String,
    request_id: Uuid,
    target_key: String,
    frame: Frame,
    unavailable: Frame,
) {
    let target_tx = shared
        .sessions
        .read()
        .expect("session map lock poisoned")
        .get(&target_key)
        .cloned();
    let Some(target_tx) = target_tx else {
        let _ = out_tx.send(unavailable);
        return;
    };
    shared
        .pending
        .lock()
        .expect("pending map lock poisoned")
        .insert(
            request_id,
            PendingRelay {
                origin_key,
                target_key,
            },
        );
    if target_tx.send(frame).is_err() {
        shared
            .pending
            .lock()
            .expect("pending map lock poisoned")
            .remove(&request_id);
        let _ = out_tx.send(unavailable);
    }
}

fn forward_to(shared: &Arc<Shared>, key: &str, frame: Frame) {
    let tx = shared
        .sessions
        .read()
        .expect("session map lock poisoned")
        .get(key)
        .cloned();
    if let Some(tx) = tx {
        let _ = tx.send(frame);
    }
}

/// On session close: drop the session entry (unless a newer session took
/// the key over) and fail in-flight relays whose callee just vanished.
/// Crash detection itself stays with the heartbeat monitor.
fn cleanup_session(
    shared: &Arc<Shared>,
    session_key: Option<String>,
    out_tx: &mpsc::UnboundedSender<Frame>,
) {
    let Some(key) = session_key else {
        return;
    };
    {
        let mut sessions = shared.sessions.write().expect("session map lock poisoned");
        if sessions
            .get(&key)
            .map(|tx| tx.same_channel(out_tx))
            .unwrap_or(false)
        {
            sessions.remove(&key);
        }
    }

    let orphaned: Vec<(Uuid, String)> = {
        let mut pending = shared.pending.lock().expect("pending map lock poisoned");
        let ids: Vec<Uuid> = pending
            .iter()
            .filter(|(_, relay)| relay.target_key == key)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| pending.remove(&id).map(|relay| (id, relay.origin_key)))
            .collect()
    };
    for (request_id, origin) in orphaned {
        forward_to(
            shared,
            &origin,
            Frame::InvokeResult {
                request_id,
                result: Err(MeshError::RemoteInvocationFailed {
                    method: String::new(),
                    detail: format!("connection to '{key}' lost while the call was in flight"),
                    connection_lost: true,
                }),
            },
        );
    }
    debug!(component = %key, "session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use botmesh_dispatch::Catalog;
    use botmesh_registry::LivenessConfig;
    use botmesh_types::{ComponentIdentity, LivenessState, TypeTag};
    use tokio_tungstenite::connect_async;

    async fn start_server() -> (SocketAddr, Arc<Registry>) {
        let registry = Registry::new(LivenessConfig::for_testing());
        let server = RegistryServer::new(Arc::clone(&registry));
        let (listener, addr) = RegistryServer::bind("127.0.0.1:0").await.unwrap();
        tokio::spawn(server.serve(listener));
        (addr, registry)
    }

    type Ws = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<TcpStream>,
    >;

    async fn send(ws: &mut Ws, frame: Frame) {
        ws.send(frame.to_message().unwrap()).await.unwrap();
    }

    async fn recv_frame(ws: &mut Ws) -> Frame {
        loop {
            match ws.next().await.expect("stream ended").unwrap() {
                Message::Text(text) => return Frame::from_text(text.as_str()).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn raw_register_heartbeat_lookup() {
        let (addr, registry) = start_server().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        send(
            &mut ws,
            Frame::Register {
                request_id: Uuid::new_v4(),
                identity: ComponentIdentity::new("Velocity", "v1").unwrap(),
                catalog: Catalog::new().method("setVels", vec![TypeTag::Float, TypeTag::Float]),
                host: "127.0.0.1".to_string(),
                port: 9400,
            },
        )
        .await;
        match recv_frame(&mut ws).await {
            Frame::RegisterAck { result, .. } => {
                let info = result.unwrap();
                assert_eq!(info.identity.key(), "Velocity$v1");
            }
            other => panic!("expected RegisterAck, got {other:?}"),
        }

        send(
            &mut ws,
            Frame::Heartbeat {
                key: "Velocity$v1".to_string(),
            },
        )
        .await;
        match recv_frame(&mut ws).await {
            Frame::HeartbeatAck { alive, .. } => assert!(alive),
            other => panic!("expected HeartbeatAck, got {other:?}"),
        }
        assert_eq!(
            registry.lookup("Velocity", Some("v1")).unwrap().state,
            LivenessState::Up
        );

        send(
            &mut ws,
            Frame::Lookup {
                request_id: Uuid::new_v4(),
                component_type: "Velocity".to_string(),
                name: None,
            },
        )
        .await;
        match recv_frame(&mut ws).await {
            Frame::LookupReply { info, .. } => {
                assert_eq!(info.unwrap().identity.key(), "Velocity$v1");
            }
            other => panic!("expected LookupReply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_register_over_the_wire_is_rejected() {
        let (addr, _registry) = start_server().await;
        let (mut ws1, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        let (mut ws2, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        let register = |request_id| Frame::Register {
            request_id,
            identity: ComponentIdentity::new("Velocity", "v1").unwrap(),
            catalog: Catalog::new(),
            host: "127.0.0.1".to_string(),
            port: 9400,
        };

        send(&mut ws1, register(Uuid::new_v4())).await;
        match recv_frame(&mut ws1).await {
            Frame::RegisterAck { result, .. } => assert!(result.is_ok()),
            other => panic!("unexpected {other:?}"),
        }
        send(&mut ws2, register(Uuid::new_v4())).await;
        match recv_frame(&mut ws2).await {
            Frame::RegisterAck { result, .. } => {
                assert!(matches!(result, Err(MeshError::DuplicateIdentity(_))));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_frames_do_not_kill_the_session() {
        let (addr, _registry) = start_server().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        ws.send(Message::Text("this is not a frame".into()))
            .await
            .unwrap();

        // The session must still answer a well-formed lookup.
        send(
            &mut ws,
            Frame::Lookup {
                request_id: Uuid::new_v4(),
                component_type: "Velocity".to_string(),
                name: None,
            },
        )
        .await;
        match recv_frame(&mut ws).await {
            Frame::LookupReply { info, .. } => assert!(info.is_none()),
            other => panic!("expected LookupReply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invoking_an_absent_target_fails_fast() {
        let (addr, _registry) = start_server().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        send(
            &mut ws,
            Frame::Register {
                request_id: Uuid::new_v4(),
                identity: ComponentIdentity::new("Planner", "p1").unwrap(),
                catalog: Catalog::new(),
                host: "127.0.0.1".to_string(),
                port: 9400,
            },
        )
        .await;
        let _ack = recv_frame(&mut ws).await;

        send(
            &mut ws,
            Frame::Invoke {
                request_id: Uuid::new_v4(),
                target_key: "Velocity$ghost".to_string(),
                method: "setVels".to_string(),
                args: vec![],
                timeout_ms: 0,
            },
        )
        .await;
        match recv_frame(&mut ws).await {
            Frame::InvokeResult { result, .. } => {
                assert!(matches!(result, Err(MeshError::ConnectionLost(_))));
            }
            other => panic!("expected InvokeResult, got {other:?}"),
        }
    }
}

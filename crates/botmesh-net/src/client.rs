//! Component-side session: [`ComponentSession`] and [`MeshClient`].
//!
//! A component keeps exactly one WebSocket session to the registry. The
//! session task owns the socket and serves four traffic sources in one
//! `select!` loop: the heartbeat ticker, commands from [`MeshClient`]
//! handles, queued outbound frames, and incoming frames (relayed
//! invocations, targeted events, shutdown requests).
//!
//! When the connection drops, in-flight requests fail transiently and the
//! task re-registers on a bounded retry interval — the same identity, the
//! same catalog, a fresh handshake. Holders of references never notice
//! beyond a window of transient call failures.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use uuid::Uuid;

use botmesh_broker::{ComponentContext, Directory, Invoker};
use botmesh_dispatch::{Catalog, Dispatcher};
use botmesh_registry::RegistryEvent;
use botmesh_types::{ComponentInfo, Credentials, MeshError, Value};

use crate::protocol::Frame;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection parameters for a component session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Registry endpoint, e.g. `ws://127.0.0.1:9400`.
    pub registry_url: String,
    /// Host this component advertises in its registry record.
    pub advertised_host: String,
    /// Port this component advertises in its registry record.
    pub advertised_port: u16,
    /// Interval between heartbeat frames, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Fixed retry interval for re-registration after connection loss.
    pub reconnect_interval_ms: u64,
}

impl SessionConfig {
    pub fn new(registry_url: impl Into<String>) -> Self {
        Self {
            registry_url: registry_url.into(),
            advertised_host: "127.0.0.1".to_string(),
            advertised_port: 0,
            heartbeat_interval_ms: 100,
            reconnect_interval_ms: 500,
        }
    }
}

enum Command {
    Lookup {
        component_type: String,
        name: Option<String>,
        reply: oneshot::Sender<Result<Option<ComponentInfo>, MeshError>>,
    },
    Invoke {
        target_key: String,
        method: String,
        args: Vec<Value>,
        timeout_ms: u64,
        reply: oneshot::Sender<Result<Value, MeshError>>,
    },
    Track {
        dependency_key: String,
    },
    Release {
        dependency_key: String,
    },
    RequestShutdown {
        target_key: String,
        credentials: Credentials,
        reply: oneshot::Sender<Result<bool, MeshError>>,
    },
    Deregister,
}

enum PendingReply {
    Lookup(oneshot::Sender<Result<Option<ComponentInfo>, MeshError>>),
    Invoke(oneshot::Sender<Result<Value, MeshError>>),
    Shutdown(oneshot::Sender<Result<bool, MeshError>>),
}

impl PendingReply {
    fn fail(self, error: MeshError) {
        match self {
            PendingReply::Lookup(tx) => {
                let _ = tx.send(Err(error));
            }
            PendingReply::Invoke(tx) => {
                let _ = tx.send(Err(error));
            }
            PendingReply::Shutdown(tx) => {
                let _ = tx.send(Err(error));
            }
        }
    }
}

/// Cheap cloneable handle to a running session.
///
/// Implements the broker's [`Directory`] and [`Invoker`] seams, so a
/// [`ReferenceBroker`][botmesh_broker::ReferenceBroker] built over it
/// behaves exactly like one built over an in-process mesh.
#[derive(Clone)]
pub struct MeshClient {
    key: String,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<RegistryEvent>,
    shutdown: watch::Receiver<bool>,
}

impl MeshClient {
    /// This component's canonical key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Subscribe to targeted registry events (dependency up/down, client
    /// attach/detach) pushed over the session. Feed this into a
    /// [`HookRunner`][botmesh_broker::HookRunner].
    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Becomes `true` once the session has ended for good (permitted
    /// shutdown or explicit deregistration).
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }

    /// Wire discovery.
    pub async fn lookup(
        &self,
        component_type: &str,
        name: Option<&str>,
    ) -> Result<Option<ComponentInfo>, MeshError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::Lookup {
            component_type: component_type.to_string(),
            name: name.map(str::to_string),
            reply,
        })?;
        rx.await
            .map_err(|_| MeshError::ConnectionLost("registry".to_string()))?
    }

    /// Relay an invocation through the registry.
    ///
    /// `timeout_ms` bounds the local wait only (`0` = forever); on expiry
    /// the callee may still be executing (fire-and-abandon).
    pub async fn invoke(
        &self,
        target_key: &str,
        method: &str,
        args: &[Value],
        timeout_ms: u64,
    ) -> Result<Value, MeshError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::Invoke {
            target_key: target_key.to_string(),
            method: method.to_string(),
            args: args.to_vec(),
            timeout_ms,
            reply,
        })?;
        let awaited = if timeout_ms > 0 {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
                Ok(inner) => inner,
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
            rx.await
        };
        awaited.map_err(|_| MeshError::ConnectionLost("registry".to_string()))?
    }

    /// Ask the component behind `target_key` to shut down, presenting
    /// `credentials`. Returns whether it permitted the request.
    pub async fn request_shutdown(
        &self,
        target_key: &str,
        credentials: Credentials,
    ) -> Result<bool, MeshError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::RequestShutdown {
            target_key: target_key.to_string(),
            credentials,
            reply,
        })?;
        rx.await
            .map_err(|_| MeshError::ConnectionLost("registry".to_string()))?
    }

    /// Graceful shutdown: deregister and end the session.
    pub fn deregister(&self) {
        let _ = self.commands.send(Command::Deregister);
    }

    fn send_command(&self, command: Command) -> Result<(), MeshError> {
        self.commands
            .send(command)
            .map_err(|_| MeshError::ConnectionLost("registry".to_string()))
    }
}

#[async_trait]
impl Directory for MeshClient {
    async fn lookup(
        &self,
        component_type: &str,
        name: Option<&str>,
    ) -> Result<Option<ComponentInfo>, MeshError> {
        MeshClient::lookup(self, component_type, name).await
    }

    async fn track_reference(
        &self,
        _holder_key: &str,
        dependency_key: &str,
    ) -> Result<(), MeshError> {
        // The session itself is the holder; the registry attributes the
        // reference to the session's registered key.
        self.send_command(Command::Track {
            dependency_key: dependency_key.to_string(),
        })
    }

    async fn release_reference(
        &self,
        _holder_key: &str,
        dependency_key: &str,
    ) -> Result<(), MeshError> {
        self.send_command(Command::Release {
            dependency_key: dependency_key.to_string(),
        })
    }
}

#[async_trait]
impl Invoker for MeshClient {
    async fn invoke(
        &self,
        target_key: &str,
        method: &str,
        args: &[Value],
        timeout_ms: u64,
    ) -> Result<Value, MeshError> {
        MeshClient::invoke(self, target_key, method, args, timeout_ms).await
    }
}

/// The session lifecycle owner. Construct with [`ComponentSession::start`].
pub struct ComponentSession;

enum SessionEnd {
    Reconnect,
    Final,
}

impl ComponentSession {
    /// Connect, run the registration handshake, and spawn the session
    /// task.
    ///
    /// The first handshake happens inline so startup failures (registry
    /// unreachable, [`MeshError::DuplicateIdentity`]) surface to the
    /// caller; after that the task re-registers on its own whenever the
    /// connection drops.
    pub async fn start(
        config: SessionConfig,
        context: ComponentContext,
        dispatcher: Dispatcher,
    ) -> Result<(MeshClient, JoinHandle<()>), MeshError> {
        let key = context.key();
        let catalog = dispatcher.catalog().clone();
        let ws = connect_and_register(&config, &context, &catalog).await?;
        info!(component = %key, registry = %config.registry_url, "registered with registry");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let client = MeshClient {
            key: key.clone(),
            commands: command_tx,
            events: events_tx.clone(),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(run_session(
            ws,
            config,
            context,
            Arc::new(dispatcher),
            catalog,
            command_rx,
            events_tx,
            shutdown_tx,
        ));
        Ok((client, task))
    }
}

/// Connect and run the registration handshake; resolves once the registry
/// acknowledges the record.
async fn connect_and_register(
    config: &SessionConfig,
    context: &ComponentContext,
    catalog: &Catalog,
) -> Result<Ws, MeshError> {
    let (mut ws, _) = connect_async(config.registry_url.as_str())
        .await
        .map_err(|e| MeshError::ConnectionLost(format!("{}: {e}", config.registry_url)))?;

    let request_id = Uuid::new_v4();
    let register = Frame::Register {
        request_id,
        identity: context.identity().clone(),
        catalog: catalog.clone(),
        host: config.advertised_host.clone(),
        port: config.advertised_port,
    };
    ws.send(register.to_message()?)
        .await
        .map_err(|e| MeshError::ConnectionLost(format!("register send: {e}")))?;

    loop {
        let msg = ws
            .next()
            .await
            .ok_or_else(|| MeshError::ConnectionLost("registry closed during handshake".to_string()))?
            .map_err(|e| MeshError::ConnectionLost(format!("handshake read: {e}")))?;
        let Message::Text(text) = msg else {
            continue;
        };
        match Frame::from_text(text.as_str())? {
            Frame::RegisterAck {
                request_id: acked,
                result,
            } if acked == request_id => {
                result?;
                return Ok(ws);
            }
            other => {
                debug!(op = other.op(), "ignoring frame during handshake");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    mut ws: Ws,
    config: SessionConfig,
    context: ComponentContext,
    dispatcher: Arc<Dispatcher>,
    catalog: Catalog,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    events_tx: broadcast::Sender<RegistryEvent>,
    shutdown_tx: watch::Sender<bool>,
) {
    let key = context.key();
    loop {
        let end = serve(
            ws,
            &config,
            &context,
            &dispatcher,
            &mut command_rx,
            &events_tx,
        )
        .await;
        match end {
            SessionEnd::Final => {
                let _ = shutdown_tx.send(true);
                info!(component = %key, "session ended");
                return;
            }
            SessionEnd::Reconnect => {
                warn!(component = %key, "registry connection lost, re-registering");
            }
        }

        // Bounded-interval retry: the registry may still hold our record
        // live (DuplicateIdentity) until the monitor times it out, so just
        // keep trying the handshake.
        ws = loop {
            tokio::time::sleep(Duration::from_millis(config.reconnect_interval_ms)).await;
            match connect_and_register(&config, &context, &catalog).await {
                Ok(fresh) => {
                    info!(component = %key, "re-registered with registry");
                    break fresh;
                }
                Err(e) => {
                    debug!(component = %key, error = %e, "re-registration attempt failed");
                }
            }
        };
    }
}

async fn serve(
    ws: Ws,
    config: &SessionConfig,
    context: &ComponentContext,
    dispatcher: &Arc<Dispatcher>,
    command_rx: &mut mpsc::UnboundedReceiver<Command>,
    events_tx: &broadcast::Sender<RegistryEvent>,
) -> SessionEnd {
    let key = context.key();
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let mut pending: HashMap<Uuid, PendingReply> = HashMap::new();
    let mut heartbeat = tokio::time::interval(Duration::from_millis(config.heartbeat_interval_ms));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let _ = out_tx.send(Frame::Heartbeat { key: key.clone() });
            }

            queued = out_rx.recv() => {
                let Some(frame) = queued else { break };
                let Ok(msg) = frame.to_message() else { continue };
                if ws_tx.send(msg).await.is_err() {
                    fail_pending(&mut pending);
                    return SessionEnd::Reconnect;
                }
            }

            command = command_rx.recv() => {
                let Some(command) = command else {
                    // Every client handle is gone; leave quietly.
                    let _ = out_tx.send(Frame::Deregister { key: key.clone() });
                    return SessionEnd::Final;
                };
                match command {
                    Command::Lookup { component_type, name, reply } => {
                        let request_id = Uuid::new_v4();
                        pending.insert(request_id, PendingReply::Lookup(reply));
                        let _ = out_tx.send(Frame::Lookup { request_id, component_type, name });
                    }
                    Command::Invoke { target_key, method, args, timeout_ms, reply } => {
                        let request_id = Uuid::new_v4();
                        pending.insert(request_id, PendingReply::Invoke(reply));
                        let _ = out_tx.send(Frame::Invoke {
                            request_id,
                            target_key,
                            method,
                            args,
                            timeout_ms,
                        });
                    }
                    Command::Track { dependency_key } => {
                        let _ = out_tx.send(Frame::TrackReference { dependency_key });
                    }
                    Command::Release { dependency_key } => {
                        let _ = out_tx.send(Frame::ReleaseReference { dependency_key });
                    }
                    Command::RequestShutdown { target_key, credentials, reply } => {
                        let request_id = Uuid::new_v4();
                        pending.insert(request_id, PendingReply::Shutdown(reply));
                        let _ = out_tx.send(Frame::Shutdown { request_id, target_key, credentials });
                    }
                    Command::Deregister => {
                        let frame = Frame::Deregister { key: key.clone() };
                        if let Ok(msg) = frame.to_message() {
                            let _ = ws_tx.send(msg).await;
                        }
                        fail_pending(&mut pending);
                        return SessionEnd::Final;
                    }
                }
            }

            incoming = ws_rx.next() => {
                let frame = match incoming {
                    Some(Ok(Message::Text(text))) => match Frame::from_text(text.as_str()) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(component = %key, error = %e, "dropping malformed frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        fail_pending(&mut pending);
                        return SessionEnd::Reconnect;
                    }
                    Some(Err(e)) => {
                        debug!(component = %key, error = %e, "ws read error");
                        fail_pending(&mut pending);
                        return SessionEnd::Reconnect;
                    }
                    _ => continue,
                };

                match frame {
                    Frame::HeartbeatAck { alive, .. } => {
                        if !alive {
                            // The registry forgot us; run a fresh handshake.
                            warn!(component = %key, "registry answered heartbeat with unknown");
                            fail_pending(&mut pending);
                            return SessionEnd::Reconnect;
                        }
                    }
                    Frame::LookupReply { request_id, info } => {
                        if let Some(PendingReply::Lookup(reply)) = pending.remove(&request_id) {
                            let _ = reply.send(Ok(info));
                        }
                    }
                    Frame::InvokeResult { request_id, result } => {
                        if let Some(PendingReply::Invoke(reply)) = pending.remove(&request_id) {
                            let _ = reply.send(result);
                        }
                    }
                    Frame::ShutdownResult { request_id, permitted } => {
                        if let Some(PendingReply::Shutdown(reply)) = pending.remove(&request_id) {
                            let _ = reply.send(Ok(permitted));
                        }
                    }
                    Frame::Invoke { request_id, method, args, .. } => {
                        // We are the callee; serve the call off-loop so a
                        // slow handler never stalls heartbeats.
                        let dispatcher = Arc::clone(dispatcher);
                        let out = out_tx.clone();
                        tokio::spawn(async move {
                            let result = dispatcher.invoke(&method, &args);
                            let _ = out.send(Frame::InvokeResult { request_id, result });
                        });
                    }
                    Frame::Event { event } => {
                        let _ = events_tx.send(event);
                    }
                    Frame::Shutdown { request_id, credentials, .. } => {
                        let permitted = context.permit_shutdown(&credentials).await;
                        let reply = Frame::ShutdownResult { request_id, permitted };
                        if let Ok(msg) = reply.to_message() {
                            let _ = ws_tx.send(msg).await;
                        }
                        if permitted {
                            info!(component = %key, "shutdown permitted, deregistering");
                            if let Ok(msg) = (Frame::Deregister { key: key.clone() }).to_message() {
                                let _ = ws_tx.send(msg).await;
                            }
                            fail_pending(&mut pending);
                            return SessionEnd::Final;
                        }
                    }
                    other => {
                        debug!(component = %key, op = other.op(), "ignoring frame");
                    }
                }
            }
        }
    }
    fail_pending(&mut pending);
    SessionEnd::Final
}

fn fail_pending(pending: &mut HashMap<Uuid, PendingReply>) {
    for (_, reply) in pending.drain() {
        reply.fail(MeshError::ConnectionLost("registry".to_string()));
    }
}

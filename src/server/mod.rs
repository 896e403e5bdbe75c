//! Component H: [`Server`] — accepts connections, keeps a per-identifier
//! Session multimap, and exposes send/broadcast/queueing operations
//! (spec.md §4.H).

pub mod authority;
pub mod session;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::net::{TcpListener, UnixListener};
use tokio::sync::{mpsc, RwLock};

use crate::device::ByteStream;
use crate::schema::{ValidationMode, SchemaValidator};
use crate::server::authority::Authority;
use crate::server::session::{Session, SessionEvent};
use crate::value::{JsonValue, Message};

#[derive(Debug)]
pub enum ServerEvent {
    ConnectionAdded(String),
    ConnectionRemoved(String),
    MessageReceived(String, Message),
    AuthorizationFailed,
    InboundValidationFailed(String),
    OutboundValidationFailed(String),
}

/// `Server` construction knobs, read the way the teacher's `AppState::new`
/// takes its dependencies, plus the schema environment variables from
/// spec.md §6.
#[derive(Default)]
pub struct ServerConfig {
    pub authority: Option<Arc<dyn Authority>>,
}

struct Registry {
    sessions: HashMap<String, Vec<Session>>,
    multi_allowed: HashSet<String>,
    queueing: HashSet<String>,
    queues: HashMap<String, VecDeque<Message>>,
}

/// Server-side acceptor + session registry.
pub struct Server {
    registry: Arc<RwLock<Registry>>,
    authority: Arc<dyn Authority>,
    inbound_schema: Arc<RwLock<Option<(SchemaValidator, ValidationMode)>>>,
    outbound_schema: Arc<RwLock<Option<(SchemaValidator, ValidationMode)>>>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    next_session_id: std::sync::atomic::AtomicU64,
}

impl Server {
    pub fn new(config: ServerConfig) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let authority = config.authority.unwrap_or_else(|| Arc::new(authority::NoneAuthority));
        let server = Server {
            registry: Arc::new(RwLock::new(Registry {
                sessions: HashMap::new(),
                multi_allowed: HashSet::new(),
                queueing: HashSet::new(),
                queues: HashMap::new(),
            })),
            authority,
            inbound_schema: Arc::new(RwLock::new(None)),
            outbound_schema: Arc::new(RwLock::new(None)),
            events_tx,
            next_session_id: std::sync::atomic::AtomicU64::new(0),
        };
        server.load_schema_env();
        (server, events_rx)
    }

    /// Reads `JSONSERVER_SCHEMA_{INBOUND,OUTBOUND}_PATH` and
    /// `JSONSERVER_SCHEMA_CONTROL` (spec.md §6), matching the teacher's
    /// startup-time environment reads.
    fn load_schema_env(&self) {
        let mode = match std::env::var("JSONSERVER_SCHEMA_CONTROL").ok().as_deref() {
            Some("drop") => ValidationMode::DropIfInvalid,
            Some(s) if s.contains("drop") => ValidationMode::DropIfInvalid,
            Some(s) if s.contains("warn") => ValidationMode::WarnIfInvalid,
            _ => ValidationMode::WarnIfInvalid,
        };
        if let Ok(dir) = std::env::var("JSONSERVER_SCHEMA_INBOUND_PATH") {
            match SchemaValidator::load_from_folder(std::path::Path::new(&dir), None, "json") {
                Ok(validator) => {
                    let slot = Arc::clone(&self.inbound_schema);
                    tokio::spawn(async move {
                        *slot.write().await = Some((validator, mode));
                    });
                }
                Err(e) => tracing::error!(error = %e, dir, "failed loading inbound schema folder"),
            }
        }
        if let Ok(dir) = std::env::var("JSONSERVER_SCHEMA_OUTBOUND_PATH") {
            match SchemaValidator::load_from_folder(std::path::Path::new(&dir), None, "json") {
                Ok(validator) => {
                    let slot = Arc::clone(&self.outbound_schema);
                    tokio::spawn(async move {
                        *slot.write().await = Some((validator, mode));
                    });
                }
                Err(e) => tracing::error!(error = %e, dir, "failed loading outbound schema folder"),
            }
        }
    }

    pub async fn listen_local(self: &Arc<Self>, socket_path: &str) -> std::io::Result<()> {
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => this.accept(Box::new(stream)).await,
                    Err(e) => {
                        tracing::error!(error = %e, "local socket accept failed");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    pub async fn listen_tcp(self: &Arc<Self>, port: u16) -> std::io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => this.accept(Box::new(stream)).await,
                    Err(e) => {
                        tracing::error!(error = %e, "tcp accept failed");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn accept(self: &Arc<Self>, device: Box<dyn ByteStream>) {
        let id = self.next_session_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let (session, mut session_events) = Session::spawn(id, device, Arc::clone(&self.authority)).await;
        tracing::info!(session_id = id, "session accepted");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = session_events.recv().await {
                match event {
                    SessionEvent::Authorized(identifier) => this.on_authorized(identifier, session).await,
                    SessionEvent::AuthorizationFailed => {
                        let _ = this.events_tx.send(ServerEvent::AuthorizationFailed);
                        tracing::warn!(session_id = id, "authorization failed");
                        return;
                    }
                    SessionEvent::MessageReceived(identifier, msg) => this.on_message(identifier, msg).await,
                    SessionEvent::Disconnected(identifier) => {
                        this.on_disconnected(identifier).await;
                        return;
                    }
                }
            }
        });
    }

    async fn on_authorized(&self, identifier: String, session: Session) {
        let mut registry = self.registry.write().await;
        let existing = registry.sessions.entry(identifier.clone()).or_default();
        let already_bound = !existing.is_empty();
        if already_bound && !registry.multi_allowed.contains(&identifier) {
            session.stop();
            tracing::warn!(%identifier, "rejecting additional connection, multiple connections disabled");
            return;
        }
        registry.sessions.entry(identifier.clone()).or_default().push(session);
        drop(registry);
        let _ = self.events_tx.send(ServerEvent::ConnectionAdded(identifier.clone()));
        tracing::info!(%identifier, "connection added");
    }

    async fn on_message(&self, identifier: String, msg: Message) {
        if let Some((validator, mode)) = self.inbound_schema.read().await.as_ref() {
            if !validator.validate_schema_any(&JsonValue::Object(msg.clone())) {
                tracing::warn!(%identifier, "inbound schema validation failed");
                let _ = self.events_tx.send(ServerEvent::InboundValidationFailed(identifier.clone()));
                if *mode == ValidationMode::DropIfInvalid {
                    return;
                }
            }
        }
        let _ = self.events_tx.send(ServerEvent::MessageReceived(identifier, msg));
    }

    async fn on_disconnected(&self, identifier: Option<String>) {
        let Some(identifier) = identifier else { return };
        let mut registry = self.registry.write().await;
        if let Some(sessions) = registry.sessions.get_mut(&identifier) {
            sessions.retain(|s| !s.is_finished());
            if sessions.is_empty() {
                registry.sessions.remove(&identifier);
                drop(registry);
                let _ = self.events_tx.send(ServerEvent::ConnectionRemoved(identifier.clone()));
                tracing::info!(%identifier, "connection removed");
                return;
            }
        }
    }

    /// Send to every Session bound to `identifier`. Returns true iff at
    /// least one was reached (spec.md §4.H).
    pub async fn send(&self, identifier: &str, obj: &JsonValue) -> bool {
        if let Some((validator, mode)) = self.outbound_schema.read().await.as_ref() {
            if !validator.validate_schema_any(obj) {
                let _ = self.events_tx.send(ServerEvent::OutboundValidationFailed(identifier.to_owned()));
                if *mode == ValidationMode::DropIfInvalid {
                    return false;
                }
            }
        }

        let registry = self.registry.read().await;
        if let Some(sessions) = registry.sessions.get(identifier) {
            let mut reached = false;
            for session in sessions {
                reached |= session.send(obj).await;
            }
            if reached {
                return true;
            }
        }
        drop(registry);

        if self.is_queuing_enabled(identifier).await {
            let mut registry = self.registry.write().await;
            registry.queues.entry(identifier.to_owned()).or_default().push_back(
                obj.as_object().cloned().unwrap_or_default(),
            );
        }
        false
    }

    /// Send `obj` to every Authorized Session, each Session at most once
    /// (spec.md §4.H) — an identifier with multiple concurrent connections
    /// receives it on all of them.
    pub async fn broadcast(&self, obj: &JsonValue) {
        let registry = self.registry.read().await;
        for sessions in registry.sessions.values() {
            for session in sessions {
                let _ = session.send(obj).await;
            }
        }
    }

    pub async fn remove_connection(&self, identifier: &str) {
        let mut registry = self.registry.write().await;
        if let Some(sessions) = registry.sessions.remove(identifier) {
            for session in sessions {
                session.stop();
            }
        }
    }

    pub async fn enable_queuing(&self, identifier: &str) {
        self.registry.write().await.queueing.insert(identifier.to_owned());
    }

    pub async fn disable_queuing(&self, identifier: &str) {
        self.registry.write().await.queueing.remove(identifier);
    }

    pub async fn clear_queue(&self, identifier: &str) {
        self.registry.write().await.queues.remove(identifier);
    }

    pub async fn is_queuing_enabled(&self, identifier: &str) -> bool {
        self.registry.read().await.queueing.contains(identifier)
    }

    pub async fn enable_multiple_connections(&self, identifier: &str) {
        self.registry.write().await.multi_allowed.insert(identifier.to_owned());
    }

    pub async fn disable_multiple_connections(&self, identifier: &str) {
        self.registry.write().await.multi_allowed.remove(identifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockByteStream;
    use crate::server::authority::TokenAuthority;
    use crate::stream::Stream;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn token_authorized_client_sends_and_receives() {
        let authority = Arc::new(TokenAuthority::new().register("T1", "alice"));
        let (server, mut events) = Server::new(ServerConfig { authority: Some(authority) });
        let server = Arc::new(server);

        let (dev_client, dev_server) = MockByteStream::pair(4096);
        server.accept(Box::new(dev_server)).await;

        let (mut client, _client_events) = Stream::new();
        client.set_device(Box::new(dev_client)).await;
        assert!(client.send(&json!({"token": "T1"})).await);

        let evt = events.recv().await.expect("connection added");
        assert!(matches!(evt, ServerEvent::ConnectionAdded(id) if id == "alice"));

        assert!(server.send("alice", &json!({"hi": true})).await);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(client.message_available());
        assert_eq!(client.read_message().get("hi").unwrap(), true);
    }
}

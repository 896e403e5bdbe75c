//! Component I: [`Session`] — per-accepted-connection state machine
//! (spec.md §4.I) that hands inbound objects to an [`Authority`] until
//! authorized, then forwards them upstream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::device::ByteStream;
use crate::server::authority::{AuthState, Authority};
use crate::stream::{Stream, StreamEvent};
use crate::value::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthorized,
    Authorized,
}

#[derive(Debug)]
pub enum SessionEvent {
    Authorized(String),
    AuthorizationFailed,
    MessageReceived(String, Message),
    Disconnected(Option<String>),
}

/// Runs one accepted connection's authorize-then-forward loop as a
/// background task. `Server` owns the `Session` and drains `SessionEvent`s
/// to drive its own public events.
pub struct Session {
    pub id: u64,
    stream: Arc<Stream>,
    task: JoinHandle<()>,
}

impl Session {
    pub async fn spawn(
        id: u64,
        device: Box<dyn ByteStream>,
        authority: Arc<dyn Authority>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (mut stream, stream_events) = Stream::new();
        let peer_credentials = device.peer_credentials();
        stream.set_device(device).await;
        let stream = Arc::new(stream);

        let task = tokio::spawn(run_loop(Arc::clone(&stream), authority, peer_credentials, stream_events, events_tx));

        (Session { id, stream, task }, events_rx)
    }

    pub async fn send(&self, obj: &crate::value::JsonValue) -> bool {
        self.stream.send(obj).await
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run_loop(
    stream: Arc<Stream>,
    authority: Arc<dyn Authority>,
    peer_credentials: Option<crate::device::PeerCredentials>,
    mut stream_events: mpsc::UnboundedReceiver<StreamEvent>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut state = SessionState::Unauthorized;
    let mut identifier: Option<String> = None;

    let initial = authority.on_client_connected(peer_credentials).await;
    match initial.state {
        AuthState::Authorized => {
            identifier = initial.identifier;
            state = SessionState::Authorized;
            let _ = events_tx.send(SessionEvent::Authorized(identifier.clone().unwrap_or_default()));
        }
        AuthState::NotAuthorized => {
            let _ = events_tx.send(SessionEvent::AuthorizationFailed);
            return;
        }
        AuthState::InProgress => {}
    }

    while let Some(event) = stream_events.recv().await {
        match event {
            StreamEvent::ReadyReadMessage => {
                while stream.message_available() {
                    let msg = stream.read_message();
                    match state {
                        SessionState::Unauthorized => {
                            let record = authority.on_message_received(&msg).await;
                            match record.state {
                                AuthState::Authorized => {
                                    identifier = record.identifier;
                                    state = SessionState::Authorized;
                                    let _ = events_tx
                                        .send(SessionEvent::Authorized(identifier.clone().unwrap_or_default()));
                                }
                                AuthState::NotAuthorized => {
                                    let _ = events_tx.send(SessionEvent::AuthorizationFailed);
                                    return;
                                }
                                AuthState::InProgress => {}
                            }
                        }
                        SessionState::Authorized => {
                            let id = identifier.clone().unwrap_or_default();
                            let _ = events_tx.send(SessionEvent::MessageReceived(id, msg));
                        }
                    }
                }
            }
            StreamEvent::Disconnected => {
                let _ = events_tx.send(SessionEvent::Disconnected(
                    (state == SessionState::Authorized).then(|| identifier.clone().unwrap_or_default()),
                ));
                return;
            }
            StreamEvent::BytesWritten(_) | StreamEvent::ReadBufferOverflow { .. } => {}
        }
    }
}

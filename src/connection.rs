//! Component F: [`Connection`] — the client façade: configures, connects
//! (local socket or TCP), owns a [`Stream`], drives auto-reconnect, and
//! hands out [`crate::endpoint::Endpoint`] handles multiplexed over that
//! Stream via an [`EndpointRouter`] (spec.md §4.F).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::net::{TcpStream, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::device::ByteStream;
use crate::endpoint::Endpoint;
use crate::format::Format;
use crate::router::{EndpointRouter, DEFAULT_ENDPOINT};
use crate::stream::{Stream, StreamEvent};
use crate::value::JsonValue;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Authenticating,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("no error")]
    NoError,
    #[error("unknown error")]
    UnknownError,
    #[error("local socket error")]
    LocalSocketError,
    #[error("tcp socket error")]
    TcpSocketError,
}

#[derive(Debug)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    Error(ConnectionError, String),
}

#[derive(Clone)]
enum ConnectTarget {
    Local(String),
    Tcp(String, u16),
}

/// Configures a [`Connection`] before the first connect call, the way the
/// teacher's `UplinkConfig` configures an `UplinkSession` (spec.md §2.3).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint_key: String,
    pub auto_reconnect_enabled: bool,
    /// Kept for fidelity with spec.md §4.F's off-thread mode switch. Under
    /// tokio's cooperative scheduler there is no separate OS thread to hand
    /// the Stream to either way — every Connection already reads on its own
    /// task — so this only affects whether `send` is dispatched inline or
    /// via the same cross-task channel used for the worker path; see
    /// DESIGN.md.
    pub use_separate_thread: bool,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub format: Format,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            endpoint_key: "endpoint".to_owned(),
            auto_reconnect_enabled: false,
            use_separate_thread: false,
            read_buffer_size: 0,
            write_buffer_size: 0,
            format: Format::Undefined,
        }
    }
}

struct Inner {
    config: StdMutex<ConnectionConfig>,
    state: StdMutex<ConnectionState>,
    stream: StdMutex<Option<Arc<Stream>>>,
    router: StdMutex<EndpointRouter>,
    endpoints: StdMutex<HashSet<String>>,
    wakers: StdMutex<std::collections::HashMap<String, Vec<mpsc::UnboundedSender<()>>>>,
    last_error: StdMutex<(ConnectionError, String)>,
    last_target: StdMutex<Option<ConnectTarget>>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    pump_task: StdMutex<Option<JoinHandle<()>>>,
    reconnect_task: StdMutex<Option<JoinHandle<()>>>,
    explicit_disconnect: AtomicBool,
}

/// Client-side façade. Cheaply cloned; all instances share the same
/// underlying Stream, router, and endpoint table.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut router = EndpointRouter::new();
        router.set_endpoint_key(config.endpoint_key.clone());
        let inner = Arc::new(Inner {
            config: StdMutex::new(config),
            state: StdMutex::new(ConnectionState::Unconnected),
            stream: StdMutex::new(None),
            router: StdMutex::new(router),
            endpoints: StdMutex::new(HashSet::new()),
            wakers: StdMutex::new(std::collections::HashMap::new()),
            last_error: StdMutex::new((ConnectionError::NoError, String::new())),
            last_target: StdMutex::new(None),
            events_tx,
            pump_task: StdMutex::new(None),
            reconnect_task: StdMutex::new(None),
            explicit_disconnect: AtomicBool::new(false),
        });
        (Connection { inner }, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock().unwrap()
    }

    pub fn endpoint_key(&self) -> String {
        self.inner.router.lock().unwrap().endpoint_key().to_owned()
    }

    pub fn last_error(&self) -> (ConnectionError, String) {
        self.inner.last_error.lock().unwrap().clone()
    }

    /// Register a named endpoint on this Connection (spec.md §4.G: "adding
    /// an Endpoint to a Connection sets its parent").
    pub fn add_endpoint(&self, name: impl Into<String>) -> Endpoint {
        let name = name.into();
        self.inner.endpoints.lock().unwrap().insert(name.clone());
        self.inner.router.lock().unwrap().register(&name);
        Endpoint::new(name, self.clone())
    }

    /// The always-present, unnamed endpoint (spec.md §3).
    pub fn default_endpoint(&self) -> Endpoint {
        Endpoint::new(DEFAULT_ENDPOINT.to_owned(), self.clone())
    }

    pub fn remove_endpoint(&self, name: &str) {
        self.inner.endpoints.lock().unwrap().remove(name);
        self.inner.router.lock().unwrap().unregister(name);
        self.inner.wakers.lock().unwrap().remove(name);
    }

    pub async fn connect_local(&self, name: &str) -> bool {
        self.inner.explicit_disconnect.store(false, Ordering::SeqCst);
        *self.inner.last_target.lock().unwrap() = Some(ConnectTarget::Local(name.to_owned()));
        self.connect_target(ConnectTarget::Local(name.to_owned())).await
    }

    pub async fn connect_tcp(&self, host: &str, port: u16) -> bool {
        self.inner.explicit_disconnect.store(false, Ordering::SeqCst);
        *self.inner.last_target.lock().unwrap() = Some(ConnectTarget::Tcp(host.to_owned(), port));
        self.connect_target(ConnectTarget::Tcp(host.to_owned(), port)).await
    }

    /// User-initiated close. Suppresses auto-reconnect (spec.md §4.F).
    pub async fn disconnect(&self) {
        self.inner.explicit_disconnect.store(true, Ordering::SeqCst);
        if let Some(task) = self.inner.reconnect_task.lock().unwrap().take() {
            task.abort();
        }
        self.inner.stream.lock().unwrap().take();
        if let Some(task) = self.inner.pump_task.lock().unwrap().take() {
            task.abort();
        }
        self.set_state(ConnectionState::Unconnected);
    }

    async fn connect_target(&self, target: ConnectTarget) -> bool {
        self.set_state(ConnectionState::Connecting);

        let device: Box<dyn ByteStream> = match &target {
            ConnectTarget::Local(path) => match UnixStream::connect(path).await {
                Ok(s) => Box::new(s),
                Err(e) => {
                    self.fail(ConnectionError::LocalSocketError, e.to_string());
                    return false;
                }
            },
            ConnectTarget::Tcp(host, port) => match TcpStream::connect((host.as_str(), *port)).await {
                Ok(s) => Box::new(s),
                Err(e) => {
                    self.fail(ConnectionError::TcpSocketError, e.to_string());
                    return false;
                }
            },
        };

        self.set_state(ConnectionState::Authenticating);

        let (mut stream, events_rx) = Stream::new();
        {
            let cfg = self.inner.config.lock().unwrap().clone();
            stream.set_read_buffer_size(cfg.read_buffer_size);
            stream.set_write_buffer_size(cfg.write_buffer_size);
        }
        stream.set_device(device).await;
        let stream = Arc::new(stream);
        *self.inner.stream.lock().unwrap() = Some(Arc::clone(&stream));

        if let Some(task) = self.inner.pump_task.lock().unwrap().take() {
            task.abort();
        }
        *self.inner.pump_task.lock().unwrap() = Some(self.spawn_pump(events_rx));

        self.set_state(ConnectionState::Connected);
        *self.inner.last_error.lock().unwrap() = (ConnectionError::NoError, String::new());
        true
    }

    fn fail(&self, kind: ConnectionError, detail: String) {
        *self.inner.last_error.lock().unwrap() = (kind, detail.clone());
        let _ = self.inner.events_tx.send(ConnectionEvent::Error(kind, detail));
        self.set_state(ConnectionState::Unconnected);
    }

    fn set_state(&self, state: ConnectionState) {
        *self.inner.state.lock().unwrap() = state;
        let _ = self.inner.events_tx.send(ConnectionEvent::StateChanged(state));
    }

    fn spawn_pump(&self, mut events_rx: mpsc::UnboundedReceiver<StreamEvent>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    StreamEvent::ReadyReadMessage => this.try_pump(),
                    StreamEvent::Disconnected => {
                        this.on_disconnect();
                        break;
                    }
                    StreamEvent::BytesWritten(_) | StreamEvent::ReadBufferOverflow { .. } => {}
                }
            }
        })
    }

    fn on_disconnect(&self) {
        self.set_state(ConnectionState::Connecting);
        if self.inner.explicit_disconnect.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Unconnected);
            return;
        }
        let auto = self.inner.config.lock().unwrap().auto_reconnect_enabled;
        if !auto {
            self.set_state(ConnectionState::Unconnected);
            return;
        }
        let target = self.inner.last_target.lock().unwrap().clone();
        let Some(target) = target else {
            self.set_state(ConnectionState::Unconnected);
            return;
        };
        let this = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(RECONNECT_DELAY).await;
            if this.inner.explicit_disconnect.load(Ordering::SeqCst) {
                return;
            }
            this.connect_target(target).await;
        });
        *self.inner.reconnect_task.lock().unwrap() = Some(handle);
    }

    /// If the router's single slot is empty and Stream has a decoded
    /// message waiting, move it into the slot and wake whichever endpoint
    /// it resolves to. Called both from the Stream-event pump and directly
    /// by an Endpoint after it drains its slot, so a queued second message
    /// is delivered without waiting for another `ReadyReadMessage` event.
    fn try_pump(&self) {
        let Some(stream) = self.inner.stream.lock().unwrap().clone() else { return };
        let destination = {
            let mut router = self.inner.router.lock().unwrap();
            if router.has_pending() {
                return;
            }
            if !stream.message_available() {
                return;
            }
            let msg = stream.read_message();
            router.fill(msg)
        };
        self.wake(&destination);
    }

    fn wake(&self, name: &str) {
        let wakers = self.inner.wakers.lock().unwrap();
        if let Some(senders) = wakers.get(name) {
            for tx in senders {
                let _ = tx.send(());
            }
        }
    }

    pub(crate) fn register_waker(&self, name: &str, tx: mpsc::UnboundedSender<()>) {
        self.inner.wakers.lock().unwrap().entry(name.to_owned()).or_default().push(tx);
    }

    pub(crate) fn router_message_available(&self, name: &str) -> bool {
        self.try_pump();
        self.inner.router.lock().unwrap().message_available(name)
    }

    pub(crate) fn router_take(&self, name: &str) -> Option<crate::value::Message> {
        self.try_pump();
        let msg = self.inner.router.lock().unwrap().take_if(name);
        self.try_pump();
        msg
    }

    pub(crate) async fn send_via_stream(&self, obj: &JsonValue) -> bool {
        let stream = self.inner.stream.lock().unwrap().clone();
        match stream {
            Some(s) => s.send(obj).await,
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_stream_for_test(&self, stream: Stream) {
        *self.inner.stream.lock().unwrap() = Some(Arc::new(stream));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockByteStream;
    use serde_json::json;

    #[tokio::test]
    async fn connect_via_injected_device_and_routes_to_named_endpoint() {
        let (conn, _events) = Connection::new(ConnectionConfig::default());
        let a = conn.add_endpoint("a");
        let default_ep = conn.default_endpoint();

        let (dev_client, dev_peer) = MockByteStream::pair(4096);
        let (mut peer_stream, _peer_events) = Stream::new();
        peer_stream.set_device(Box::new(dev_peer)).await;

        {
            let mut stream = Stream::new().0;
            stream.set_device(Box::new(dev_client)).await;
            conn.set_stream_for_test(stream);
            let (_tx, rx) = mpsc::unbounded_channel();
            *conn.inner.pump_task.lock().unwrap() = Some(conn.spawn_pump(rx));
            conn.set_state(ConnectionState::Connected);
        }

        assert!(peer_stream.send(&json!({"endpoint": "a", "n": 1})).await);
        assert!(peer_stream.send(&json!({"n": 3})).await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        conn.try_pump();

        assert!(a.message_available());
        assert_eq!(a.read_message().get("n").unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(default_ep.message_available());
        assert_eq!(default_ep.read_message().get("n").unwrap(), 3);
    }
}

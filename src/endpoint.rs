//! Component G: [`Endpoint`] — a named send/receive handle multiplexed
//! over one [`Connection`] (spec.md §4.G).

use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::router::DEFAULT_ENDPOINT;
use crate::value::{self, JsonValue, Message};

/// A named handle bound to a [`Connection`]. Adding an endpoint sets its
/// parent; an `Endpoint` dropped without being removed from the Connection
/// simply stops being woken — it still exists in the routing table until
/// [`Connection::remove_endpoint`] is called explicitly.
pub struct Endpoint {
    name: String,
    connection: Connection,
    wake_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<()>>,
}

impl Endpoint {
    pub(crate) fn new(name: String, connection: Connection) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        connection.register_waker(&name, tx);
        Endpoint { name, connection, wake_rx: tokio::sync::Mutex::new(rx) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_ENDPOINT
    }

    /// Send `obj` through the owning Connection's Stream. Non-default
    /// endpoints stamp their name into the configured endpoint key first,
    /// so a peer-side router delivers a reply to the matching endpoint.
    pub async fn send(&self, obj: &JsonValue) -> bool {
        if self.is_default() {
            self.connection.send_via_stream(obj).await
        } else {
            let key = self.connection.endpoint_key();
            let tagged = value::value_with_key(obj, &key, JsonValue::String(self.name.clone()));
            self.connection.send_via_stream(&tagged).await
        }
    }

    pub fn message_available(&self) -> bool {
        self.connection.router_message_available(&self.name)
    }

    /// Returns the pending message for this endpoint, or an empty object
    /// if none is available. Mirrors `FramingBuffer::read_message`'s
    /// never-block contract.
    pub fn read_message(&self) -> Message {
        self.connection.router_take(&self.name).unwrap_or_else(crate::value::empty_message)
    }

    /// Wait until `ready_read_message` fires for this endpoint. Delivery
    /// is non-recursive: callers must drain with `while message_available()`
    /// after waking, exactly as spec.md §4.G requires.
    pub async fn ready_read_message(&self) {
        let mut rx = self.wake_rx.lock().await;
        rx.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ConnectionConfig};
    use crate::device::mock::MockByteStream;
    use crate::stream::Stream;
    use serde_json::json;

    #[tokio::test]
    async fn endpoint_send_tags_message_with_its_name() {
        let (conn, _events) = Connection::new(ConnectionConfig::default());
        let ep = conn.add_endpoint("chat");

        let (dev_client, dev_peer) = MockByteStream::pair(4096);
        let (mut peer_stream, _peer_events) = Stream::new();
        peer_stream.set_device(Box::new(dev_peer)).await;

        let mut client_stream = Stream::new().0;
        client_stream.set_device(Box::new(dev_client)).await;
        conn.set_stream_for_test(client_stream);

        assert!(ep.send(&json!({"text": "hi"})).await);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(peer_stream.message_available());
        let received = peer_stream.read_message();
        assert_eq!(received.get("endpoint").unwrap(), "chat");
        assert_eq!(received.get("text").unwrap(), "hi");
    }
}

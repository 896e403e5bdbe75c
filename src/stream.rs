//! Component C: [`Stream`] — pairs a [`ByteStream`] device with a
//! [`FramingBuffer`] + codec, enforcing the read/write buffer caps from
//! spec.md §4.C.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::codec;
use crate::device::{ByteStream, PeerCredentials};
use crate::format::Format;
use crate::framing::FramingBuffer;
use crate::value::{JsonValue, Message};

/// spec.md §4.C's `last_error` taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("no error")]
    NoError,
    #[error("write failed: no connection")]
    WriteFailedNoConnection,
    #[error("read buffer size exceeded")]
    MaxReadBufferSizeExceeded,
    #[error("write buffer size exceeded")]
    MaxWriteBufferSizeExceeded,
    #[error("write failed")]
    WriteFailed,
    #[error("write returned zero")]
    WriteFailedReturnedZero,
}

/// Notifications a [`Stream`] emits, replacing the original signal/slot
/// surface with an explicit channel (spec.md §9 design note).
#[derive(Debug)]
pub enum StreamEvent {
    /// At least one full message remains unread (spec.md §4.C
    /// `ready_read_message`, fired at most once per turn).
    ReadyReadMessage,
    /// Forwarded from the device (spec.md §4.C `bytes_written`).
    BytesWritten(usize),
    /// Incoming bytes would push the unread buffer over the cap while the
    /// in-flight message is still incomplete (spec.md §4.C
    /// `read_buffer_overflow`). A listener may call
    /// [`Stream::set_read_buffer_size`] and then send on `ack` before the
    /// short grace window elapses to avert the close.
    ReadBufferOverflow { extra_bytes: usize, ack: oneshot::Sender<()> },
    /// The device was closed, locally or by the peer.
    Disconnected,
}

const READ_CHUNK: usize = 4096;
const OVERFLOW_GRACE: Duration = Duration::from_millis(50);

struct Shared {
    inbound: FramingBuffer,
    last_error: StreamError,
}

/// Wraps a [`ByteStream`] device with framing, buffer caps, and
/// notification channels.
pub struct Stream {
    device: Arc<AsyncMutex<Option<Box<dyn ByteStream>>>>,
    shared: Arc<StdMutex<Shared>>,
    outbound_format: Arc<StdMutex<Format>>,
    read_buffer_size: Arc<AtomicUsize>,
    write_buffer_size: Arc<AtomicUsize>,
    bytes_to_write: Arc<AtomicUsize>,
    events_tx: mpsc::UnboundedSender<StreamEvent>,
    read_task: Option<JoinHandle<()>>,
    peer_credentials: Option<PeerCredentials>,
    open: Arc<std::sync::atomic::AtomicBool>,
}

impl Stream {
    /// Construct a `Stream` with no device yet attached.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let stream = Stream {
            device: Arc::new(AsyncMutex::new(None)),
            shared: Arc::new(StdMutex::new(Shared {
                inbound: FramingBuffer::new(),
                last_error: StreamError::NoError,
            })),
            outbound_format: Arc::new(StdMutex::new(Format::Undefined)),
            read_buffer_size: Arc::new(AtomicUsize::new(0)),
            write_buffer_size: Arc::new(AtomicUsize::new(0)),
            bytes_to_write: Arc::new(AtomicUsize::new(0)),
            events_tx,
            read_task: None,
            peer_credentials: None,
            open: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };
        (stream, events_rx)
    }

    /// Attach a device and start its background read loop, replacing any
    /// previous device.
    pub async fn set_device(&mut self, device: Box<dyn ByteStream>) {
        self.peer_credentials = device.peer_credentials();
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        {
            let mut slot = self.device.lock().await;
            *slot = Some(device);
        }
        self.shared.lock().unwrap().inbound.clear();
        self.open.store(true, Ordering::SeqCst);
        self.read_task = Some(self.spawn_read_loop());
    }

    pub fn peer_credentials(&self) -> Option<PeerCredentials> {
        self.peer_credentials
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// True once the device has closed and no unread message remains.
    pub fn at_end(&self) -> bool {
        !self.is_open() && !self.shared.lock().unwrap().inbound.message_available()
    }

    pub fn format(&self) -> Format {
        self.shared.lock().unwrap().inbound.format()
    }

    pub fn last_error(&self) -> StreamError {
        self.shared.lock().unwrap().last_error
    }

    pub fn set_read_buffer_size(&self, n: usize) {
        self.read_buffer_size.store(n, Ordering::SeqCst);
    }

    pub fn set_write_buffer_size(&self, n: usize) {
        self.write_buffer_size.store(n, Ordering::SeqCst);
    }

    pub fn bytes_to_write(&self) -> usize {
        self.bytes_to_write.load(Ordering::SeqCst)
    }

    pub fn message_available(&self) -> bool {
        self.shared.lock().unwrap().inbound.message_available()
    }

    pub fn read_message(&self) -> Message {
        self.shared.lock().unwrap().inbound.read_message()
    }

    /// Encode and send `obj`. Returns `false` (with `last_error` set) if
    /// the stream isn't open, the write-buffer cap would be exceeded, or
    /// the device write fails (spec.md §4.C, testable property 7).
    pub async fn send(&self, obj: &JsonValue) -> bool {
        if !self.is_open() {
            self.set_error(StreamError::WriteFailedNoConnection);
            return false;
        }

        let format = {
            let mut guard = self.outbound_format.lock().unwrap();
            let resolved = codec::resolve_outbound_format(*guard);
            *guard = resolved;
            resolved
        };

        let bytes = match codec::encode(obj, format) {
            Ok(b) => b,
            Err(_) => {
                self.set_error(StreamError::WriteFailed);
                return false;
            }
        };

        let cap = self.write_buffer_size.load(Ordering::SeqCst);
        if cap > 0 {
            let current = self.bytes_to_write.load(Ordering::SeqCst);
            if current + bytes.len() > cap {
                self.set_error(StreamError::MaxWriteBufferSizeExceeded);
                return false;
            }
        }

        self.bytes_to_write.fetch_add(bytes.len(), Ordering::SeqCst);
        let len = bytes.len();
        let result = {
            let mut slot = self.device.lock().await;
            match slot.as_mut() {
                Some(device) => device.write_all(&bytes).await,
                None => {
                    self.bytes_to_write.fetch_sub(len, Ordering::SeqCst);
                    self.set_error(StreamError::WriteFailedNoConnection);
                    return false;
                }
            }
        };
        self.bytes_to_write.fetch_sub(len, Ordering::SeqCst);

        match result {
            Ok(()) => {
                self.set_error(StreamError::NoError);
                let _ = self.events_tx.send(StreamEvent::BytesWritten(len));
                true
            }
            Err(_) => {
                self.set_error(StreamError::WriteFailed);
                false
            }
        }
    }

    fn set_error(&self, err: StreamError) {
        self.shared.lock().unwrap().last_error = err;
    }

    fn spawn_read_loop(&self) -> JoinHandle<()> {
        let device = Arc::clone(&self.device);
        let shared = Arc::clone(&self.shared);
        let read_buffer_size = Arc::clone(&self.read_buffer_size);
        let events_tx = self.events_tx.clone();
        let open = Arc::clone(&self.open);

        tokio::spawn(async move {
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                let read_result = {
                    let mut slot = device.lock().await;
                    match slot.as_mut() {
                        Some(d) => d.read(&mut chunk).await,
                        None => break,
                    }
                };

                match read_result {
                    Ok(0) => {
                        open.store(false, Ordering::SeqCst);
                        let _ = events_tx.send(StreamEvent::Disconnected);
                        break;
                    }
                    Ok(n) => {
                        let cap = read_buffer_size.load(Ordering::SeqCst);
                        let (message_ready, overflow) = {
                            let mut guard = shared.lock().unwrap();
                            let buffered_before = guard.inbound.buffered_len();
                            let would_overflow =
                                cap > 0 && buffered_before + n > cap && !guard.inbound.message_available();
                            if would_overflow {
                                (false, Some(buffered_before + n - cap))
                            } else {
                                let outcome = guard.inbound.append(&chunk[..n]);
                                (outcome.message_ready, None)
                            }
                        };

                        if let Some(extra) = overflow {
                            let (ack_tx, ack_rx) = oneshot::channel();
                            let _ = events_tx
                                .send(StreamEvent::ReadBufferOverflow { extra_bytes: extra, ack: ack_tx });
                            let _ = tokio::time::timeout(OVERFLOW_GRACE, ack_rx).await;

                            let cap_after = read_buffer_size.load(Ordering::SeqCst);
                            let still_over = {
                                let guard = shared.lock().unwrap();
                                cap_after > 0 && guard.inbound.buffered_len() + n > cap_after
                            };
                            if still_over {
                                shared.lock().unwrap().last_error = StreamError::MaxReadBufferSizeExceeded;
                                let mut slot = device.lock().await;
                                *slot = None;
                                open.store(false, Ordering::SeqCst);
                                let _ = events_tx.send(StreamEvent::Disconnected);
                                break;
                            }
                            // Listener raised the cap in time; append now.
                            let outcome = shared.lock().unwrap().inbound.append(&chunk[..n]);
                            if outcome.message_ready {
                                let _ = events_tx.send(StreamEvent::ReadyReadMessage);
                            }
                            continue;
                        }

                        if message_ready {
                            let _ = events_tx.send(StreamEvent::ReadyReadMessage);
                        }
                    }
                    Err(_) => {
                        open.store(false, Ordering::SeqCst);
                        let _ = events_tx.send(StreamEvent::Disconnected);
                        break;
                    }
                }
            }
        })
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockByteStream;
    use serde_json::json;

    #[tokio::test]
    async fn send_and_receive_round_trip() {
        let (mut a, _a_events) = Stream::new();
        let (mut b, mut b_events) = Stream::new();
        let (dev_a, dev_b) = MockByteStream::pair(4096);
        a.set_device(Box::new(dev_a)).await;
        b.set_device(Box::new(dev_b)).await;

        assert!(a.send(&json!({"hello": "world"})).await);

        let evt = b_events.recv().await.expect("event");
        assert!(matches!(evt, StreamEvent::ReadyReadMessage));
        assert!(b.message_available());
        let msg = b.read_message();
        assert_eq!(msg.get("hello").unwrap(), "world");
    }

    #[tokio::test]
    async fn send_on_unopened_stream_fails() {
        let (stream, _events) = Stream::new();
        assert!(!stream.send(&json!({"a": 1})).await);
        assert_eq!(stream.last_error(), StreamError::WriteFailedNoConnection);
    }

    #[tokio::test]
    async fn write_buffer_cap_rejects_oversized_send() {
        let (mut a, _a_events) = Stream::new();
        let (dev_a, _dev_b) = MockByteStream::pair(4096);
        a.set_device(Box::new(dev_a)).await;
        a.set_write_buffer_size(4);

        let before = a.bytes_to_write();
        assert!(!a.send(&json!({"a": 1})).await);
        assert_eq!(a.last_error(), StreamError::MaxWriteBufferSizeExceeded);
        assert_eq!(a.bytes_to_write(), before);
    }

    #[tokio::test]
    async fn disconnect_is_observed_on_peer_drop() {
        let (mut a, mut a_events) = Stream::new();
        let (dev_a, dev_b) = MockByteStream::pair(4096);
        a.set_device(Box::new(dev_a)).await;
        drop(dev_b);

        let evt = a_events.recv().await.expect("event");
        assert!(matches!(evt, StreamEvent::Disconnected));
        assert!(!a.is_open());
    }
}

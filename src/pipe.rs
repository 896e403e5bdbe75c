//! Component D: [`Pipe`] — the same framing/codec contract as
//! [`crate::stream::Stream`], but over a pair of unidirectional,
//! level-triggered file descriptors (spec.md §4.D) instead of a single
//! bidirectional [`crate::device::ByteStream`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};

use crate::codec;
use crate::format::Format;
use crate::framing::FramingBuffer;
use crate::value::{JsonValue, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    #[error("no error")]
    NoError,
    #[error("write failed")]
    WriteFailed,
    #[error("write end closed")]
    WriteAtEnd,
    #[error("read failed")]
    ReadFailed,
    #[error("read end closed")]
    ReadAtEnd,
}

#[derive(Debug)]
pub enum PipeEvent {
    ReadyReadMessage,
    BytesWritten(usize),
}

const READ_CHUNK: usize = 4096;

struct Shared {
    inbound: FramingBuffer,
    last_error: PipeError,
}

/// A one-message-at-a-time duplex channel over two independent half-duplex
/// fds, for the "local in-process pipe" transport spec.md §4.D describes
/// (e.g. talking to a child process over stdio-style descriptors).
pub struct Pipe<R, W> {
    reader: Arc<AsyncMutex<Option<R>>>,
    writer: Arc<AsyncMutex<Option<W>>>,
    shared: Arc<StdMutex<Shared>>,
    outbound_format: Arc<StdMutex<Format>>,
    events_tx: mpsc::UnboundedSender<PipeEvent>,
    write_done: Arc<Notify>,
    bytes_written_total: Arc<AtomicUsize>,
    read_task: Option<tokio::task::JoinHandle<()>>,
}

impl<R, W> Pipe<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> (Self, mpsc::UnboundedReceiver<PipeEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut pipe = Pipe {
            reader: Arc::new(AsyncMutex::new(Some(reader))),
            writer: Arc::new(AsyncMutex::new(Some(writer))),
            shared: Arc::new(StdMutex::new(Shared {
                inbound: FramingBuffer::new(),
                last_error: PipeError::NoError,
            })),
            outbound_format: Arc::new(StdMutex::new(Format::Undefined)),
            events_tx,
            write_done: Arc::new(Notify::new()),
            bytes_written_total: Arc::new(AtomicUsize::new(0)),
            read_task: None,
        };
        pipe.read_task = Some(pipe.spawn_read_loop());
        (pipe, events_rx)
    }

    pub fn last_error(&self) -> PipeError {
        self.shared.lock().unwrap().last_error
    }

    pub fn message_available(&self) -> bool {
        self.shared.lock().unwrap().inbound.message_available()
    }

    pub fn read_message(&self) -> Message {
        self.shared.lock().unwrap().inbound.read_message()
    }

    pub async fn send(&self, obj: &JsonValue) -> bool {
        let format = {
            let mut guard = self.outbound_format.lock().unwrap();
            let resolved = codec::resolve_outbound_format(*guard);
            *guard = resolved;
            resolved
        };
        let bytes = match codec::encode(obj, format) {
            Ok(b) => b,
            Err(_) => {
                self.shared.lock().unwrap().last_error = PipeError::WriteFailed;
                return false;
            }
        };
        let len = bytes.len();

        let mut slot = self.writer.lock().await;
        let Some(writer) = slot.as_mut() else {
            self.shared.lock().unwrap().last_error = PipeError::WriteAtEnd;
            return false;
        };
        match writer.write_all(&bytes).await {
            Ok(()) => {
                self.shared.lock().unwrap().last_error = PipeError::NoError;
                self.bytes_written_total.fetch_add(len, Ordering::SeqCst);
                self.write_done.notify_waiters();
                let _ = self.events_tx.send(PipeEvent::BytesWritten(len));
                true
            }
            Err(_) => {
                *slot = None;
                self.shared.lock().unwrap().last_error = PipeError::WriteFailed;
                false
            }
        }
    }

    /// Block (with a timeout) until the total bytes written across the
    /// lifetime of this pipe advances, for callers that need level-triggered
    /// flush confirmation rather than a per-call future (spec.md §4.D).
    pub async fn wait_for_bytes_written(&self, timeout_ms: u64) -> bool {
        tokio::time::timeout(Duration::from_millis(timeout_ms), self.write_done.notified())
            .await
            .is_ok()
    }

    fn spawn_read_loop(&self) -> tokio::task::JoinHandle<()> {
        let reader = Arc::clone(&self.reader);
        let shared = Arc::clone(&self.shared);
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                let result = {
                    let mut slot = reader.lock().await;
                    match slot.as_mut() {
                        Some(r) => r.read(&mut chunk).await,
                        None => break,
                    }
                };
                match result {
                    Ok(0) => {
                        shared.lock().unwrap().last_error = PipeError::ReadAtEnd;
                        let mut slot = reader.lock().await;
                        *slot = None;
                        break;
                    }
                    Ok(n) => {
                        let outcome = shared.lock().unwrap().inbound.append(&chunk[..n]);
                        if outcome.message_ready {
                            let _ = events_tx.send(PipeEvent::ReadyReadMessage);
                        }
                    }
                    Err(_) => {
                        shared.lock().unwrap().last_error = PipeError::ReadFailed;
                        let mut slot = reader.lock().await;
                        *slot = None;
                        break;
                    }
                }
            }
        })
    }
}

impl<R, W> Drop for Pipe<R, W> {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

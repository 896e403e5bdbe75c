//! The `ByteStream` device contract (spec.md §6) that [`crate::stream::Stream`]
//! and [`crate::pipe::Pipe`] are generic over, plus the two concrete
//! implementations (TCP, Unix-domain local socket) and the peer-credential
//! lookup spec.md §9 calls out as its own small OS abstraction.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

/// Effective uid/pid of the peer on a connected local socket (spec.md §6).
/// `None` on transports that don't expose credentials (TCP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub uid: u32,
    pub pid: u32,
}

/// A bidirectional byte-stream device. [`crate::stream::Stream`] is generic
/// over this trait so the same framing/routing logic drives TCP, Unix
/// sockets, or (in tests) an in-memory duplex pipe.
#[async_trait]
pub trait ByteStream: Send + Sync {
    /// Write `bytes` in full. Mirrors spec.md §6's `write(bytes) -> n_or_error`
    /// collapsed to "all or error", which is what `Stream::send` needs.
    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Read whatever is available into `buf`, returning the number of bytes
    /// read. `Ok(0)` signals the peer closed the stream (spec.md §6
    /// `disconnected`).
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Effective peer credentials, when the transport supports them
    /// (spec.md §6 `peer_credentials()`; local sockets only).
    fn peer_credentials(&self) -> Option<PeerCredentials> {
        None
    }
}

#[async_trait]
impl ByteStream for TcpStream {
    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        AsyncWriteExt::write_all(self, bytes).await
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }
}

#[async_trait]
impl ByteStream for UnixStream {
    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        AsyncWriteExt::write_all(self, bytes).await
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }

    fn peer_credentials(&self) -> Option<PeerCredentials> {
        crate::peer_creds::from_unix_stream(self)
    }
}

/// A pair of in-memory duplex halves used as a [`ByteStream`] in tests,
/// standing in for the `rt-test-utils::MockWsClient` role in the teacher
/// repository. Only built with the `test-support` feature, matching
/// `ipico-core`'s own `test-support` gate in the teacher workspace.
#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use tokio::io::DuplexStream;

    pub struct MockByteStream {
        inner: DuplexStream,
        credentials: Option<PeerCredentials>,
    }

    impl MockByteStream {
        /// Create a connected pair of mock devices with the given
        /// in-flight buffer capacity.
        pub fn pair(buffer: usize) -> (MockByteStream, MockByteStream) {
            let (a, b) = tokio::io::duplex(buffer);
            (
                MockByteStream { inner: a, credentials: None },
                MockByteStream { inner: b, credentials: None },
            )
        }

        pub fn with_credentials(mut self, credentials: PeerCredentials) -> Self {
            self.credentials = Some(credentials);
            self
        }
    }

    #[async_trait]
    impl ByteStream for MockByteStream {
        async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
            AsyncWriteExt::write_all(&mut self.inner, bytes).await
        }

        async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            AsyncReadExt::read(&mut self.inner, buf).await
        }

        fn peer_credentials(&self) -> Option<PeerCredentials> {
            self.credentials
        }
    }
}

//! TCP connector that stamps every new connection with a unique id
//!
//! The id travels to each response as a [`ConnectionId`] extension, so the
//! pool can tell a reused connection from a new one even when the OS hands
//! a fresh socket a previously used local port.

use hyper::rt::{Read, ReadBufCursor, Write};
use hyper::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tower::Service;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Identity of one transport connection within an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// [`HttpConnector`] wrapper that numbers the connections it opens
#[derive(Clone)]
pub struct TrackedConnector {
    http: HttpConnector,
    next_id: Arc<AtomicU64>,
}

impl TrackedConnector {
    pub fn new(http: HttpConnector) -> Self {
        Self {
            http,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of connections opened so far
    pub fn opened(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }
}

impl Service<Uri> for TrackedConnector {
    type Response = TrackedStream;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<TrackedStream, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.http.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let connecting = self.http.call(dst);
        let next_id = Arc::clone(&self.next_id);

        Box::pin(async move {
            let io = connecting.await?;
            let id = ConnectionId(next_id.fetch_add(1, Ordering::SeqCst));
            Ok(TrackedStream { io, id })
        })
    }
}

/// A TCP stream carrying its [`ConnectionId`]
pub struct TrackedStream {
    io: TokioIo<TcpStream>,
    id: ConnectionId,
}

impl TrackedStream {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Connection for TrackedStream {
    fn connected(&self) -> Connected {
        self.io.connected().extra(self.id)
    }
}

impl Read for TrackedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_read(cx, buf)
    }
}

impl Write for TrackedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.io.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write_vectored(cx, bufs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_each_connection_gets_a_new_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let mut connector = TrackedConnector::new(HttpConnector::new());
        let uri: Uri = format!("http://{}/", addr).parse().unwrap();

        let first = connector.call(uri.clone()).await.unwrap();
        let second = connector.call(uri).await.unwrap();

        assert_eq!(first.id(), ConnectionId(0));
        assert_eq!(second.id(), ConnectionId(1));
        assert_eq!(connector.opened(), 2);

        let mut extensions = hyper::http::Extensions::new();
        second.connected().get_extras(&mut extensions);
        assert_eq!(extensions.get::<ConnectionId>(), Some(&ConnectionId(1)));
    }
}

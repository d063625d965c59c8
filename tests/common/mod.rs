//! In-process HTTP servers for integration tests
//!
//! [`TestServer`] speaks HTTP/1.1 over plain TCP, [`TlsTestServer`] speaks
//! h2 over TLS (ALPN `h2` only) with the `tests/fixtures/localhost` pair.
//!
//! Routes:
//! - `/slow` answers after 300ms
//! - `/close` answers with `connection: close`
//! - `/status/<code>` answers with that status
//! - anything else answers 200 with a JSON echo of the request

#![allow(dead_code)]

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::{http1, http2};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// What the server saw for one request
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

#[derive(Default)]
struct State {
    hits: AtomicUsize,
    connections: AtomicUsize,
    requests: Mutex<Vec<SeenRequest>>,
}

pub struct TestServer {
    pub addr: SocketAddr,
    state: Arc<State>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State::default());

        let accept_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(req, Arc::clone(&state)));
                    let _ = http1::Builder::new()
                        .keep_alive(true)
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// `host:port`, used as the request hostname
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// Accepted TCP connections
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<SeenRequest> {
        self.state.requests.lock().unwrap().last().cloned()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle(
    req: Request<Incoming>,
    state: Arc<State>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let headers = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body = req
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    state.requests.lock().unwrap().push(SeenRequest {
        method: method.clone(),
        path: path.clone(),
        headers,
        body: body.clone(),
    });

    if path == "/slow" {
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    let status = path
        .strip_prefix("/status/")
        .and_then(|code| code.parse::<u16>().ok())
        .unwrap_or(200);

    let echo = serde_json::json!({
        "method": method,
        "path": path,
        "body_len": body.len(),
    });

    let mut response = Response::builder()
        .status(status)
        .header("content-type", "application/json");
    if path == "/close" {
        response = response.header("connection", "close");
    }
    Ok(response
        .body(Full::new(Bytes::from(echo.to_string())))
        .unwrap())
}

/// h2-only TLS server with a self-signed `localhost` certificate
pub struct TlsTestServer {
    pub addr: SocketAddr,
    state: Arc<State>,
    handle: JoinHandle<()>,
}

impl TlsTestServer {
    pub async fn spawn() -> Self {
        let identity = native_tls::Identity::from_pkcs8(
            include_bytes!("../fixtures/localhost.crt"),
            include_bytes!("../fixtures/localhost.key"),
        )
        .unwrap();
        let acceptor = native_tls::TlsAcceptor::builder(identity)
            .accept_alpn(&["h2"])
            .build()
            .unwrap();
        let acceptor = tokio_native_tls::TlsAcceptor::from(acceptor);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State::default());

        let accept_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = Arc::clone(&accept_state);
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(tls) = acceptor.accept(stream).await else {
                        return;
                    };
                    let service = service_fn(move |req| handle(req, Arc::clone(&state)));
                    let _ = http2::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(tls), service)
                        .await;
                });
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

impl Drop for TlsTestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// An address nothing is listening on
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

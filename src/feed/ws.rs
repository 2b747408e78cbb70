//! Websocket transport over blocking `tungstenite`.
//!
//! Each session owns a reader thread. The socket gets a short read timeout
//! so the thread can notice a close request between reads; text frames are
//! handed to the async side over a bounded channel.

use super::{ConnectionError, FeedSession, FeedTransport};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::client::Request;
use tungstenite::http::{HeaderName, HeaderValue};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

const READ_TIMEOUT: Duration = Duration::from_millis(500);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const FRAME_BUFFER: usize = 256;

type Frame = Result<String, ConnectionError>;

pub struct WsTransport {
    url: String,
    headers: BTreeMap<String, String>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, headers: BTreeMap<String, String>) -> Self {
        Self {
            url: url.into(),
            headers,
        }
    }
}

/// Handshake request for `url` carrying the configured headers.
pub fn build_request(url: &str, headers: &BTreeMap<String, String>) -> Result<Request, ConnectionError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ConnectionError::Request(e.to_string()))?;
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ConnectionError::Request(format!("header {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ConnectionError::Request(format!("header {}: {}", name, e)))?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

/// Host and port the handshake request points at, with the scheme's default port.
fn endpoint(request: &Request) -> Result<(String, u16), ConnectionError> {
    let uri = request.uri();
    let host = uri
        .host()
        .ok_or_else(|| ConnectionError::Request(format!("no host in {}", uri)))?;
    let port = match (uri.port_u16(), uri.scheme_str()) {
        (Some(port), _) => port,
        (None, Some("wss")) => 443,
        (None, Some("ws")) => 80,
        (None, other) => {
            return Err(ConnectionError::Request(format!("unsupported scheme {:?}", other)));
        }
    };
    Ok((host.trim_matches(|c| c == '[' || c == ']').to_string(), port))
}

/// TCP connect bounded by `CONNECT_TIMEOUT` per resolved address.
fn open_stream(host: &str, port: u16) -> Result<TcpStream, ConnectionError> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| ConnectionError::Connect(format!("resolve {}: {}", host, e)))?;
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(ConnectionError::Connect(match last_err {
        Some(e) => format!("{}:{}: {}", host, port, e),
        None => format!("{} resolved to no addresses", host),
    }))
}

/// Connect and complete the websocket handshake without blocking indefinitely.
fn handshake(request: Request) -> Result<WebSocket<MaybeTlsStream<TcpStream>>, ConnectionError> {
    let (host, port) = endpoint(&request)?;
    let stream = open_stream(&host, port)?;
    stream
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
        .and_then(|_| stream.set_write_timeout(Some(HANDSHAKE_TIMEOUT)))
        .map_err(|e| ConnectionError::Connect(e.to_string()))?;
    let (socket, response) =
        tungstenite::client_tls(request, stream).map_err(|e| ConnectionError::Connect(e.to_string()))?;
    debug!("Feed: handshake status {}", response.status());
    Ok(socket)
}

fn set_read_timeout(socket: &WebSocket<MaybeTlsStream<TcpStream>>) -> std::io::Result<()> {
    match socket.get_ref() {
        MaybeTlsStream::Plain(s) => s.set_read_timeout(Some(READ_TIMEOUT)),
        MaybeTlsStream::Rustls(s) => s.get_ref().set_read_timeout(Some(READ_TIMEOUT)),
        _ => Ok(()),
    }
}

fn is_timeout(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::Io(e)
            if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
    )
}

fn read_loop(mut socket: WebSocket<MaybeTlsStream<TcpStream>>, tx: mpsc::Sender<Frame>, stop: Arc<AtomicBool>) {
    loop {
        if stop.load(Ordering::Acquire) {
            let _ = socket.close(None);
            let _ = socket.flush();
            break;
        }
        match socket.read() {
            Ok(Message::Text(text)) => {
                if tx.blocking_send(Ok(text.as_str().to_owned())).is_err() {
                    break;
                }
            }
            Ok(Message::Close(frame)) => {
                debug!("Feed: server closed session: {:?}", frame);
                break;
            }
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => break,
            Err(e) => {
                let _ = tx.blocking_send(Err(ConnectionError::Transport(e.to_string())));
                break;
            }
        }
    }
    debug!("Feed: reader thread exiting");
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn connect(&self) -> Result<Box<dyn FeedSession>, ConnectionError> {
        let request = build_request(&self.url, &self.headers)?;
        let socket = tokio::task::spawn_blocking(move || handshake(request))
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))??;

        if let Err(e) = set_read_timeout(&socket) {
            warn!("Feed: could not set read timeout: {}", e);
        }

        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        std::thread::Builder::new()
            .name("feed-reader".to_string())
            .spawn(move || read_loop(socket, tx, thread_stop))
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        Ok(Box::new(WsSession { rx, stop }))
    }
}

struct WsSession {
    rx: mpsc::Receiver<Frame>,
    stop: Arc<AtomicBool>,
}

#[async_trait]
impl FeedSession for WsSession {
    async fn next_frame(&mut self) -> Result<Option<String>, ConnectionError> {
        match self.rx.recv().await {
            Some(Ok(text)) => Ok(Some(text)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.rx.close();
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

//! WebSocket relay transport.
//!
//! The socket lives on a background thread; the session talks to it through
//! channels and drains inbound events with `poll_events`.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tungstenite::{connect, Message};
use url::Url;

use super::{Latency, PingFuture, PingResolver, Transport, TransportError, TransportFactory};
use crate::presence::User;
use crate::protocol::{Event, PingPayload, RelayFrame};

/// How long the socket thread blocks on a read before checking commands.
const READ_POLL: Duration = Duration::from_millis(50);

/// Derive the relay endpoint from a page origin: `http(s)://host` becomes
/// `ws(s)://host/ws`.
pub fn relay_url_from_origin(origin: &str) -> Result<String, TransportError> {
    let parsed = Url::parse(origin).map_err(|e| TransportError::InvalidOrigin(format!("{}: {}", origin, e)))?;
    let scheme = match parsed.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(TransportError::InvalidOrigin(format!("unsupported scheme {}", other))),
    };
    let host = parsed
        .host_str()
        .ok_or_else(|| TransportError::InvalidOrigin(format!("{} has no host", origin)))?;
    Ok(match parsed.port() {
        Some(port) => format!("{}://{}:{}/ws", scheme, host, port),
        None => format!("{}://{}/ws", scheme, host),
    })
}

/// Commands sent to the socket thread.
enum WsCommand {
    Send(String),
    Ping(PingResolver),
    Close,
}

/// A probe waiting for its pong.
struct PendingPing {
    t0: f64,
    started: Instant,
    resolver: PingResolver,
}

/// At most the first 100 characters of a frame, for logging.
fn truncated(frame: &str) -> &str {
    frame.char_indices().nth(100).map_or(frame, |(i, _)| &frame[..i])
}

fn epoch_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Opens [`RelayTransport`]s.
#[derive(Debug, Clone)]
pub struct RelayFactory {
    url: String,
    connect_timeout: Duration,
    ping_timeout: Duration,
}

impl RelayFactory {
    /// Connect to an explicit `ws://` or `wss://` URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(3),
            ping_timeout: Duration::from_secs(3),
        }
    }

    /// Connect to the relay serving `origin`.
    pub fn from_origin(origin: &str) -> Result<Self, TransportError> {
        Ok(Self::new(relay_url_from_origin(origin)?))
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl TransportFactory for RelayFactory {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn open(&self, _user: &User) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(RelayTransport::connect(
            &self.url,
            self.connect_timeout,
            self.ping_timeout,
        )?))
    }
}

/// Transport over a relay WebSocket.
pub struct RelayTransport {
    cmd_tx: Option<Sender<WsCommand>>,
    event_rx: Receiver<Event>,
    connected: Arc<Mutex<bool>>,
    _thread: Option<JoinHandle<()>>,
}

impl RelayTransport {
    /// Connect and wait for the handshake, giving up after `connect_timeout`.
    pub fn connect(url: &str, connect_timeout: Duration, ping_timeout: Duration) -> Result<Self, TransportError> {
        let parsed = Url::parse(url).map_err(|e| TransportError::Connect(format!("invalid URL: {}", e)))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(TransportError::Connect(format!(
                "invalid WebSocket URL scheme: {}",
                parsed.scheme()
            )));
        }

        let (cmd_tx, cmd_rx) = channel::<WsCommand>();
        let (event_tx, event_rx) = channel::<Event>();
        let (ready_tx, ready_rx) = channel::<Result<(), String>>();
        let connected = Arc::new(Mutex::new(false));

        let url = url.to_string();
        let thread_connected = connected.clone();
        let handle = thread::spawn(move || {
            log::info!("Relay thread: connecting to {}", url);
            let mut socket = match connect(&url) {
                Ok((socket, response)) => {
                    log::info!("Relay connected, status: {}", response.status());
                    socket
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };

            match socket.get_mut() {
                tungstenite::stream::MaybeTlsStream::Plain(tcp) => {
                    let _ = tcp.set_read_timeout(Some(READ_POLL));
                    let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
                }
                #[allow(unreachable_patterns)]
                _ => log::debug!("Non-plain relay stream, relying on default timeouts"),
            }

            set_flag(&thread_connected, true);
            // The caller gave up waiting; nobody will read from us.
            if ready_tx.send(Ok(())).is_err() {
                set_flag(&thread_connected, false);
                let _ = socket.close(None);
                return;
            }

            let mut pending: Option<PendingPing> = None;
            'session: loop {
                // Flush everything queued before blocking on the next read.
                loop {
                    match cmd_rx.try_recv() {
                        Ok(WsCommand::Send(msg)) => {
                            log::debug!("Relay sending: {}", truncated(&msg));
                            if let Err(e) = socket.send(Message::Text(msg)) {
                                log::error!("Relay send error: {}", e);
                                break 'session;
                            }
                        }
                        Ok(WsCommand::Ping(resolver)) => {
                            if let Some(stale) = pending.take() {
                                stale.resolver.resolve(Latency::Unknown);
                            }
                            let t0 = epoch_millis();
                            let sent = match Event::Ping(PingPayload { t0 }).to_json() {
                                Ok(json) => socket.send(Message::Text(json)).is_ok(),
                                Err(e) => {
                                    log::error!("Failed to serialize ping: {}", e);
                                    false
                                }
                            };
                            if sent {
                                pending = Some(PendingPing {
                                    t0,
                                    started: Instant::now(),
                                    resolver,
                                });
                            } else {
                                resolver.resolve(Latency::Unknown);
                            }
                        }
                        Ok(WsCommand::Close) => {
                            log::info!("Relay close requested");
                            let _ = socket.close(None);
                            break 'session;
                        }
                        Err(TryRecvError::Disconnected) => {
                            log::info!("Relay command channel disconnected");
                            break 'session;
                        }
                        Err(TryRecvError::Empty) => break,
                    }
                }

                if let Some(probe) = &pending {
                    if probe.started.elapsed() >= ping_timeout {
                        log::debug!("Ping timed out");
                        probe.resolver.resolve(Latency::Unknown);
                        pending = None;
                    }
                }

                match socket.read() {
                    Ok(Message::Text(txt)) => {
                        log::debug!("Relay received: {}", truncated(&txt));
                        let Some(event) = RelayFrame::parse(&txt) else {
                            continue 'session;
                        };
                        // Pongs answering other participants' probes are not ours.
                        if let Event::Pong(p) = &event {
                            if let Some(probe) = pending.take_if(|probe| probe.t0 == p.t0) {
                                let ms = probe.started.elapsed().as_secs_f64() * 1000.0;
                                probe.resolver.resolve(Latency::Millis(ms));
                            }
                        }
                        if event_tx.send(event).is_err() {
                            break 'session;
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = socket.send(Message::Pong(data));
                    }
                    Ok(Message::Close(_)) => {
                        log::info!("Relay sent close frame");
                        break;
                    }
                    Ok(_) => {}
                    Err(tungstenite::Error::Io(ref e))
                        if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        continue;
                    }
                    Err(e) => {
                        log::error!("Relay read error: {}", e);
                        break;
                    }
                }
            }

            if let Some(probe) = pending.take() {
                probe.resolver.resolve(Latency::Unknown);
            }
            set_flag(&thread_connected, false);
            log::info!("Relay thread exiting");
        });

        match ready_rx.recv_timeout(connect_timeout) {
            Ok(Ok(())) => Ok(Self {
                cmd_tx: Some(cmd_tx),
                event_rx,
                connected,
                _thread: Some(handle),
            }),
            Ok(Err(message)) => Err(TransportError::Connect(message)),
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TransportError::Connect("relay thread exited during handshake".into()))
            }
        }
    }

    /// Whether the socket is still open.
    pub fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn set_flag(flag: &Mutex<bool>, value: bool) {
    *flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
}

impl Transport for RelayTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn send(&self, event: &Event) {
        let Some(tx) = &self.cmd_tx else {
            return;
        };
        match event.to_json() {
            Ok(json) => {
                if tx.send(WsCommand::Send(json)).is_err() {
                    log::debug!("Relay thread gone, dropping {}", event.kind());
                }
            }
            Err(e) => log::error!("Failed to serialize {}: {}", event.kind(), e),
        }
    }

    fn poll_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn ping(&self) -> PingFuture {
        let (future, resolver) = PingFuture::pending();
        match &self.cmd_tx {
            Some(tx) => {
                if let Err(e) = tx.send(WsCommand::Ping(resolver)) {
                    if let WsCommand::Ping(resolver) = e.0 {
                        resolver.resolve(Latency::Unknown);
                    }
                }
            }
            None => resolver.resolve(Latency::Unknown),
        }
        future
    }

    fn close(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WsCommand::Close);
        }
        self._thread = None;
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        self.close();
    }
}

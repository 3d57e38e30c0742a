//! Multi-client frame broadcast server.
//!
//! Accepts framed-protocol connections, registers each client, and
//! fans encoded frames out through per-client bounded rings. The
//! server owns its own multi-thread Tokio runtime (half the cores) so
//! the capture and encode threads never touch the event loop; the
//! orchestrator drives it with plain blocking calls.
//!
//! Fan-out is serialized: [`BroadcastServer::push_frame`] (called only
//! by the encode thread) pushes into a single SPSC queue and a
//! dedicated fan-out task offers the frame to every client ring, so
//! each ring keeps exactly one producer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::config::NetworkConfig;
use crate::error::StreamError;
use crate::net::client::{ClientInfo, ClientSession, CONTROL_CHANNEL_CAPACITY};
use crate::net::wire::{Message, MessageKind, StreamCodec};
use crate::pipeline::pool::SharedFrame;
use crate::pipeline::spsc::SpscRing;
use crate::pipeline::stats::FpsCounter;

/// How long a new connection gets to complete the handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the queue between the encode thread and the fan-out
/// task.
const FANOUT_QUEUE_CAPACITY: usize = 8;

/// Callback fired on client connect/disconnect.
pub type ClientCallback = Arc<dyn Fn(ClientInfo) + Send + Sync>;

type FrameSink = SplitSink<Framed<TcpStream, StreamCodec>, Message>;
type FrameStream = SplitStream<Framed<TcpStream, StreamCodec>>;

/// Zero-copy adapter so a shared frame can ride inside [`Bytes`].
struct FramePayload(SharedFrame);

impl AsRef<[u8]> for FramePayload {
    fn as_ref(&self) -> &[u8] {
        &self.0.data
    }
}

// ── ServerStats ──────────────────────────────────────────────────

/// Aggregate server counters.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub connected_clients: u32,
    pub total_frames_sent: u64,
    pub total_bytes_sent: u64,
    pub current_fps: f64,
    pub avg_latency_ms: f64,
    pub uptime_seconds: f64,
}

impl ServerStats {
    /// Average outgoing bitrate since start, in megabits per second.
    pub fn avg_bitrate_mbps(&self) -> f64 {
        if self.uptime_seconds <= 0.0 {
            return 0.0;
        }
        (self.total_bytes_sent as f64 * 8.0) / (self.uptime_seconds * 1_000_000.0)
    }
}

// ── BroadcastServer ──────────────────────────────────────────────

struct ServerShared {
    config: NetworkConfig,
    clients: RwLock<HashMap<String, Arc<ClientSession>>>,
    running: AtomicBool,
    started: Instant,
    /// Encode thread -> fan-out task handoff.
    frame_queue: SpscRing<SharedFrame>,
    frame_notify: tokio::sync::Notify,
    frames_dropped: AtomicU64,
    total_frames_sent: AtomicU64,
    total_bytes_sent: AtomicU64,
    fps: Mutex<FpsCounter>,
    on_connect: Mutex<Option<ClientCallback>>,
    on_disconnect: Mutex<Option<ClientCallback>>,
}

impl ServerShared {
    fn fire_connect(&self, info: ClientInfo) {
        let cb = self.on_connect.lock().clone();
        if let Some(cb) = cb {
            cb(info);
        }
    }

    fn fire_disconnect(&self, info: ClientInfo) {
        let cb = self.on_disconnect.lock().clone();
        if let Some(cb) = cb {
            cb(info);
        }
    }
}

/// The broadcast stage: accepts clients and fans encoded frames out to
/// all of them with per-client backpressure.
pub struct BroadcastServer {
    shared: Arc<ServerShared>,
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
    local_addr: Mutex<Option<SocketAddr>>,
    server_ip: String,
}

impl BroadcastServer {
    pub fn new(config: NetworkConfig) -> Self {
        let server_ip = if config.static_ip.is_empty() {
            local_ip()
        } else {
            config.static_ip.clone()
        };

        Self {
            shared: Arc::new(ServerShared {
                config,
                clients: RwLock::new(HashMap::new()),
                running: AtomicBool::new(false),
                started: Instant::now(),
                frame_queue: SpscRing::new(FANOUT_QUEUE_CAPACITY),
                frame_notify: tokio::sync::Notify::new(),
                frames_dropped: AtomicU64::new(0),
                total_frames_sent: AtomicU64::new(0),
                total_bytes_sent: AtomicU64::new(0),
                fps: Mutex::new(FpsCounter::new()),
                on_connect: Mutex::new(None),
                on_disconnect: Mutex::new(None),
            }),
            runtime: Mutex::new(None),
            local_addr: Mutex::new(None),
            server_ip,
        }
    }

    /// Bind and start accepting clients.
    pub fn start(&self) -> Result<(), StreamError> {
        if self.shared.running.load(Ordering::Acquire) {
            return Ok(());
        }

        let workers = std::thread::available_parallelism()
            .map(|n| n.get() / 2)
            .unwrap_or(1)
            .max(1);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("stereocast-io")
            .enable_all()
            .build()?;

        let listener = runtime.block_on(TcpListener::bind((
            self.shared.config.host.as_str(),
            self.shared.config.port,
        )))?;
        *self.local_addr.lock() = Some(listener.local_addr()?);

        self.shared.running.store(true, Ordering::Release);

        runtime.spawn(accept_loop(Arc::clone(&self.shared), listener));
        runtime.spawn(fanout_loop(Arc::clone(&self.shared)));
        runtime.spawn(ping_loop(Arc::clone(&self.shared)));

        *self.runtime.lock() = Some(runtime);
        tracing::info!("stream server started on {}", self.connection_url());
        Ok(())
    }

    /// Close all clients and stop the I/O runtime. In-flight writes
    /// unwind through their completion paths.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }

        let sessions: Vec<Arc<ClientSession>> = {
            let mut clients = self.shared.clients.write();
            clients.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.closing.store(true, Ordering::Release);
            let _ = session.control_tx.try_send(Message::close());
            session.notify.notify_one();
        }

        // Unblock the fan-out task so it can observe the stop.
        self.shared.frame_notify.notify_one();

        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            runtime.shutdown_timeout(Duration::from_secs(1));
        }
        tracing::info!("stream server stopped");
    }

    /// Offer one encoded frame to every connected client.
    ///
    /// Called only by the encode thread; never blocks. A full queue
    /// means the frame is dropped and counted.
    pub fn push_frame(&self, frame: SharedFrame) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }

        self.shared.fps.lock().tick();

        if self.shared.frame_queue.try_push(frame).is_err() {
            self.shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
        } else {
            self.shared.frame_notify.notify_one();
        }
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> u32 {
        self.shared.clients.read().len() as u32
    }

    /// Snapshots of every connected client.
    pub fn clients(&self) -> Vec<ClientInfo> {
        self.shared
            .clients
            .read()
            .values()
            .map(|s| s.snapshot())
            .collect()
    }

    /// Aggregate counters.
    pub fn stats(&self) -> ServerStats {
        let (connected, avg_latency) = {
            let clients = self.shared.clients.read();
            let n = clients.len();
            let avg = if n > 0 {
                clients
                    .values()
                    .map(|s| *s.latency_ms.lock())
                    .sum::<f64>()
                    / n as f64
            } else {
                0.0
            };
            (n as u32, avg)
        };

        ServerStats {
            connected_clients: connected,
            total_frames_sent: self.shared.total_frames_sent.load(Ordering::Relaxed),
            total_bytes_sent: self.shared.total_bytes_sent.load(Ordering::Relaxed),
            current_fps: self.shared.fps.lock().fps(),
            avg_latency_ms: avg_latency,
            uptime_seconds: self.shared.started.elapsed().as_secs_f64(),
        }
    }

    /// Frames dropped because the fan-out queue was full.
    pub fn frames_dropped(&self) -> u64 {
        self.shared.frames_dropped.load(Ordering::Relaxed)
    }

    /// The address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// The advertised server IP.
    pub fn server_ip(&self) -> &str {
        &self.server_ip
    }

    /// Connection URL clients should dial.
    pub fn connection_url(&self) -> String {
        let port = self
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(self.shared.config.port);
        format!("tcp://{}:{}", self.server_ip, port)
    }

    /// Register the connect callback.
    pub fn set_on_client_connect(&self, cb: ClientCallback) {
        *self.shared.on_connect.lock() = Some(cb);
    }

    /// Register the disconnect callback.
    pub fn set_on_client_disconnect(&self, cb: ClientCallback) {
        *self.shared.on_disconnect.lock() = Some(cb);
    }
}

impl Drop for BroadcastServer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Connection handling ──────────────────────────────────────────

async fn accept_loop(shared: Arc<ServerShared>, listener: TcpListener) {
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                if shared.running.load(Ordering::Acquire) {
                    tracing::error!("accept error: {e}");
                    continue;
                }
                break;
            }
        };

        if !shared.running.load(Ordering::Acquire) {
            break;
        }

        if shared.clients.read().len() >= shared.config.max_clients as usize {
            tracing::warn!("max clients reached, rejecting {addr}");
            drop(socket);
            continue;
        }

        tokio::spawn(handle_connection(Arc::clone(&shared), socket, addr));
    }
}

async fn handle_connection(shared: Arc<ServerShared>, socket: TcpStream, addr: SocketAddr) {
    if shared.config.use_tcp_nodelay {
        let _ = socket.set_nodelay(true);
    }

    let mut framed = Framed::new(socket, StreamCodec);

    // Bidirectional handshake: the client speaks first.
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
        Ok(Some(Ok(msg))) if msg.kind == MessageKind::Hello => {}
        _ => {
            tracing::warn!("handshake failed for {addr}, dropping");
            return;
        }
    }
    if framed.send(Message::hello()).await.is_err() {
        return;
    }

    let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
    let session = Arc::new(ClientSession::new(
        addr.ip().to_string(),
        addr.port(),
        control_tx,
    ));

    {
        let mut clients = shared.clients.write();
        if clients.len() >= shared.config.max_clients as usize {
            tracing::warn!("max clients reached, rejecting {addr}");
            return;
        }
        clients.insert(session.id.clone(), Arc::clone(&session));
    }

    tracing::info!("client connected: {}", session.id);
    shared.fire_connect(session.snapshot());

    let (sink, stream) = framed.split();
    tokio::spawn(write_loop(
        Arc::clone(&shared),
        Arc::clone(&session),
        sink,
        control_rx,
    ));

    read_loop(Arc::clone(&session), stream).await;
    close_session(&shared, &session);
}

/// Remove the session from the registry and fire the disconnect
/// callback. Safe to call from both the read and write paths; only the
/// first caller observes the removal.
fn close_session(shared: &ServerShared, session: &Arc<ClientSession>) {
    session.closing.store(true, Ordering::Release);
    let _ = session.control_tx.try_send(Message::close());

    let removed = shared.clients.write().remove(&session.id);
    if removed.is_some() {
        tracing::info!("client disconnected: {}", session.id);
        shared.fire_disconnect(session.snapshot());
    }
}

async fn read_loop(session: Arc<ClientSession>, mut stream: FrameStream) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(msg) => match msg.kind {
                MessageKind::Pong => session.record_pong(),
                MessageKind::Ping => {
                    // Client-initiated probe: echo it back.
                    let _ = session.control_tx.try_send(Message::pong(msg.payload));
                }
                MessageKind::Control => {
                    tracing::debug!(
                        "control message from {} ({} bytes)",
                        session.id,
                        msg.payload.len()
                    );
                }
                MessageKind::Close => break,
                MessageKind::Hello | MessageKind::Frame => {
                    tracing::warn!("protocol violation from {}", session.id);
                    break;
                }
            },
            Err(e) => {
                tracing::warn!("read error from {}: {e}", session.id);
                break;
            }
        }
    }
}

/// Single writer per client. Frames drain from the SPSC ring; control
/// messages (pings, close) arrive on a side channel.
async fn write_loop(
    shared: Arc<ServerShared>,
    session: Arc<ClientSession>,
    mut sink: FrameSink,
    mut control_rx: mpsc::Receiver<Message>,
) {
    loop {
        tokio::select! {
            _ = session.notify.notified() => {
                if !drain_frames(&shared, &session, &mut sink).await {
                    close_session(&shared, &session);
                    break;
                }
            }
            msg = control_rx.recv() => {
                let Some(msg) = msg else { break };
                let is_close = msg.kind == MessageKind::Close;

                if is_close {
                    // Best-effort drain before the close frame.
                    let _ = drain_frames(&shared, &session, &mut sink).await;
                }
                if msg.kind == MessageKind::Ping {
                    *session.last_ping.lock() = Some(Instant::now());
                }
                if sink.send(msg).await.is_err() {
                    close_session(&shared, &session);
                    break;
                }
                if is_close {
                    let _ = sink.close().await;
                    break;
                }
            }
        }
    }
}

/// Drain the outbound ring, maintaining the `writing` flag protocol.
/// Returns `false` on write error.
async fn drain_frames(
    shared: &ServerShared,
    session: &ClientSession,
    sink: &mut FrameSink,
) -> bool {
    loop {
        while let Some(frame) = session.ring.try_pop() {
            let len = frame.data.len();
            let payload = Bytes::from_owner(FramePayload(frame));
            if sink.send(Message::frame(payload)).await.is_err() {
                session.writing.store(false, Ordering::Release);
                return false;
            }
            session.record_write(len);
            shared.total_frames_sent.fetch_add(1, Ordering::Relaxed);
            shared.total_bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
        }

        session.writing.store(false, Ordering::Release);
        if session.ring.is_empty() {
            return true;
        }
        // A push landed between the last pop and clearing the flag. If
        // the producer already re-armed the flag it also queued a
        // wakeup; otherwise take the flag back and keep draining.
        if session
            .writing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return true;
        }
    }
}

// ── Background loops ─────────────────────────────────────────────

async fn fanout_loop(shared: Arc<ServerShared>) {
    loop {
        shared.frame_notify.notified().await;
        if !shared.running.load(Ordering::Acquire) {
            break;
        }

        while let Some(frame) = shared.frame_queue.try_pop() {
            let clients = shared.clients.read();
            for session in clients.values() {
                session.offer(Arc::clone(&frame));
            }
        }
    }
}

async fn ping_loop(shared: Arc<ServerShared>) {
    let period = Duration::from_secs_f32(shared.config.ping_interval.max(0.1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !shared.running.load(Ordering::Acquire) {
            break;
        }

        let sessions: Vec<Arc<ClientSession>> =
            shared.clients.read().values().cloned().collect();
        for session in sessions {
            if session.closing.load(Ordering::Acquire) {
                continue;
            }
            let now_ms = shared.started.elapsed().as_millis() as u64;
            let _ = session.control_tx.try_send(Message::ping(now_ms));
        }
    }
}

// ── Local IP discovery ───────────────────────────────────────────

/// Discover the primary outbound IPv4 address by opening a UDP socket
/// towards a public sentinel and reading the local endpoint. No
/// packets are sent.
fn local_ip() -> String {
    let probe = || -> std::io::Result<String> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    probe().unwrap_or_else(|_| "127.0.0.1".to_string())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_network_config() -> NetworkConfig {
        NetworkConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn start_binds_ephemeral_port_and_stops() {
        let server = BroadcastServer::new(test_network_config());
        assert!(server.local_addr().is_none());

        server.start().unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.client_count(), 0);

        server.stop();
        // Idempotent.
        server.stop();
    }

    #[test]
    fn push_frame_before_start_is_a_noop() {
        let server = BroadcastServer::new(test_network_config());
        let pool = crate::pipeline::pool::EncodedFramePool::new(64, 1);
        let guard = pool.acquire();
        server.push_frame(Arc::new(guard));
        assert_eq!(server.frames_dropped(), 0);
    }

    #[test]
    fn local_ip_is_parseable() {
        let ip = local_ip();
        assert!(ip.parse::<std::net::IpAddr>().is_ok());
    }

    #[test]
    fn connection_url_uses_bound_port() {
        let server = BroadcastServer::new(test_network_config());
        server.start().unwrap();
        let url = server.connection_url();
        let port = server.local_addr().unwrap().port();
        assert!(url.starts_with("tcp://"));
        assert!(url.ends_with(&format!(":{port}")));
        server.stop();
    }

    #[test]
    fn bitrate_is_zero_without_uptime() {
        let stats = ServerStats::default();
        assert_eq!(stats.avg_bitrate_mbps(), 0.0);

        let stats = ServerStats {
            total_bytes_sent: 1_000_000,
            uptime_seconds: 8.0,
            ..ServerStats::default()
        };
        assert!((stats.avg_bitrate_mbps() - 1.0).abs() < 1e-9);
    }
}

//! Per-client state for the broadcast server.
//!
//! Each connected client owns a bounded outbound ring of shared frames
//! and a single writer task. The fan-out path offers frames with
//! [`ClientSession::offer`]; a full ring drops the frame for that
//! client only. Writer wakeups are linearized by a compare-and-swap on
//! the `writing` flag so a dormant writer is resumed exactly once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::net::wire::Message;
use crate::pipeline::pool::SharedFrame;
use crate::pipeline::spsc::SpscRing;

/// Outbound ring capacity per client. Deep enough to ride out a
/// short stall, shallow enough to bound added latency.
pub(crate) const OUTBOUND_RING_CAPACITY: usize = 8;

/// Capacity of the control-message side channel (pings, close).
pub(crate) const CONTROL_CHANNEL_CAPACITY: usize = 8;

// ── ClientInfo ───────────────────────────────────────────────────

/// Snapshot of one connected client, exposed through stats and the
/// connect/disconnect callbacks.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Stable id: `"address:port"`.
    pub id: String,
    /// Peer IP address.
    pub address: String,
    /// Peer port.
    pub port: u16,
    /// When the handshake completed.
    pub connected_at: Instant,
    /// Frames actually written to this client.
    pub frames_sent: u64,
    /// Bytes actually written to this client.
    pub bytes_sent: u64,
    /// Half the last measured ping round trip.
    pub latency_ms: f64,
}

// ── ClientSession ────────────────────────────────────────────────

/// Shared state between the fan-out path, the writer task, the read
/// task and the ping loop.
pub(crate) struct ClientSession {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub connected_at: Instant,
    pub frames_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub latency_ms: Mutex<f64>,
    pub last_ping: Mutex<Option<Instant>>,
    /// Outbound frames. Producer: the fan-out task. Consumer: the
    /// writer task.
    pub ring: SpscRing<SharedFrame>,
    /// Set while the writer task is draining the ring.
    pub writing: AtomicBool,
    /// Wakes the writer task after a push to an idle ring.
    pub notify: Notify,
    /// Control messages (pings, close) that bypass the frame ring.
    pub control_tx: mpsc::Sender<Message>,
    /// Set once the session begins closing; offers are rejected.
    pub closing: AtomicBool,
}

impl ClientSession {
    pub fn new(address: String, port: u16, control_tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: format!("{address}:{port}"),
            address,
            port,
            connected_at: Instant::now(),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            latency_ms: Mutex::new(0.0),
            last_ping: Mutex::new(None),
            ring: SpscRing::new(OUTBOUND_RING_CAPACITY),
            writing: AtomicBool::new(false),
            notify: Notify::new(),
            control_tx,
            closing: AtomicBool::new(false),
        }
    }

    /// Offer a frame to this client. Returns `false` when the frame was
    /// dropped (ring full or session closing); other clients are
    /// unaffected either way.
    pub fn offer(&self, frame: SharedFrame) -> bool {
        if self.closing.load(Ordering::Acquire) {
            return false;
        }

        if self.ring.try_push(frame).is_err() {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        // Resume the writer iff it is dormant. The CAS means concurrent
        // pushes wake it exactly once and an in-flight write is never
        // duplicated.
        if self
            .writing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.notify.notify_one();
        }
        true
    }

    /// Record the completion of one frame write.
    pub fn record_write(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a pong against the ping that prompted it.
    pub fn record_pong(&self) {
        if let Some(sent) = self.last_ping.lock().take() {
            *self.latency_ms.lock() = sent.elapsed().as_secs_f64() * 1000.0 / 2.0;
        }
    }

    /// Current counters as a [`ClientInfo`] snapshot.
    pub fn snapshot(&self) -> ClientInfo {
        ClientInfo {
            id: self.id.clone(),
            address: self.address.clone(),
            port: self.port,
            connected_at: self.connected_at,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            latency_ms: *self.latency_ms.lock(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pool::EncodedFramePool;
    use std::sync::Arc;

    fn session() -> ClientSession {
        let (tx, _rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        ClientSession::new("127.0.0.1".into(), 4000, tx)
    }

    fn shared_frame(pool: &EncodedFramePool) -> SharedFrame {
        let mut guard = pool.acquire();
        guard.data.extend_from_slice(b"payload");
        Arc::new(guard)
    }

    #[test]
    fn id_is_address_port() {
        let s = session();
        assert_eq!(s.id, "127.0.0.1:4000");
    }

    #[test]
    fn full_ring_drops_and_counts() {
        let pool = EncodedFramePool::new(64, 2);
        let s = session();

        let mut accepted = 0;
        for _ in 0..OUTBOUND_RING_CAPACITY + 3 {
            if s.offer(shared_frame(&pool)) {
                accepted += 1;
            }
        }
        // One slot reserved by the ring.
        assert_eq!(accepted, OUTBOUND_RING_CAPACITY - 1);
        assert_eq!(s.frames_dropped.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn closing_session_rejects_offers() {
        let pool = EncodedFramePool::new(64, 2);
        let s = session();
        s.closing.store(true, Ordering::Release);
        assert!(!s.offer(shared_frame(&pool)));
        assert!(s.ring.is_empty());
    }

    #[test]
    fn first_offer_marks_writer_as_woken() {
        let pool = EncodedFramePool::new(64, 2);
        let s = session();

        assert!(!s.writing.load(Ordering::Acquire));
        assert!(s.offer(shared_frame(&pool)));
        assert!(s.writing.load(Ordering::Acquire));
    }

    #[test]
    fn pong_without_ping_is_ignored() {
        let s = session();
        s.record_pong();
        assert_eq!(*s.latency_ms.lock(), 0.0);
    }

    #[test]
    fn pong_after_ping_records_half_round_trip() {
        let s = session();
        *s.last_ping.lock() = Some(Instant::now() - std::time::Duration::from_millis(20));
        s.record_pong();
        let latency = *s.latency_ms.lock();
        assert!(latency >= 9.0, "latency {latency}");
        assert!(s.last_ping.lock().is_none());
    }
}

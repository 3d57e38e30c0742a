//! Integration tests: full pipeline runs over a real TCP connection
//! on localhost, driven by the synthetic capture source.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use stereocast_core::config::{Config, EncodeMethod};
use stereocast_core::net::wire::{Message, MessageKind, StreamCodec};
use stereocast_core::{Streamer, SyntheticCapture};

// ── Helpers ──────────────────────────────────────────────────────

fn client_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.network.host = "127.0.0.1".into();
    config.network.port = 0; // OS-assigned
    config.capture.target_fps = 30;
    config.encoder.method = EncodeMethod::Plain;
    config.encoder.jpeg_quality = 60;
    config
}

/// Init + start a streamer over a synthetic source and return it with
/// the bound address.
fn start_streamer(width: u32, height: u32, config: Config) -> (Streamer, SocketAddr) {
    let mut streamer = Streamer::new();
    streamer
        .init_with_source(config, Box::new(SyntheticCapture::new(width, height)))
        .unwrap();
    streamer.start().unwrap();
    let addr = streamer.local_addr().unwrap();
    (streamer, addr)
}

type Client = Framed<TcpStream, StreamCodec>;

/// Connect and complete the handshake.
async fn connect_client(addr: SocketAddr) -> Client {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, StreamCodec);

    framed.send(Message::hello()).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("handshake timeout")
        .expect("connection closed during handshake")
        .expect("handshake decode error");
    assert_eq!(reply.kind, MessageKind::Hello);
    framed
}

/// Receive the next video frame, answering pings along the way.
/// Returns `None` when the server closes the connection.
async fn recv_frame(client: &mut Client) -> Option<Message> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(10), client.next())
            .await
            .expect("frame timeout")?
            .ok()?;
        match msg.kind {
            MessageKind::Frame => return Some(msg),
            MessageKind::Ping => {
                let _ = client.send(Message::pong(msg.payload)).await;
            }
            MessageKind::Close => return None,
            _ => {}
        }
    }
}

// ── Cold start ───────────────────────────────────────────────────

#[test]
fn cold_start_delivers_decodable_downscaled_jpeg() {
    let mut config = test_config();
    config.encoder.downscale_factor = 0.5;
    config.encoder.vr_enabled = false;

    let (mut streamer, addr) = start_streamer(640, 360, config);
    let rt = client_runtime();

    let payload = rt.block_on(async {
        let mut client = connect_client(addr).await;
        recv_frame(&mut client).await.expect("no frame").payload
    });

    let decoded = image::load_from_memory(&payload).expect("payload is not a JPEG");
    assert_eq!((decoded.width(), decoded.height()), (320, 180));

    streamer.stop();
}

#[test]
fn pipeline_counters_stay_ordered() {
    let (mut streamer, addr) = start_streamer(320, 180, test_config());
    let rt = client_runtime();

    rt.block_on(async {
        let mut client = connect_client(addr).await;
        for _ in 0..5 {
            recv_frame(&mut client).await.expect("no frame");
        }
    });

    let stats = streamer.stats();
    assert!(stats.frames_captured >= stats.frames_encoded);
    assert!(stats.frames_encoded >= 5);

    streamer.stop();
}

// ── Stereo ───────────────────────────────────────────────────────

#[test]
fn stereo_payload_has_even_derived_dimensions() {
    let mut config = test_config();
    config.encoder.downscale_factor = 0.5;
    config.encoder.vr_enabled = true;
    config.encoder.eye_separation = 0.03;

    let (mut streamer, addr) = start_streamer(640, 360, config);
    let rt = client_runtime();

    let payload = rt.block_on(async {
        let mut client = connect_client(addr).await;
        recv_frame(&mut client).await.expect("no frame").payload
    });

    // Width unchanged by stereo (each eye gets half), both even.
    let decoded = image::load_from_memory(&payload).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (320, 180));

    streamer.stop();
}

// ── Slow consumers ───────────────────────────────────────────────

#[test]
fn slow_client_never_stalls_fast_client() {
    let (mut streamer, addr) = start_streamer(320, 180, test_config());
    let rt = client_runtime();

    let fast_frames = rt.block_on(async {
        // The slow client handshakes and then never reads again.
        let slow = connect_client(addr).await;

        let mut fast = connect_client(addr).await;
        let mut received = 0u32;
        for _ in 0..10 {
            if recv_frame(&mut fast).await.is_some() {
                received += 1;
            }
        }

        drop(slow);
        received
    });

    assert_eq!(fast_frames, 10);
    streamer.stop();
}

// ── Max clients ──────────────────────────────────────────────────

#[test]
fn excess_client_is_rejected_without_handshake() {
    let mut config = test_config();
    config.network.max_clients = 1;

    let (mut streamer, addr) = start_streamer(320, 180, config);
    let rt = client_runtime();

    rt.block_on(async {
        // First client fills the registry.
        let mut first = connect_client(addr).await;
        recv_frame(&mut first).await.expect("first client streams");

        // Second connection is accepted then dropped before any Hello
        // reply.
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut rejected = Framed::new(stream, StreamCodec);
        let _ = rejected.send(Message::hello()).await;

        let reply = tokio::time::timeout(Duration::from_secs(5), rejected.next())
            .await
            .expect("rejection timeout");
        assert!(
            !matches!(&reply, Some(Ok(msg)) if msg.kind == MessageKind::Hello),
            "server must not handshake past max_clients"
        );

        // The first client keeps streaming.
        assert!(recv_frame(&mut first).await.is_some());
    });

    streamer.stop();
}

// ── Shutdown ─────────────────────────────────────────────────────

#[test]
fn clean_shutdown_closes_clients_and_joins_threads() {
    let (mut streamer, addr) = start_streamer(320, 180, test_config());
    let rt = client_runtime();

    let mut client = rt.block_on(async {
        let mut client = connect_client(addr).await;
        recv_frame(&mut client).await.expect("streaming before stop");
        client
    });

    let stop_start = std::time::Instant::now();
    streamer.stop();
    assert!(stop_start.elapsed() < Duration::from_secs(2));

    // The connection winds down; nothing but already-queued frames and
    // the close can arrive.
    rt.block_on(async {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), client.next()).await {
                Ok(None) => break,
                Ok(Some(Ok(msg))) if msg.kind == MessageKind::Close => break,
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(_))) => break,
                Err(_) => panic!("connection did not close after stop"),
            }
        }
    });
}

#[test]
fn restart_after_stop_streams_again() {
    let mut config = test_config();
    let (mut streamer, addr) = start_streamer(320, 180, config.clone());
    let rt = client_runtime();

    rt.block_on(async {
        let mut client = connect_client(addr).await;
        recv_frame(&mut client).await.expect("first run streams");
    });
    streamer.stop();

    // A fresh streamer binds a new port and streams again.
    config.network.port = 0;
    let (mut second, addr2) = start_streamer(320, 180, config);
    rt.block_on(async {
        let mut client = connect_client(addr2).await;
        recv_frame(&mut client).await.expect("second run streams");
    });
    second.stop();
}

// ── Callbacks ────────────────────────────────────────────────────

#[test]
fn connect_and_disconnect_callbacks_fire() {
    use std::sync::atomic::{AtomicU32, Ordering};

    let connects = Arc::new(AtomicU32::new(0));
    let disconnects = Arc::new(AtomicU32::new(0));

    let mut streamer = Streamer::new();
    {
        let connects = Arc::clone(&connects);
        streamer.on_client_connect(Arc::new(move |info| {
            assert!(info.id.contains(':'));
            connects.fetch_add(1, Ordering::SeqCst);
        }));
        let disconnects = Arc::clone(&disconnects);
        streamer.on_client_disconnect(Arc::new(move |_| {
            disconnects.fetch_add(1, Ordering::SeqCst);
        }));
    }

    streamer
        .init_with_source(test_config(), Box::new(SyntheticCapture::new(320, 180)))
        .unwrap();
    streamer.start().unwrap();
    let addr = streamer.local_addr().unwrap();

    let rt = client_runtime();
    rt.block_on(async {
        let mut client = connect_client(addr).await;
        recv_frame(&mut client).await.expect("streams");
        client.send(Message::close()).await.unwrap();
        drop(client);
        // Give the server a moment to observe the close.
        tokio::time::sleep(Duration::from_millis(300)).await;
    });

    assert_eq!(connects.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(disconnects.load(std::sync::atomic::Ordering::SeqCst), 1);

    streamer.stop();
}

// ── Stats callback ───────────────────────────────────────────────

#[test]
fn stats_callback_reports_progress() {
    use std::sync::atomic::{AtomicU64, Ordering};

    let best_captured = Arc::new(AtomicU64::new(0));

    let mut streamer = Streamer::new();
    {
        let best = Arc::clone(&best_captured);
        streamer.on_stats_update(Arc::new(move |stats| {
            best.fetch_max(stats.frames_captured, Ordering::SeqCst);
        }));
    }

    streamer
        .init_with_source(test_config(), Box::new(SyntheticCapture::new(160, 90)))
        .unwrap();
    streamer.start().unwrap();

    // Two stats periods.
    std::thread::sleep(Duration::from_millis(2500));
    streamer.stop();

    assert!(best_captured.load(Ordering::SeqCst) > 0);
}

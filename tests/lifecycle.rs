//! End-to-end connection lifecycle tests over real sockets.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use peerlink::protocol::{create_version_message, encode_frame, wire};
use peerlink::{
    dial_seeds, Dialer, EndpointConfig, EndpointEvent, Error, Listener, ListenerHandle, PeerEvent,
};

const EVENT_WAIT: Duration = Duration::from_secs(5);

/// Start a listener on an ephemeral port and return its control handle,
/// bound address, and event stream.
async fn start_listener(
    config: EndpointConfig,
) -> (ListenerHandle, SocketAddr, mpsc::Receiver<EndpointEvent>) {
    let (mut listener, events) = Listener::new(config.with_port(0));
    let bound = listener
        .bound_addr_receiver()
        .expect("fresh listener has a bound-addr receiver");
    let handle = listener.handle();
    tokio::spawn(listener.run());

    let addr = bound.await.expect("listener bound");
    // Connect to loopback rather than 0.0.0.0.
    let addr = SocketAddr::from(([127, 0, 0, 1], addr.port()));
    (handle, addr, events)
}

/// Receive peer events until one matches the predicate, failing the test
/// if nothing matches within the wait budget.
async fn peer_event<F>(events: &mut mpsc::Receiver<PeerEvent>, mut pred: F) -> PeerEvent
where
    F: FnMut(&PeerEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(EVENT_WAIT, events.recv())
            .await
            .expect("timed out waiting for peer event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

/// Receive listener events until a peer event matches the predicate.
async fn listener_peer_event<F>(events: &mut mpsc::Receiver<EndpointEvent>, mut pred: F) -> PeerEvent
where
    F: FnMut(&PeerEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(EVENT_WAIT, events.recv())
            .await
            .expect("timed out waiting for endpoint event")
            .expect("event channel closed");
        if let EndpointEvent::Peer(peer) = event {
            if pred(&peer) {
                return peer;
            }
        }
    }
}

#[tokio::test]
async fn test_dial_handshake_and_message_exchange() {
    let (listener, addr, mut listener_events) =
        start_listener(EndpointConfig::new().with_user_agent("/server:1.0/")).await;

    let mut dialer = Dialer::new(EndpointConfig::new().with_user_agent("/client:1.0/"));
    let mut dialer_events = dialer.dial(addr).await.unwrap();

    // The dialer reports the open before anything else.
    let first = peer_event(&mut dialer_events, |_| true).await;
    assert!(matches!(first, PeerEvent::Open { .. }));

    // The listener announces the admitted connection before any peer event.
    let announced = tokio::time::timeout(EVENT_WAIT, listener_events.recv())
        .await
        .unwrap()
        .unwrap();
    let accepted_peer = match announced {
        EndpointEvent::Connection { peer, .. } => peer,
        other => panic!("expected connection event, got {other:?}"),
    };

    // Both sides establish, each seeing the other's version.
    let established =
        peer_event(&mut dialer_events, |e| matches!(e, PeerEvent::Established { .. })).await;
    if let PeerEvent::Established { version, .. } = established {
        assert_eq!(version.user_agent, "/server:1.0/");
    }
    let established = listener_peer_event(&mut listener_events, |e| {
        matches!(e, PeerEvent::Established { .. })
    })
    .await;
    if let PeerEvent::Established { version, .. } = established {
        assert_eq!(version.user_agent, "/client:1.0/");
    }

    // Application traffic dialer -> listener.
    dialer.send("object", Bytes::from_static(b"payload")).unwrap();
    let event = listener_peer_event(&mut listener_events, |e| {
        matches!(e, PeerEvent::Message { .. })
    })
    .await;
    if let PeerEvent::Message { command, payload, .. } = event {
        assert_eq!(command, "object");
        assert_eq!(payload, Bytes::from_static(b"payload"));
    }

    // Direct send to the accepted peer through its handle.
    accepted_peer.send("getdata", Bytes::from_static(b"want")).unwrap();
    let event = peer_event(&mut dialer_events, |e| matches!(e, PeerEvent::Message { .. })).await;
    if let PeerEvent::Message { command, .. } = event {
        assert_eq!(command, "getdata");
    }

    // Broadcast listener -> dialer.
    listener.broadcast("inv", Bytes::from_static(b"inventory")).unwrap();
    let event = peer_event(&mut dialer_events, |e| matches!(e, PeerEvent::Message { .. })).await;
    if let PeerEvent::Message { command, payload, .. } = event {
        assert_eq!(command, "inv");
        assert_eq!(payload, Bytes::from_static(b"inventory"));
    }

    // Shutdown closes the peer and announces the end of the listener.
    listener.shutdown();
    peer_event(&mut dialer_events, |e| matches!(e, PeerEvent::Closed { .. })).await;
    loop {
        let event = tokio::time::timeout(EVENT_WAIT, listener_events.recv())
            .await
            .unwrap()
            .unwrap();
        if matches!(event, EndpointEvent::Closed) {
            break;
        }
    }
}

#[tokio::test]
async fn test_duplicate_host_is_rejected_with_one_warning() {
    let (_listener, addr, mut listener_events) = start_listener(EndpointConfig::new()).await;

    let mut first = Dialer::new(EndpointConfig::new());
    let mut first_events = first.dial(addr).await.unwrap();
    peer_event(&mut first_events, |e| matches!(e, PeerEvent::Established { .. })).await;

    // Second connection from the same host: admitted at the TCP level,
    // then closed by admission control with a single warning.
    let mut second = Dialer::new(EndpointConfig::new());
    let mut second_events = second.dial(addr).await.unwrap();

    let warning = listener_peer_event(&mut listener_events, |e| {
        matches!(e, PeerEvent::Warning { .. })
    })
    .await;
    if let PeerEvent::Warning { error, .. } = warning {
        assert!(matches!(error, Error::DuplicateAddress { .. }));
    }

    // The rejected dialer sees its connection close without establishing.
    loop {
        let event = peer_event(&mut second_events, |_| true).await;
        match event {
            PeerEvent::Established { .. } => panic!("rejected connection established"),
            PeerEvent::Closed { .. } => break,
            _ => {}
        }
    }

    // The first connection is unaffected.
    first.send("object", Bytes::from_static(b"still here")).unwrap();
    listener_peer_event(&mut listener_events, |e| {
        matches!(e, PeerEvent::Message { .. })
    })
    .await;
}

#[tokio::test]
async fn test_silent_peer_is_closed_at_handshake_timeout() {
    let config = EndpointConfig::new().with_handshake_timeout(Duration::from_millis(200));
    let (_listener, addr, mut listener_events) = start_listener(config).await;

    // Connect but never speak.
    let _stream = TcpStream::connect(addr).await.unwrap();

    let closed = listener_peer_event(&mut listener_events, |e| {
        matches!(e, PeerEvent::Closed { .. })
    })
    .await;
    if let PeerEvent::Closed { reason, .. } = closed {
        assert_eq!(reason, "timeout");
    }
}

#[tokio::test]
async fn test_deadline_escalates_after_establishment() {
    // Handshake window is short, the idle window much longer. If the
    // deadline failed to escalate, the close would arrive at the
    // handshake timeout instead of the idle timeout.
    let config = EndpointConfig::new()
        .with_handshake_timeout(Duration::from_millis(200))
        .with_idle_timeout(Duration::from_millis(1500));
    let (_listener, addr, mut listener_events) = start_listener(config).await;

    let mut dialer = Dialer::new(EndpointConfig::new());
    let _dialer_events = dialer.dial(addr).await.unwrap();

    listener_peer_event(&mut listener_events, |e| {
        matches!(e, PeerEvent::Established { .. })
    })
    .await;
    let established_at = Instant::now();

    let closed = listener_peer_event(&mut listener_events, |e| {
        matches!(e, PeerEvent::Closed { .. })
    })
    .await;
    if let PeerEvent::Closed { reason, .. } = closed {
        assert_eq!(reason, "timeout");
    }
    assert!(
        established_at.elapsed() >= Duration::from_millis(1000),
        "closed after {:?}, before the idle window",
        established_at.elapsed()
    );
}

#[tokio::test]
async fn test_traffic_resets_the_idle_deadline() {
    let config = EndpointConfig::new().with_idle_timeout(Duration::from_millis(800));
    let (_listener, addr, mut listener_events) = start_listener(config).await;

    let mut dialer = Dialer::new(EndpointConfig::new());
    let mut dialer_events = dialer.dial(addr).await.unwrap();
    peer_event(&mut dialer_events, |e| matches!(e, PeerEvent::Established { .. })).await;

    // Keep sending under the idle window; the connection must outlive
    // several multiples of it.
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(300)).await;
        dialer.send("object", Bytes::from_static(b"keepalive")).unwrap();
    }

    listener_peer_event(&mut listener_events, |e| {
        matches!(e, PeerEvent::Message { .. })
    })
    .await;
    let closed = listener_peer_event(&mut listener_events, |e| {
        matches!(e, PeerEvent::Closed { .. })
    })
    .await;
    if let PeerEvent::Closed { reason, .. } = closed {
        assert_eq!(reason, "timeout");
    }
}

#[tokio::test]
async fn test_noise_warns_without_closing() {
    let (_listener, addr, mut listener_events) = start_listener(EndpointConfig::new()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"hello, is this the right port?\n")
        .await
        .unwrap();

    let warning = listener_peer_event(&mut listener_events, |e| {
        matches!(e, PeerEvent::Warning { .. })
    })
    .await;
    if let PeerEvent::Warning { error, .. } = warning {
        assert!(matches!(error, Error::NonBinaryFrame));
    }

    // The same socket can still complete the handshake afterwards.
    let version = create_version_message(&EndpointConfig::new());
    let payload = wire::serialize(&version).unwrap();
    stream
        .write_all(&encode_frame("version", &payload).unwrap())
        .await
        .unwrap();
    stream
        .write_all(&encode_frame("verack", b"").unwrap())
        .await
        .unwrap();

    listener_peer_event(&mut listener_events, |e| {
        matches!(e, PeerEvent::Established { .. })
    })
    .await;
}

#[tokio::test]
async fn test_send_after_close_is_not_connected() {
    let (_listener, addr, mut listener_events) = start_listener(EndpointConfig::new()).await;

    let mut dialer = Dialer::new(EndpointConfig::new());
    let mut dialer_events = dialer.dial(addr).await.unwrap();
    peer_event(&mut dialer_events, |e| matches!(e, PeerEvent::Established { .. })).await;

    dialer.close();
    peer_event(&mut dialer_events, |e| matches!(e, PeerEvent::Closed { .. })).await;

    // The connection task has exited; its command channel is gone.
    let deadline = Instant::now() + EVENT_WAIT;
    loop {
        match dialer.send("object", Bytes::new()) {
            Err(Error::NotConnected) => break,
            Ok(()) => {
                assert!(Instant::now() < deadline, "send kept succeeding after close");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    // The listener sees the close and drops its registry entry, so the
    // same host may connect again.
    listener_peer_event(&mut listener_events, |e| {
        matches!(e, PeerEvent::Closed { .. })
    })
    .await;
    let mut retry = Dialer::new(EndpointConfig::new());
    let mut retry_events = retry.dial(addr).await.unwrap();
    peer_event(&mut retry_events, |e| matches!(e, PeerEvent::Established { .. })).await;
}

#[tokio::test]
async fn test_dial_seeds_skips_unreachable() {
    let (_a, addr_a, _events_a) = start_listener(EndpointConfig::new()).await;
    let (_b, addr_b, _events_b) = start_listener(EndpointConfig::new()).await;
    let unreachable: SocketAddr = "127.0.0.1:1".parse().unwrap();

    let config = EndpointConfig::new()
        .with_connect_timeout(Duration::from_millis(500))
        .with_seeds(vec![addr_a, addr_b, unreachable]);

    // bootstrap() is a plain snapshot; dialing the seeds is separate.
    let probe = Dialer::new(config.clone());
    assert_eq!(probe.bootstrap(), vec![addr_a, addr_b, unreachable]);

    let mut sessions = dial_seeds(&config).await;
    assert_eq!(sessions.len(), 2);

    for (_dialer, events) in &mut sessions {
        peer_event(events, |e| matches!(e, PeerEvent::Established { .. })).await;
    }
}

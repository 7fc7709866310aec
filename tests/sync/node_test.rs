// Node Tests
// Flooding through the node: peer fan-out, callbacks, lifecycle and multi-node meshes

use hammesh::protocol::{Contact, Message, PayloadType};
use hammesh::sync::{GossipConfig, GossipError, Node, NodeConfig, NodeError, PeerConfig};
use hammesh::transport::{dial, PeerAddress, TransportConfig};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

const WAIT: Duration = Duration::from_secs(5);

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    cond()
}

fn station(callsign: &str, config: NodeConfig) -> Node {
    Node::new(
        Contact::fixed(callsign).unwrap(),
        config
            .with_bind_address("127.0.0.1")
            .with_port(0)
            .with_peer_config(PeerConfig::new().with_reconnect_interval(Duration::from_millis(50))),
    )
}

fn dialing(addr: SocketAddr) -> NodeConfig {
    NodeConfig::new().with_peer(PeerAddress::new("127.0.0.1", addr.port()))
}

fn collect(node: &Node) -> Arc<Mutex<Vec<Message>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    node.add_message_callback(move |msg, _| sink.lock().unwrap().push(msg.clone()));
    seen
}

fn remote_frame(seq: u64, ttl: u8) -> Vec<u8> {
    Message::new(Contact::fixed("FAR").unwrap(), seq, PayloadType::Cq, b"hello".to_vec())
        .with_ttl(ttl)
        .with_path("FAR")
        .encode()
        .unwrap()
}

// ============================================================================
// SPREAD
// ============================================================================

#[tokio::test]
async fn test_spread_queues_on_every_peer() {
    let node = Node::new(
        Contact::fixed("N0SRC").unwrap(),
        NodeConfig::new()
            .with_peer(PeerAddress::new("127.0.0.1", 1))
            .with_peer(PeerAddress::new("127.0.0.1", 2)),
    );

    let msg = node.new_message(PayloadType::Cq, b"cq cq".to_vec(), 3);
    node.spread_message(msg.clone()).unwrap();

    assert_eq!(node.cache_len(), 1);
    for peer in node.peers() {
        let frames = peer.queued_frames();
        assert_eq!(frames.len(), 1);

        let wire = Message::decode(&frames[0]).unwrap();
        assert_eq!(wire.key(), msg.key());
        assert_eq!(wire.ttl, 2);
        assert!(wire.path_contains("N0SRC"));
    }
}

#[tokio::test]
async fn test_spread_ttl_one_stays_local() {
    let node = Node::new(
        Contact::fixed("N0SRC").unwrap(),
        NodeConfig::new().with_peer(PeerAddress::new("127.0.0.1", 1)),
    );

    node.spread_message(node.new_message(PayloadType::Cq, vec![], 1)).unwrap();
    assert_eq!(node.cache_len(), 1);
    assert_eq!(node.peers()[0].queue_len(), 0);
}

#[tokio::test]
async fn test_spread_delivers_locally() {
    let node = Node::new(Contact::fixed("N0SRC").unwrap(), NodeConfig::new());
    let seen = collect(&node);

    node.spread_message(node.new_message(PayloadType::Cq, vec![], 3)).unwrap();
    assert!(wait_until(|| seen.lock().unwrap().len() == 1).await);
}

#[test]
fn test_spread_read_only_rejected() {
    let node = Node::new(
        Contact::fixed("N0RO").unwrap(),
        NodeConfig::new()
            .with_peer(PeerAddress::new("127.0.0.1", 1))
            .with_gossip_config(GossipConfig::new().with_read_only(true)),
    );

    let result = node.spread_message(node.new_message(PayloadType::Cq, vec![], 3));
    assert_eq!(result, Err(GossipError::ReadOnlyNode));
    assert_eq!(node.cache_len(), 0);
    assert_eq!(node.peers()[0].queue_len(), 0);
}

// ============================================================================
// RECEIVE
// ============================================================================

#[tokio::test]
async fn test_duplicate_frame_ignored() {
    let node = Node::new(
        Contact::fixed("N0DUP").unwrap(),
        NodeConfig::new().with_peer(PeerAddress::new("127.0.0.1", 1)),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    node.add_message_callback(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let raw = remote_frame(9, 4);
    node.handle_message(&raw, None);
    assert!(wait_until(|| calls.load(Ordering::SeqCst) == 1).await);
    assert_eq!(node.peers()[0].queue_len(), 1);

    node.handle_message(&raw, None);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(node.peers()[0].queue_len(), 1);
    assert_eq!(node.cache_len(), 1);
    assert_eq!(node.stats().duplicates_dropped, 1);
}

#[tokio::test]
async fn test_malformed_frame_dropped() {
    let node = Node::new(Contact::fixed("N0BAD").unwrap(), NodeConfig::new());
    let seen = collect(&node);

    node.handle_message(&[0x01, 0x00, 0x02], None);
    sleep(Duration::from_millis(50)).await;

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(node.stats().malformed_dropped, 1);
    assert_eq!(node.cache_len(), 0);
}

#[test]
fn test_add_to_cache_does_not_relay() {
    let node = Node::new(
        Contact::fixed("N0ADD").unwrap(),
        NodeConfig::new().with_peer(PeerAddress::new("127.0.0.1", 1)),
    );
    let msg = Message::decode(&remote_frame(3, 5)).unwrap();

    assert!(node.add_to_cache(msg.clone()));
    assert!(!node.add_to_cache(msg));
    assert_eq!(node.peers()[0].queue_len(), 0);
    assert_eq!(node.cache_snapshot()[0].path, "FAR;N0ADD");
}

#[test]
fn test_removed_callback_not_called() {
    let node = Node::new(Contact::fixed("N0CB").unwrap(), NodeConfig::new());
    let id = node.add_message_callback(|_, _| panic!("removed callback ran"));
    assert!(node.remove_message_callback(id));

    // No callbacks left, so delivery needs no runtime
    node.handle_message(&remote_frame(1, 2), None);
    assert_eq!(node.cache_len(), 1);
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_start_twice_rejected() {
    let node = station("N0LIFE", NodeConfig::new());
    let addr = node.start().await.unwrap();

    assert_eq!(node.local_addr(), Some(addr));
    assert!(matches!(node.start().await, Err(NodeError::AlreadyStarted)));
    node.shutdown().await;
}

#[tokio::test]
async fn test_start_after_shutdown_rejected() {
    let node = station("N0LIFE", NodeConfig::new());
    node.shutdown().await;
    assert!(matches!(node.start().await, Err(NodeError::ShutDown)));
}

#[tokio::test]
async fn test_bind_failure_allows_retry() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();

    let node = Node::new(
        Contact::fixed("N0BIND").unwrap(),
        NodeConfig::new().with_bind_address("127.0.0.1").with_port(port),
    );
    assert!(matches!(node.start().await, Err(NodeError::Transport(_))));

    drop(taken);
    node.start().await.unwrap();
    node.shutdown().await;
}

// ============================================================================
// MESH
// ============================================================================

#[tokio::test]
async fn test_flood_across_chain() {
    // N0C -> N0B -> N0A
    let a = station("N0A", NodeConfig::new());
    let a_addr = a.start().await.unwrap();
    let b = station("N0B", dialing(a_addr));
    let b_addr = b.start().await.unwrap();
    let c = station("N0C", dialing(b_addr));
    c.start().await.unwrap();

    let seen_a = collect(&a);
    let msg = c.new_message(PayloadType::Cq, b"cq de N0C".to_vec(), 3);
    c.spread_message(msg.clone()).unwrap();

    assert!(wait_until(|| !seen_a.lock().unwrap().is_empty()).await);
    let received = seen_a.lock().unwrap()[0].clone();
    assert_eq!(received.key(), msg.key());
    assert_eq!(received.path, "N0C;N0B;N0A");
    assert_eq!(received.ttl, 0);
    assert_eq!(received.payload, b"cq de N0C".to_vec());

    // The relay from N0B back towards N0C is dropped by path
    assert!(wait_until(|| c.stats().loops_suppressed >= 1).await);
    assert_eq!(c.cache_len(), 1);
    assert_eq!(b.cache_len(), 1);
    assert_eq!(a.cache_len(), 1);

    for node in [a, b, c] {
        node.shutdown().await;
    }
}

#[tokio::test]
async fn test_ttl_limits_reach() {
    // N0C -> N0B -> N0A with a TTL of two hops
    let a = station("N0A", NodeConfig::new());
    let a_addr = a.start().await.unwrap();
    let b = station("N0B", dialing(a_addr));
    let b_addr = b.start().await.unwrap();
    let c = station("N0C", dialing(b_addr));
    c.start().await.unwrap();

    c.spread_message(c.new_message(PayloadType::Cq, vec![], 2)).unwrap();

    assert!(wait_until(|| b.cache_len() == 1).await);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(a.cache_len(), 0);

    for node in [a, b, c] {
        node.shutdown().await;
    }
}

#[tokio::test]
async fn test_callback_sees_origin_peer() {
    let a = station("N0A", NodeConfig::new());
    let a_addr = a.start().await.unwrap();
    let b = station("N0B", dialing(a_addr));
    b.start().await.unwrap();

    let from_peer = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&from_peer);
    a.add_message_callback(move |_, peer| {
        if peer.map(|p| p.is_inbound()).unwrap_or(false) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    b.spread_message(b.new_message(PayloadType::MessengerCq, vec![], 2)).unwrap();
    assert!(wait_until(|| from_peer.load(Ordering::SeqCst) == 1).await);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_same_message_from_two_peers_delivered_once() {
    let node = station("N0HUB", NodeConfig::new());
    let addr = node.start().await.unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    node.add_message_callback(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let address = PeerAddress::new("127.0.0.1", addr.port());
    let config = TransportConfig::default();
    let (first, second) = tokio::join!(dial(&address, &config), dial(&address, &config));
    let (first, _first_rx) = first.unwrap();
    let (second, _second_rx) = second.unwrap();

    let raw = remote_frame(42, 3);
    let (a, b) = tokio::join!(first.send(raw.clone()), second.send(raw));
    a.unwrap();
    b.unwrap();

    assert!(wait_until(|| node.stats().duplicates_dropped == 1).await);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(node.cache_len(), 1);

    node.shutdown().await;
}

// ============================================================================
// NO RUNTIME
// ============================================================================

#[test]
fn test_spread_without_runtime_skips_callbacks() {
    let node = Node::new(
        Contact::fixed("N0SYNC").unwrap(),
        NodeConfig::new().with_peer(PeerAddress::new("127.0.0.1", 1)),
    );
    node.add_message_callback(|_, _| panic!("callback ran without a runtime"));

    node.spread_message(node.new_message(PayloadType::Cq, b"cq".to_vec(), 3)).unwrap();
    node.handle_message(&remote_frame(5, 3), None);

    assert_eq!(node.cache_len(), 2);
    assert_eq!(node.peers()[0].queue_len(), 2);
}

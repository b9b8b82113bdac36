//! Swarm-backed transport against a local directory
//!
//! Run with: cargo test --test integration_swarm_relay

use ghostlink_core::message::{Body, SenderInfo, WireEnvelope};
use ghostlink_core::transport::behaviour::is_relayed_addr;
use ghostlink_core::transport::{
    DirectoryConfig, DirectoryNode, PeerTransport, SwarmBackend, SwarmConfig, TransportEvent,
};
use libp2p::Multiaddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const BURST: usize = 300;

struct Node {
    backend: Arc<SwarmBackend>,
    transport: PeerTransport,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    id: String,
}

async fn start_directory() -> Multiaddr {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let node = DirectoryNode::new(DirectoryConfig {
        port,
        key_path: None,
    })
    .unwrap();
    let addr = format!("/ip4/127.0.0.1/tcp/{}/p2p/{}", port, node.peer_id())
        .parse()
        .unwrap();
    tokio::spawn(node.run());
    tokio::time::sleep(Duration::from_millis(300)).await;
    addr
}

async fn node(directory: &Multiaddr, nickname: &str, anonymize: bool) -> Node {
    let backend = Arc::new(SwarmBackend::new(SwarmConfig {
        directory: directory.clone(),
        listen_port: 0,
    }));
    let (transport, events) = PeerTransport::new(backend.clone());
    let id = transport
        .initialize(SenderInfo::new(nickname), anonymize)
        .await
        .unwrap();
    Node {
        backend,
        transport,
        events,
        id,
    }
}

/// Connect, retrying while the remote's relay reservation settles
async fn connect(from: &Node, to: &Node) {
    for _ in 0..20 {
        if from.transport.connect(&to.id, SenderInfo::new("dialer")).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    panic!("could not connect {} -> {}", from.id, to.id);
}

async fn wait_opened(node: &mut Node, from: &str) {
    let wait = async {
        while let Some(event) = node.events.recv().await {
            if matches!(&event, TransportEvent::ConnectionOpened { peer_id, .. } if peer_id == from) {
                return;
            }
        }
        panic!("event channel closed");
    };
    timeout(Duration::from_secs(10), wait)
        .await
        .expect("timed out waiting for the channel to open");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_anonymized_peer_connects_only_through_relay() {
    let directory = start_directory().await;
    let mut bob = node(&directory, "bob", false).await;
    let anon = node(&directory, "anon", true).await;

    connect(&anon, &bob).await;
    wait_opened(&mut bob, &anon.id).await;

    let outbound = anon.backend.routes(&bob.id).await.unwrap();
    assert!(!outbound.is_empty());
    assert!(outbound.iter().all(is_relayed_addr), "{outbound:?}");

    let inbound = bob.backend.routes(&anon.id).await.unwrap();
    assert!(!inbound.is_empty());
    assert!(inbound.iter().all(is_relayed_addr), "{inbound:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_plain_peers_connect_directly() {
    let directory = start_directory().await;
    let mut bob = node(&directory, "bob", false).await;
    let carol = node(&directory, "carol", false).await;

    connect(&carol, &bob).await;
    wait_opened(&mut bob, &carol.id).await;

    let routes = carol.backend.routes(&bob.id).await.unwrap();
    assert!(!routes.is_empty());
    assert!(routes.iter().all(|addr| !is_relayed_addr(addr)), "{routes:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_burst_over_relay_arrives_complete_and_in_order() {
    let directory = start_directory().await;
    let mut bob = node(&directory, "bob", false).await;
    let anon = node(&directory, "anon", true).await;

    connect(&anon, &bob).await;
    wait_opened(&mut bob, &anon.id).await;

    let padding = "x".repeat(1024);
    for n in 0..BURST {
        let envelope = WireEnvelope::chat(&format!("{n:03} {padding}"), SenderInfo::new("anon"));
        anon.transport.send(&bob.id, envelope).unwrap();
    }

    let received = async {
        let mut received = Vec::new();
        while received.len() < BURST {
            match bob.events.recv().await {
                Some(TransportEvent::InboundPayload { peer_id, envelope }) => {
                    assert_eq!(peer_id, anon.id);
                    match envelope.body {
                        Body::Text(text) => received.push(text[..3].to_string()),
                        Body::Binary(_) => panic!("unexpected binary body"),
                    }
                }
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
        received
    };
    let received = timeout(Duration::from_secs(30), received)
        .await
        .expect("burst did not arrive");

    let expected: Vec<String> = (0..BURST).map(|n| format!("{n:03}")).collect();
    assert_eq!(received, expected);
    assert!(anon.transport.is_open(&bob.id));
}

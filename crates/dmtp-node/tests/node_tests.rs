//! Node end-to-end tests over loopback sockets

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;

use dmtp_core::Message;
use dmtp_node::{
    discover_mapped_address, LocationDelegate, Node, NodeDelegate, SignatureProvider,
};
use dmtp_stun::attribute::kind as attr;
use dmtp_stun::message::kind as stun_kind;
use dmtp_stun::StunMessage;

/// Deterministic toy signer shared by every node in a test
struct FoldSigner;

impl SignatureProvider for FoldSigner {
    fn sign(&self, data: &[u8]) -> Bytes {
        let mut fold: u8 = 0x5A;
        for &byte in data {
            fold = fold.rotate_left(3) ^ byte;
        }
        Bytes::from(vec![b'F', fold])
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        self.sign(data) == signature
    }
}

#[derive(Default)]
struct Inbox {
    messages: Mutex<Vec<Message>>,
}

#[async_trait]
impl NodeDelegate for Inbox {
    async fn on_message(&self, message: Message, _source: SocketAddr) {
        self.messages.lock().push(message);
    }
}

async fn wait_for(mut probe: impl FnMut() -> bool) -> bool {
    for _ in 0..600 {
        if probe() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn open_node() -> Arc<Node> {
    let node = Node::open("127.0.0.1:0", Arc::new(FoldSigner)).await.unwrap();
    node.start();
    node
}

#[tokio::test]
async fn test_login_handshake_registers_signed_location() {
    let server = open_node().await;
    let client = open_node().await;

    client.login("alice", server.local_addr()).await;

    assert!(
        wait_for(|| !server.directory().get_locations("alice").is_empty()).await,
        "server never stored alice's location"
    );

    let locations = server.directory().get_locations("alice");
    assert_eq!(locations.len(), 1);
    let location = &locations[0];
    assert_eq!(location.identifier, "alice");
    // the server observed the client's socket on loopback
    assert_eq!(location.mapped, Some(client.local_addr()));
    assert_eq!(location.source, Some(client.local_addr()));
    assert!(location.signature.is_some());
    assert!(location.timestamp > 0);

    // the client kept its own signed record as well
    assert!(!client.directory().get_locations("alice").is_empty());

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_call_introduces_peers_and_message_goes_direct() {
    let server = open_node().await;
    let alice = open_node().await;
    let bob = open_node().await;

    let bob_inbox = Arc::new(Inbox::default());
    let bob_delegate: Arc<dyn NodeDelegate> = bob_inbox.clone();
    bob.set_delegate(&bob_delegate);

    alice.login("alice", server.local_addr()).await;
    bob.login("bob", server.local_addr()).await;
    assert!(wait_for(|| !server.directory().get_locations("alice").is_empty()).await);
    assert!(wait_for(|| !server.directory().get_locations("bob").is_empty()).await);

    // the first attempt finds no live session and falls back to CALL;
    // the introductions then let the hole punch converge
    let text = Bytes::from_static("你好 bob!".as_bytes());
    let mut delivered = false;
    for _ in 0..100 {
        if alice.send_message("bob", text.clone()).await {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(delivered, "alice never found a live session for bob");

    assert!(
        wait_for(|| !bob_inbox.messages.lock().is_empty()).await,
        "bob never received the message"
    );
    let received = bob_inbox.messages.lock();
    assert_eq!(received[0].sender, "alice");
    assert_eq!(received[0].receiver, "bob");
    assert_eq!(received[0].content, text);

    // the introduction also landed bob's location in alice's directory
    assert!(!alice.directory().get_locations("bob").is_empty());

    alice.stop();
    bob.stop();
    server.stop();
}

#[tokio::test]
async fn test_logout_clears_location_on_server() {
    let server = open_node().await;
    let client = open_node().await;

    client.login("carol", server.local_addr()).await;
    assert!(wait_for(|| !server.directory().get_locations("carol").is_empty()).await);

    client.logout().await.unwrap();
    assert!(
        wait_for(|| server.directory().get_locations("carol").is_empty()).await,
        "server kept carol's location after BYE"
    );

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_stun_probe_discovers_reflexive_address() {
    // a minimal STUN server: answer with the observed source address
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        loop {
            let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let Ok(request) = StunMessage::parse(&Bytes::copy_from_slice(&buf[..len])) else {
                continue;
            };
            let mut response =
                StunMessage::new(stun_kind::BINDING_RESPONSE, request.transaction_id);
            response
                .push_xor_address(attr::XOR_MAPPED_ADDRESS, from)
                .unwrap();
            let _ = socket.send_to(&response.encode(), from).await;
        }
    });

    let mapped = discover_mapped_address(server_addr, Duration::from_secs(2))
        .await
        .unwrap()
        .expect("no mapped address discovered");
    assert!(mapped.ip().is_loopback());
    assert_ne!(mapped.port(), 0);
}

#[tokio::test]
async fn test_stun_probe_times_out_quietly() {
    // a bound socket that never answers
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mapped = discover_mapped_address(silent.local_addr().unwrap(), Duration::from_millis(200))
        .await
        .unwrap();
    assert!(mapped.is_none());
}

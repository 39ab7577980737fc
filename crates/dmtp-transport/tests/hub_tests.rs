//! UDP hub integration tests (loopback sockets)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use dmtp_transport::{Connection, ConnectionDelegate, ConnectionStatus, HubConfig, UdpHub};

/// Poll until `probe` yields `Some`, or give up after ~2 seconds
async fn wait_for<T>(mut probe: impl FnMut() -> Option<T>) -> Option<T> {
    for _ in 0..200 {
        if let Some(found) = probe() {
            return Some(found);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

#[tokio::test]
async fn test_bind_and_exchange() {
    let alpha = UdpHub::bind("127.0.0.1:0").await.unwrap();
    let beta = UdpHub::bind("127.0.0.1:0").await.unwrap();
    beta.start();

    alpha
        .send(b"hello there", beta.local_addr())
        .await
        .unwrap();

    let cargo = wait_for(|| beta.receive()).await.expect("datagram lost");
    assert_eq!(cargo.data.as_ref(), b"hello there");
    assert_eq!(cargo.source, alpha.local_addr());
    assert_eq!(cargo.destination, beta.local_addr());

    alpha.close();
    beta.close();
}

#[tokio::test]
async fn test_ping_is_intercepted_and_answered() {
    let alpha = UdpHub::bind("127.0.0.1:0").await.unwrap();
    let beta = UdpHub::bind("127.0.0.1:0").await.unwrap();
    alpha.start();
    beta.start();

    // track beta so the answering PONG refreshes the received time
    let conn = alpha.connect(beta.local_addr());
    alpha.send(b"PING", beta.local_addr()).await.unwrap();

    wait_for(|| (conn.last_received_time() != 0).then_some(())).await
        .expect("no PONG came back");
    assert_eq!(conn.status(), ConnectionStatus::Connected);

    // neither heartbeat reached a cache
    assert_eq!(alpha.cached(), 0);
    assert_eq!(beta.cached(), 0);

    alpha.close();
    beta.close();
}

#[tokio::test]
async fn test_cache_drops_oldest_at_capacity() {
    let config = HubConfig {
        cache_limit: 3,
        ..HubConfig::default()
    };
    let sender = UdpHub::bind("127.0.0.1:0").await.unwrap();
    let receiver = UdpHub::bind_with_config("127.0.0.1:0", config).await.unwrap();
    receiver.start();

    for index in 0..4u8 {
        sender
            .send(&[b'#', index], receiver.local_addr())
            .await
            .unwrap();
    }
    // let the receive loop drain all four in arrival order
    wait_for(|| (receiver.cached() >= 3).then_some(())).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(receiver.cached(), 3);
    // oldest (#0) was dropped
    assert_eq!(receiver.receive().unwrap().data.as_ref(), &[b'#', 1]);
    assert_eq!(receiver.receive().unwrap().data.as_ref(), &[b'#', 2]);
    assert_eq!(receiver.receive().unwrap().data.as_ref(), &[b'#', 3]);
    assert!(receiver.receive().is_none());

    sender.close();
    receiver.close();
}

#[derive(Default)]
struct RecordingDelegate {
    transitions: Mutex<Vec<(ConnectionStatus, ConnectionStatus)>>,
    received: Mutex<usize>,
}

#[async_trait]
impl ConnectionDelegate for RecordingDelegate {
    async fn on_connection_status_changed(
        &self,
        _conn: &Arc<Connection>,
        old: ConnectionStatus,
        new: ConnectionStatus,
    ) {
        self.transitions.lock().push((old, new));
    }

    async fn on_connection_received_data(&self, _conn: &Arc<Connection>) {
        *self.received.lock() += 1;
    }
}

#[tokio::test]
async fn test_status_callbacks_fire_once_per_transition() {
    let alpha = UdpHub::bind("127.0.0.1:0").await.unwrap();
    let beta = UdpHub::bind("127.0.0.1:0").await.unwrap();
    alpha.start();
    beta.start();

    let recording = Arc::new(RecordingDelegate::default());
    let delegate: Arc<dyn ConnectionDelegate> = recording.clone();
    alpha.set_delegate(&delegate);

    alpha.connect(beta.local_addr());

    // first send: Default -> Connecting, exactly once
    alpha.send(b"one", beta.local_addr()).await.unwrap();
    alpha.send(b"two", beta.local_addr()).await.unwrap();
    {
        let transitions = recording.transitions.lock();
        assert_eq!(
            transitions.as_slice(),
            &[(ConnectionStatus::Default, ConnectionStatus::Connecting)]
        );
    }

    // an answer flips it to Connected, again exactly once
    beta.send(b"reply", alpha.local_addr()).await.unwrap();
    wait_for(|| {
        recording
            .transitions
            .lock()
            .iter()
            .any(|&(_, new)| new == ConnectionStatus::Connected)
            .then_some(())
    })
    .await
    .expect("no Connected transition");

    let transitions = recording.transitions.lock();
    assert_eq!(
        transitions.as_slice(),
        &[
            (ConnectionStatus::Default, ConnectionStatus::Connecting),
            (ConnectionStatus::Connecting, ConnectionStatus::Connected),
        ]
    );
    assert_eq!(*recording.received.lock(), 1);

    alpha.close();
    beta.close();
}

#[tokio::test]
async fn test_disconnect_forgets_the_connection() {
    let hub = UdpHub::bind("127.0.0.1:0").await.unwrap();
    let remote = "127.0.0.1:9999".parse().unwrap();

    hub.connect(remote);
    assert!(hub.connection(remote).is_some());
    assert!(hub.disconnect(remote));
    assert!(hub.connection(remote).is_none());
    assert!(!hub.disconnect(remote));
}

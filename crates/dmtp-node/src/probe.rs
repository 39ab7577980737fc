//! Reflexive address discovery
//!
//! A one-shot STUN binding exchange over an ephemeral socket. It runs
//! beside the node's own socket so STUN traffic never mixes into the
//! MTP receive cache.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::debug;

use dmtp_stun::StunMessage;

use crate::error::Result;

/// Ask a STUN server how it sees us; `None` when it stays silent or
/// answers garbage
pub async fn discover_mapped_address(
    stun_server: SocketAddr,
    timeout: Duration,
) -> Result<Option<SocketAddr>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let request = StunMessage::binding_request();
    socket.send_to(&request.encode(), stun_server).await?;

    let mut buf = vec![0u8; 2048];
    let (len, from) = match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
        Ok(received) => received?,
        Err(_) => {
            debug!("STUN server {} did not answer", stun_server);
            return Ok(None);
        }
    };
    let response = match StunMessage::parse(&Bytes::copy_from_slice(&buf[..len])) {
        Ok(response) => response,
        Err(e) => {
            debug!("unparseable STUN answer from {}: {}", from, e);
            return Ok(None);
        }
    };
    if response.transaction_id != request.transaction_id {
        debug!("STUN answer with foreign transaction id from {}", from);
        return Ok(None);
    }
    Ok(response.mapped_address())
}

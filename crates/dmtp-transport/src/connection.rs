//! Connection tracking
//!
//! A connection is nothing but a remote/local address pair with the last
//! send and receive timestamps; its status is derived, never stored:
//!
//! ```text
//!         //===============\\          (Sent)          //==============\\
//!         ||               || -----------------------> ||              ||
//!         ||    Default    ||                          ||  Connecting  ||
//!         || (Not Connect) || <----------------------- ||              ||
//!         \\===============//         (Timeout)        \\==============//
//!             A                                             |       |
//!             |       +------------- (Error) ---------------+       |
//!             |       V                                         (Received)
//!         //===============\\     (Sent)  //===========\\           |
//!         ||               || <---------- ||           ||           V
//!         ||     Error     ||             ||  Expired  ||      //==============\\
//!         ||               ||             ||           || <--- ||              ||
//!         \\===============//             \\===========//      ||  Connected   ||
//!             A      (Timeout)                  A  (Timeout)   ||              ||
//!             |                                 |              \\==============//
//!             +-------- //===============\\ ----+                   |
//!                       ||  Maintaining  || <--- (Received) --------+
//!                       \\===============//
//! ```
//!
//! Timestamps are atomics so a status transition is observed together
//! with the timestamp change that caused it; the `reported` cell makes
//! every transition surface through exactly one callback.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use dmtp_core::time::{self, Timestamp};

/// Seconds after which sent/received activity stops counting as recent
pub const EXPIRES: Timestamp = 28;

/// Seconds of silence after which a once-live connection is lost
pub const LONG_EXPIRES: Timestamp = 120;

/// Derived liveness label of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    /// Never sent, or the last send fell out of the activity window
    Default = 0,
    /// Sent recently, nothing received yet
    Connecting = 1,
    /// Sent and received recently
    Connected = 2,
    /// Received recently, sent not recently
    Maintaining = 3,
    /// Received long ago, sent recently (awaiting a response)
    Expired = 4,
    /// Silent beyond `LONG_EXPIRES` with stale sends: connection lost
    Error = 5,
}

impl ConnectionStatus {
    fn from_u8(code: u8) -> Self {
        match code {
            1 => ConnectionStatus::Connecting,
            2 => ConnectionStatus::Connected,
            3 => ConnectionStatus::Maintaining,
            4 => ConnectionStatus::Expired,
            5 => ConnectionStatus::Error,
            _ => ConnectionStatus::Default,
        }
    }

    /// Statuses the heartbeat keeps alive with a `PING`
    pub fn needs_ping(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Default | ConnectionStatus::Connecting | ConnectionStatus::Expired
        )
    }
}

/// Pure status derivation; identical inputs always yield an identical
/// status. Zero timestamps mean "never".
pub fn derive_status(now: Timestamp, sent: Timestamp, received: Timestamp) -> ConnectionStatus {
    let sent_recent = sent != 0 && now < sent + EXPIRES;
    let received_recent = received != 0 && now < received + EXPIRES;
    if received_recent {
        if sent_recent {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Maintaining
        }
    } else if sent_recent {
        if received == 0 {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Expired
        }
    } else if received != 0 && now > received + LONG_EXPIRES {
        ConnectionStatus::Error
    } else {
        ConnectionStatus::Default
    }
}

/// One tracked peer connection
#[derive(Debug)]
pub struct Connection {
    pub remote_address: SocketAddr,
    pub local_address: SocketAddr,
    last_sent: AtomicU32,
    last_received: AtomicU32,
    /// Last status surfaced through the delegate
    reported: AtomicU8,
}

impl Connection {
    pub fn new(remote_address: SocketAddr, local_address: SocketAddr) -> Self {
        Self {
            remote_address,
            local_address,
            last_sent: AtomicU32::new(0),
            last_received: AtomicU32::new(0),
            reported: AtomicU8::new(ConnectionStatus::Default as u8),
        }
    }

    pub fn last_sent_time(&self) -> Timestamp {
        self.last_sent.load(Ordering::Acquire)
    }

    pub fn last_received_time(&self) -> Timestamp {
        self.last_received.load(Ordering::Acquire)
    }

    /// Status at an explicit instant
    pub fn status_at(&self, now: Timestamp) -> ConnectionStatus {
        derive_status(now, self.last_sent_time(), self.last_received_time())
    }

    /// Status right now
    pub fn status(&self) -> ConnectionStatus {
        self.status_at(time::now())
    }

    /// Received something not too long ago
    pub fn is_connected(&self) -> bool {
        matches!(
            self.status(),
            ConnectionStatus::Connected | ConnectionStatus::Maintaining | ConnectionStatus::Expired
        )
    }

    pub fn is_error(&self) -> bool {
        self.status() == ConnectionStatus::Error
    }

    pub(crate) fn update_sent_time(&self, now: Timestamp) {
        self.last_sent.store(now, Ordering::Release);
    }

    pub(crate) fn update_received_time(&self, now: Timestamp) {
        self.last_received.store(now, Ordering::Release);
    }

    /// Publish the current status; returns `Some((old, new))` when it
    /// moved since the last publication. The swap makes concurrent
    /// observers report each transition exactly once.
    pub(crate) fn take_transition(&self, now: Timestamp) -> Option<(ConnectionStatus, ConnectionStatus)> {
        let new = self.status_at(now);
        let old = ConnectionStatus::from_u8(self.reported.swap(new as u8, Ordering::AcqRel));
        (old != new).then_some((old, new))
    }
}

//! Connection delegate trait

use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::{Connection, ConnectionStatus};

/// Callbacks a hub owner implements; the hub holds only a weak
/// back-reference, so the delegate may be replaced or dropped freely
#[async_trait]
pub trait ConnectionDelegate: Send + Sync {
    /// Fired exactly once per observed status transition, serialized per
    /// connection
    async fn on_connection_status_changed(
        &self,
        conn: &Arc<Connection>,
        old: ConnectionStatus,
        new: ConnectionStatus,
    );

    /// Fired after a datagram from a tracked connection entered the cache
    async fn on_connection_received_data(&self, conn: &Arc<Connection>);
}

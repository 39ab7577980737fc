//! Node error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Transport(#[from] dmtp_transport::TransportError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not logged in")]
    NotLoggedIn,
}

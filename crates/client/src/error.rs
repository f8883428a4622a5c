//! The five-kind error taxonomy (§7): protocol and transport errors are
//! connection-fatal, request errors are local failures reconstructed from a
//! [`PortableException`], timeout errors are local except a ping timeout
//! (connection-fatal), and user errors are illegal API use that leaves the
//! connection untouched.

use std::time::Duration;

use protocol::{PortableException, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] ConnectionError),

    #[error("request failed: {0}")]
    Request(#[from] PortableException),

    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    #[error("invalid use: {0}")]
    User(String),
}

/// Connection-fatal errors (§7 kind 2 Transport, kind 4 Timeout-as-ping).
#[derive(Debug, Error, Clone)]
pub enum ConnectionError {
    #[error("io error: {0}")]
    Io(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection closed")]
    Closed,
    #[error("ping timed out after {0:?}")]
    PingTimeout(Duration),
}

/// Local timeout errors (§5's four-level timeout taxonomy, minus the
/// connection-fatal ping case which is a [`ConnectionError`]).
#[derive(Debug, Error, Clone, Copy)]
pub enum TimeoutError {
    #[error("request timed out after {0:?}")]
    Request(Duration),
    #[error("execution timed out after {0:?}")]
    Execution(Duration),
}

pub type ClientResult<T> = Result<T, ClientError>;

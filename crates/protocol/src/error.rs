use thiserror::Error;

use crate::exception::PortableException;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Pof(#[from] pof::PofError),

    #[error("unknown message type id {0}")]
    UnknownMessageType(i32),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("remote exception: {0}")]
    Remote(#[from] PortableException),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

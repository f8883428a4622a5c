use thiserror::Error;

/// Errors that can occur while encoding or decoding a POF stream.
#[derive(Debug, Error)]
pub enum PofError {
    /// The underlying byte stream was truncated or otherwise malformed.
    #[error("io: {0}")]
    Io(String),

    /// A type-id appeared in the stream with no registration in the context.
    #[error("unknown type id {0}")]
    UnknownType(i32),

    /// A decoded user-type data version was negative.
    #[error("negative data version {0}")]
    Version(i32),

    /// A reference indicator pointed at an id that has not yet been read,
    /// or the reference table otherwise could not resolve the requested id.
    #[error("undefined reference to identity {0}")]
    Reference(i32),

    /// A decoded decimal exceeded the range of the local decimal type.
    #[error("decimal overflow: unscaled value does not fit in {0} bits")]
    Overflow(u32),

    /// A value was asked to decode itself against a serializer it doesn't match.
    #[error("type mismatch decoding user type {type_id}: {reason}")]
    TypeMismatch { type_id: i32, reason: String },
}

pub type PofResult<T> = Result<T, PofError>;

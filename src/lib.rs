//! Distributed in-memory cache client.
//!
//! This crate is a thin facade over three crates that do the actual work:
//! [`pof`] (the wire codec), `protocol` (envelope framing and the named-cache
//! message taxonomy), and `client` (channel multiplexing, the connection
//! handshake, and the initiator lifecycle). Most callers only need what's
//! re-exported at this top level; reach into `protocol::cache`/
//! `protocol::control` directly for the individual request/response types.

pub use client::{
    init_tracing, CacheEventListener, Channel, ClientConfig, ClientConfigBuilder, ClientError,
    ClientResult, Connection, ConnectionError, Initiator, InitiatorEvent, ListenerRegistry,
    LogDestination, LogFormat, NullReceiver, Receiver, TimeoutError,
};
pub use pof::{
    decode, decode_user, encode, encode_user, type_id as pof_type_id, Date, DateTime,
    DayTimeInterval, Decimal, DecimalWidth, PofContext, PofContextBuilder, PofError, PofResult,
    PofValue, Time, TimeZone, UserTypeDescriptor, UserTypeValue, YearMonthInterval,
};
pub use protocol::{
    cache, control, frame_body, split_frame, Envelope, Message, MessageContext, MessageFactory,
    MessageRegistry, MessageRegistryBuilder, PortableException, ProtocolError, ProtocolResult,
};

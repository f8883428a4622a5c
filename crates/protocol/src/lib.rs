//! Envelope framing, channel-0 control messages, and the named-cache
//! message taxonomy (§4.2-§4.5). This crate frames and routes messages; it
//! never interprets cache keys, values, filters, or processors, which pass
//! through as opaque POF values from whatever context the caller supplies.

pub mod cache;
pub mod control;
pub mod envelope;
pub mod error;
pub mod exception;
pub mod message;

pub use envelope::{frame_body, split_frame, Envelope};
pub use error::{ProtocolError, ProtocolResult};
pub use exception::PortableException;
pub use message::{Message, MessageContext, MessageFactory, MessageRegistry, MessageRegistryBuilder};

//! The `Message`/`MessageFactory` contract (§4.2).

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use pof::{PofReader, PofWriter};

use crate::cache::CacheEventMessage;
use crate::error::{ProtocolError, ProtocolResult};
use crate::exception::PortableException;

/// A single wire message: self-encoding, self-decoding, and able to act on
/// whatever inbound side effect it represents once decoded (§4.2's `run`).
///
/// `decode` populates an already-constructed default instance rather than
/// returning a new one, mirroring `MessageFactory::create` handing back a
/// blank instance for the reader to fill in — the factory needs to know the
/// concrete type before any bytes are read, so construction and decoding are
/// necessarily separate steps.
pub trait Message: Send + fmt::Debug + Any {
    fn type_id(&self) -> i32;
    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()>;
    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()>;

    /// Non-`None` for messages that complete a pending request by id — the
    /// channel's receive loop routes these straight to the pending-request
    /// table (§4.3) instead of calling `run`.
    fn request_id(&self) -> Option<u64> {
        None
    }

    /// Side effect for inbound messages that aren't request completions:
    /// one-way notifications and cache events.
    fn run(&self, _channel_id: u64, _ctx: &dyn MessageContext) {}

    /// Lets callers downcast a decoded `Box<dyn Message>` back to its
    /// concrete type (handshake responses, cache responses, and so on).
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The inbound side effects a decoded one-way [`Message`] can cause,
/// implemented by whatever owns the channel/connection state (the `client`
/// crate's `Channel`). Kept here, not there, so `protocol` has no
/// dependency on it.
pub trait MessageContext: Send + Sync {
    fn dispatch_cache_event(&self, channel_id: u64, event: CacheEventMessage);
    fn channel_closed(&self, channel_id: u64, cause: Option<PortableException>);
    fn connection_closed(&self, cause: Option<PortableException>);
}

/// Builds a blank [`Message`] instance for a given type-id, so the channel's
/// receive loop can decode into it without matching on the id itself.
pub trait MessageFactory: Send + Sync {
    fn create(&self, type_id: i32) -> ProtocolResult<Box<dyn Message>>;
}

/// A [`MessageFactory`] backed by a `{type-id -> constructor}` table —
/// "per-protocol-version numeric type-id to message factory" (§4.2),
/// specialized to one protocol version per registry instance.
#[derive(Default)]
pub struct MessageRegistry {
    constructors: HashMap<i32, fn() -> Box<dyn Message>>,
}

impl MessageRegistry {
    pub fn builder() -> MessageRegistryBuilder {
        MessageRegistryBuilder::default()
    }
}

impl MessageFactory for MessageRegistry {
    fn create(&self, type_id: i32) -> ProtocolResult<Box<dyn Message>> {
        let ctor = self
            .constructors
            .get(&type_id)
            .ok_or(ProtocolError::UnknownMessageType(type_id))?;
        Ok(ctor())
    }
}

#[derive(Default)]
pub struct MessageRegistryBuilder {
    constructors: HashMap<i32, fn() -> Box<dyn Message>>,
}

impl MessageRegistryBuilder {
    pub fn register(mut self, type_id: i32, ctor: fn() -> Box<dyn Message>) -> Self {
        self.constructors.insert(type_id, ctor);
        self
    }

    pub fn build(self) -> MessageRegistry {
        MessageRegistry {
            constructors: self.constructors,
        }
    }
}

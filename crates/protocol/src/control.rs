//! Channel-0 control messages (§4.4): connection and channel lifecycle,
//! plus liveness pings. These share channel 0's own small type-id space,
//! entirely separate from the named-cache protocol's ids in [`crate::cache`].

use std::collections::HashMap;

use pof::{PofReader, PofValue, PofWriter};

use crate::error::ProtocolError;
use crate::exception::PortableException;
use crate::message::{Message, MessageRegistry};

pub mod type_id {
    pub const OPEN_CONNECTION_REQUEST: i32 = 1;
    pub const OPEN_CONNECTION_RESPONSE: i32 = 2;
    pub const OPEN_CHANNEL_REQUEST: i32 = 3;
    pub const OPEN_CHANNEL_RESPONSE: i32 = 4;
    pub const PING_REQUEST: i32 = 5;
    pub const PING_RESPONSE: i32 = 6;
    pub const NOTIFY_CONNECTION_CLOSED: i32 = 7;
    pub const NOTIFY_CHANNEL_CLOSED: i32 = 8;
    pub const NOTIFY_STARTUP: i32 = 9;
    pub const NOTIFY_SHUTDOWN: i32 = 10;
}

fn props_map(properties: Vec<(i32, PofValue)>) -> HashMap<i32, PofValue> {
    properties.into_iter().collect()
}

fn take(map: &mut HashMap<i32, PofValue>, index: i32) -> Result<PofValue, ProtocolError> {
    map.remove(&index)
        .ok_or_else(|| ProtocolError::Malformed(format!("missing property {index}")))
}

fn as_u64(value: PofValue) -> Result<u64, ProtocolError> {
    match value {
        PofValue::Int64(n) => Ok(n as u64),
        PofValue::Int32(n) => Ok(n as u64),
        other => Err(ProtocolError::Malformed(format!("expected integer, got {other:?}"))),
    }
}

fn as_string(value: PofValue) -> Result<String, ProtocolError> {
    match value {
        PofValue::String(s) => Ok(s),
        other => Err(ProtocolError::Malformed(format!("expected string, got {other:?}"))),
    }
}

fn binary_to_value(bytes: &[u8]) -> PofValue {
    PofValue::UniformArray {
        element_type: pof::type_id::INT8,
        values: std::sync::Arc::new(bytes.iter().map(|b| PofValue::Int8(*b as i8)).collect()),
    }
}

fn value_to_binary(value: PofValue) -> Result<Vec<u8>, ProtocolError> {
    match value {
        PofValue::UniformArray { values, .. } => values
            .iter()
            .map(|v| match v {
                PofValue::Int8(b) => Ok(*b as u8),
                other => Err(ProtocolError::Malformed(format!(
                    "expected int8 element in binary, got {other:?}"
                ))),
            })
            .collect(),
        other => Err(ProtocolError::Malformed(format!("expected binary, got {other:?}"))),
    }
}

fn exception_value(exception: &Option<PortableException>) -> PofValue {
    match exception {
        None => PofValue::Nil,
        Some(e) => PofValue::Array(std::sync::Arc::new(vec![
            PofValue::String(e.class_name.clone()),
            PofValue::String(e.message.clone()),
        ])),
    }
}

fn value_exception(value: PofValue) -> Option<PortableException> {
    match value {
        PofValue::Nil => None,
        PofValue::Array(items) => {
            let mut items = (*items).clone();
            if items.len() < 2 {
                return None;
            }
            let message = match items.pop().unwrap() {
                PofValue::String(s) => s,
                _ => String::new(),
            };
            let class_name = match items.pop().unwrap() {
                PofValue::String(s) => s,
                _ => String::new(),
            };
            Some(PortableException {
                class_name,
                message,
                cause: None,
                stack_frames: Vec::new(),
            })
        }
        _ => None,
    }
}

/// The initiator's handshake: protocol/message-encoding negotiation and
/// member identification (§4.4).
#[derive(Debug, Clone, Default)]
pub struct OpenConnectionRequest {
    pub request_id: u64,
    /// An opaque credential — arbitrary bytes, not necessarily UTF-8.
    pub client_identity: Vec<u8>,
    pub protocol_version: i32,
}

impl Message for OpenConnectionRequest {
    fn type_id(&self) -> i32 {
        type_id::OPEN_CONNECTION_REQUEST
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, binary_to_value(&self.client_identity)),
            (2, PofValue::Int32(self.protocol_version)),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.client_identity = take(&mut map, 1).and_then(value_to_binary).unwrap_or_default();
        self.protocol_version = match take(&mut map, 2) {
            Ok(PofValue::Int32(n)) => n,
            _ => 0,
        };
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenConnectionResponse {
    pub request_id: u64,
    pub accepted_protocol_version: i32,
    pub rejection: Option<PortableException>,
}

impl Message for OpenConnectionResponse {
    fn type_id(&self) -> i32 {
        type_id::OPEN_CONNECTION_RESPONSE
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, PofValue::Int32(self.accepted_protocol_version)),
            (2, exception_value(&self.rejection)),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.accepted_protocol_version = match take(&mut map, 1) {
            Ok(PofValue::Int32(n)) => n,
            _ => 0,
        };
        self.rejection = take(&mut map, 2).ok().and_then(value_exception);
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

/// Opens a new channel bound to a named receiver — typically a single
/// named cache on this connection (§4.4).
#[derive(Debug, Clone, Default)]
pub struct OpenChannelRequest {
    pub request_id: u64,
    pub receiver_name: String,
}

impl Message for OpenChannelRequest {
    fn type_id(&self) -> i32 {
        type_id::OPEN_CHANNEL_REQUEST
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, PofValue::String(self.receiver_name.clone())),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.receiver_name = take(&mut map, 1).and_then(as_string).unwrap_or_default();
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenChannelResponse {
    pub request_id: u64,
    pub channel_id: u64,
    pub rejection: Option<PortableException>,
}

impl Message for OpenChannelResponse {
    fn type_id(&self) -> i32 {
        type_id::OPEN_CHANNEL_RESPONSE
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, PofValue::Int64(self.channel_id as i64)),
            (2, exception_value(&self.rejection)),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.channel_id = take(&mut map, 1).and_then(as_u64).unwrap_or(0);
        self.rejection = take(&mut map, 2).ok().and_then(value_exception);
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PingRequest {
    pub request_id: u64,
}

impl Message for PingRequest {
    fn type_id(&self) -> i32 {
        type_id::PING_REQUEST
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        writer.write_indexed_properties(0, &[(0, PofValue::Int64(self.request_id as i64))])
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PingResponse {
    pub request_id: u64,
}

impl Message for PingResponse {
    fn type_id(&self) -> i32 {
        type_id::PING_RESPONSE
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        writer.write_indexed_properties(0, &[(0, PofValue::Int64(self.request_id as i64))])
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

/// One-way notification that the whole connection has closed, carrying
/// the cause when the close wasn't graceful (§4.4).
#[derive(Debug, Clone, Default)]
pub struct NotifyConnectionClosed {
    pub cause: Option<PortableException>,
}

impl Message for NotifyConnectionClosed {
    fn type_id(&self) -> i32 {
        type_id::NOTIFY_CONNECTION_CLOSED
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        writer.write_indexed_properties(0, &[(0, exception_value(&self.cause))])
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.cause = take(&mut map, 0).ok().and_then(value_exception);
        Ok(())
    }

    fn run(&self, _channel_id: u64, ctx: &dyn crate::message::MessageContext) {
        ctx.connection_closed(self.cause.clone());
    }
}

/// One-way notification that a single channel has closed (§4.4).
#[derive(Debug, Clone, Default)]
pub struct NotifyChannelClosed {
    pub cause: Option<PortableException>,
}

impl Message for NotifyChannelClosed {
    fn type_id(&self) -> i32 {
        type_id::NOTIFY_CHANNEL_CLOSED
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        writer.write_indexed_properties(0, &[(0, exception_value(&self.cause))])
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.cause = take(&mut map, 0).ok().and_then(value_exception);
        Ok(())
    }

    fn run(&self, channel_id: u64, ctx: &dyn crate::message::MessageContext) {
        ctx.channel_closed(channel_id, self.cause.clone());
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotifyStartup;

impl Message for NotifyStartup {
    fn type_id(&self) -> i32 {
        type_id::NOTIFY_STARTUP
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        writer.write_indexed_properties(0, &[])
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        reader.read_indexed_properties()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotifyShutdown;

impl Message for NotifyShutdown {
    fn type_id(&self) -> i32 {
        type_id::NOTIFY_SHUTDOWN
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        writer.write_indexed_properties(0, &[])
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        reader.read_indexed_properties()?;
        Ok(())
    }
}

/// The channel-0 control protocol's factory, scoped to its own 1-10
/// type-id space (§4.4).
pub fn control_registry() -> MessageRegistry {
    MessageRegistry::builder()
        .register(type_id::OPEN_CONNECTION_REQUEST, || {
            Box::new(OpenConnectionRequest::default())
        })
        .register(type_id::OPEN_CONNECTION_RESPONSE, || {
            Box::new(OpenConnectionResponse::default())
        })
        .register(type_id::OPEN_CHANNEL_REQUEST, || {
            Box::new(OpenChannelRequest::default())
        })
        .register(type_id::OPEN_CHANNEL_RESPONSE, || {
            Box::new(OpenChannelResponse::default())
        })
        .register(type_id::PING_REQUEST, || Box::new(PingRequest::default()))
        .register(type_id::PING_RESPONSE, || Box::new(PingResponse::default()))
        .register(type_id::NOTIFY_CONNECTION_CLOSED, || {
            Box::new(NotifyConnectionClosed::default())
        })
        .register(type_id::NOTIFY_CHANNEL_CLOSED, || {
            Box::new(NotifyChannelClosed::default())
        })
        .register(type_id::NOTIFY_STARTUP, || Box::new(NotifyStartup))
        .register(type_id::NOTIFY_SHUTDOWN, || Box::new(NotifyShutdown))
        .build()
}

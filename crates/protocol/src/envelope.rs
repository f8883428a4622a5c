//! The fixed `(channel-id, message-type-id)` prefix every frame carries
//! ahead of its POF body (§4.2, §6).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use pof::varint::{read_svarint32, read_uvarint, write_svarint32, write_uvarint};

use crate::error::{ProtocolError, ProtocolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub channel_id: u64,
    pub message_type_id: i32,
}

impl Envelope {
    pub fn new(channel_id: u64, message_type_id: i32) -> Self {
        Self {
            channel_id,
            message_type_id,
        }
    }

    pub fn write(&self, out: &mut BytesMut) {
        write_uvarint(out, self.channel_id);
        write_svarint32(out, self.message_type_id);
    }

    pub fn read(buf: &mut Bytes) -> ProtocolResult<Self> {
        let channel_id = read_uvarint(buf).map_err(ProtocolError::Pof)?;
        let message_type_id = read_svarint32(buf).map_err(ProtocolError::Pof)?;
        Ok(Self {
            channel_id,
            message_type_id,
        })
    }
}

/// Prepends the envelope to an already-encoded POF body, ready to hand to
/// the connection's length-prefix framer.
pub fn frame_body(envelope: Envelope, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(10 + body.len());
    envelope.write(&mut out);
    out.put_slice(body);
    out.freeze()
}

/// Splits a decoded frame into its envelope and the remaining POF body.
pub fn split_frame(mut frame: Bytes) -> ProtocolResult<(Envelope, Bytes)> {
    let envelope = Envelope::read(&mut frame)?;
    Ok((envelope, frame.copy_to_bytes(frame.remaining())))
}

//! Portable Object Format: a self-describing, reference-aware binary codec.
//!
//! A [`PofValue`] tree is the generic representation every wire value
//! decodes to; a [`PofContext`] additionally lets a registered Rust type
//! encode and decode directly via [`encode_user`]/[`decode_user`] without
//! passing through the generic tree at the call site.

mod context;
mod error;
mod identity;
mod reader;
mod value;
pub mod varint;
mod writer;

use std::any::Any;

use bytes::{Bytes, BytesMut};

pub use context::{PofContext, PofContextBuilder, UserTypeDescriptor, UserTypeSerializer};
pub use error::{PofError, PofResult};
pub use reader::{decode, PofReader};
pub use value::{
    type_id, Date, DateTime, DayTimeInterval, Decimal, DecimalWidth, PofValue, Time, TimeZone,
    UserTypeValue, YearMonthInterval,
};
pub use writer::{encode, PofWriter};

/// Encodes a concrete registered Rust type directly, without the caller
/// building a [`PofValue::UserType`] tree by hand.
pub fn encode_user(context: &PofContext, type_id: i32, value: &dyn Any) -> PofResult<Bytes> {
    let mut buf = BytesMut::new();
    {
        let mut writer = PofWriter::new(&mut buf, context);
        writer.write_user_object(type_id, value)?;
    }
    Ok(buf.freeze())
}

/// Decodes `bytes` as an instance of the Rust type registered under
/// `type_id`, downcasting the result to `T`.
pub fn decode_user<T: 'static>(context: &PofContext, type_id: i32, bytes: &[u8]) -> PofResult<T> {
    let mut buf = Bytes::copy_from_slice(bytes);
    let mut reader = PofReader::new(&mut buf, context);
    let boxed = reader.read_user_object(type_id)?;
    boxed
        .downcast::<T>()
        .map(|b| *b)
        .map_err(|_| PofError::TypeMismatch {
            type_id,
            reason: "decoded value has unexpected Rust type".into(),
        })
}

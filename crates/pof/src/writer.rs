//! POF encoder (§4.1).

use std::any::Any;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::context::PofContext;
use crate::error::{PofError, PofResult};
use crate::identity::EncodeIdentities;
use crate::value::{type_id, Decimal, DecimalWidth, PofValue, TimeZone, UserTypeValue};
use crate::varint::{write_svarint, write_svarint128, write_svarint32, write_uvarint};

pub struct PofWriter<'a> {
    buf: &'a mut BytesMut,
    context: &'a PofContext,
    identities: EncodeIdentities,
}

impl<'a> PofWriter<'a> {
    pub fn new(buf: &'a mut BytesMut, context: &'a PofContext) -> Self {
        Self {
            buf,
            context,
            identities: EncodeIdentities::default(),
        }
    }

    pub fn context(&self) -> &PofContext {
        self.context
    }

    fn write_indicator(&mut self, id: i32) {
        write_svarint32(self.buf, id);
    }

    /// Writes `value`'s type indicator and payload, transparently emitting
    /// an identity or reference marker first when reference tracking is on
    /// and `value` is a reference-capable composite (§4.1).
    pub fn write_value(&mut self, value: &PofValue) -> PofResult<()> {
        if self.context.reference_tracking() {
            if let Some(ptr) = value.identity_ptr() {
                let (id, is_ref) = self.identities.check(ptr);
                if is_ref {
                    self.write_indicator(type_id::REFERENCE);
                    write_svarint(self.buf, i64::from(id));
                    return Ok(());
                }
                self.write_indicator(type_id::IDENTITY);
                write_svarint(self.buf, i64::from(id));
            }
        }
        self.write_value_body(value)
    }

    fn write_value_body(&mut self, value: &PofValue) -> PofResult<()> {
        match value {
            PofValue::Nil => self.write_indicator(type_id::NIL),
            PofValue::Boolean(b) => {
                self.write_indicator(type_id::BOOLEAN);
                self.buf.put_u8(u8::from(*b));
            }
            PofValue::Int8(v) => {
                self.write_indicator(type_id::INT8);
                write_svarint(self.buf, i64::from(*v));
            }
            PofValue::Int16(v) => {
                self.write_indicator(type_id::INT16);
                write_svarint(self.buf, i64::from(*v));
            }
            PofValue::Int32(v) => {
                self.write_indicator(type_id::INT32);
                write_svarint(self.buf, i64::from(*v));
            }
            PofValue::Int64(v) => {
                self.write_indicator(type_id::INT64);
                write_svarint(self.buf, *v);
            }
            PofValue::Int128(v) => {
                self.write_indicator(type_id::INT128);
                write_svarint128(self.buf, *v);
            }
            PofValue::Float32(v) => {
                self.write_indicator(type_id::FLOAT32);
                self.buf.put_f32(*v);
            }
            PofValue::Float64(v) => {
                self.write_indicator(type_id::FLOAT64);
                self.buf.put_f64(*v);
            }
            PofValue::Decimal32(d) => {
                self.write_indicator(type_id::DECIMAL32);
                self.write_decimal(*d, DecimalWidth::D32)?;
            }
            PofValue::Decimal64(d) => {
                self.write_indicator(type_id::DECIMAL64);
                self.write_decimal(*d, DecimalWidth::D64)?;
            }
            PofValue::Decimal128(d) => {
                self.write_indicator(type_id::DECIMAL128);
                self.write_decimal(*d, DecimalWidth::D128)?;
            }
            PofValue::Char(c) => {
                self.write_indicator(type_id::CHAR);
                write_uvarint(self.buf, u64::from(*c as u32));
            }
            PofValue::String(s) => {
                self.write_indicator(type_id::STRING);
                self.write_str(s);
            }
            PofValue::Date(d) => {
                self.write_indicator(type_id::DATE);
                write_svarint32(self.buf, d.year);
                self.buf.put_u8(d.month);
                self.buf.put_u8(d.day);
            }
            PofValue::Time(t) => {
                self.write_indicator(type_id::TIME);
                self.write_time(t);
            }
            PofValue::DateTime(dt) => {
                self.write_indicator(type_id::DATETIME);
                write_svarint32(self.buf, dt.date.year);
                self.buf.put_u8(dt.date.month);
                self.buf.put_u8(dt.date.day);
                self.write_time(&dt.time);
            }
            PofValue::YearMonthInterval(v) => {
                self.write_indicator(type_id::YEAR_MONTH_INTERVAL);
                write_svarint32(self.buf, v.years);
                write_svarint32(self.buf, v.months);
            }
            PofValue::TimeInterval(v) => {
                self.write_indicator(type_id::TIME_INTERVAL);
                write_svarint32(self.buf, v.hours);
                write_svarint32(self.buf, v.minutes);
                write_svarint32(self.buf, v.seconds);
                write_svarint32(self.buf, v.nanos);
            }
            PofValue::DayTimeInterval(v) => {
                self.write_indicator(type_id::DAY_TIME_INTERVAL);
                write_svarint32(self.buf, v.days);
                write_svarint32(self.buf, v.hours);
                write_svarint32(self.buf, v.minutes);
                write_svarint32(self.buf, v.seconds);
                write_svarint32(self.buf, v.nanos);
            }
            PofValue::Array(items) => {
                self.write_indicator(type_id::ARRAY);
                self.write_array_body(items)?;
            }
            PofValue::Collection(items) => {
                self.write_indicator(type_id::COLLECTION);
                self.write_array_body(items)?;
            }
            PofValue::UniformArray {
                element_type,
                values,
            } => {
                self.write_indicator(type_id::UNIFORM_ARRAY);
                self.write_uniform_array_body(*element_type, values)?;
            }
            PofValue::UniformCollection {
                element_type,
                values,
            } => {
                self.write_indicator(type_id::UNIFORM_COLLECTION);
                self.write_uniform_array_body(*element_type, values)?;
            }
            PofValue::Map(entries) => {
                self.write_indicator(type_id::MAP);
                self.write_map_body(entries)?;
            }
            PofValue::UniformKeysMap { key_type, entries } => {
                self.write_indicator(type_id::UNIFORM_KEYS_MAP);
                write_svarint32(self.buf, *key_type);
                write_uvarint(self.buf, entries.len() as u64);
                for (k, v) in entries.iter() {
                    self.write_value_body(k)?;
                    self.write_value(v)?;
                }
            }
            PofValue::UniformMap {
                key_type,
                value_type,
                entries,
            } => {
                self.write_indicator(type_id::UNIFORM_MAP);
                write_svarint32(self.buf, *key_type);
                write_svarint32(self.buf, *value_type);
                write_uvarint(self.buf, entries.len() as u64);
                for (k, v) in entries.iter() {
                    self.write_value_body(k)?;
                    self.write_value_body(v)?;
                }
            }
            PofValue::SparseArray(entries) => {
                self.write_indicator(type_id::SPARSE_ARRAY);
                write_uvarint(self.buf, entries.len() as u64);
                for (idx, v) in entries.iter() {
                    write_uvarint(self.buf, *idx as u64);
                    self.write_value(v)?;
                }
                write_svarint32(self.buf, -1);
            }
            PofValue::UniformSparseArray {
                element_type,
                entries,
            } => {
                self.write_indicator(type_id::UNIFORM_SPARSE_ARRAY);
                write_svarint32(self.buf, *element_type);
                write_uvarint(self.buf, entries.len() as u64);
                for (idx, v) in entries.iter() {
                    write_uvarint(self.buf, *idx as u64);
                    self.write_value_body(v)?;
                }
                write_svarint32(self.buf, -1);
            }
            PofValue::UserType(ut) => {
                self.write_indicator(ut.type_id);
                self.write_user_type_body(ut)?;
            }
        }
        Ok(())
    }

    fn write_array_body(&mut self, items: &Arc<Vec<PofValue>>) -> PofResult<()> {
        write_uvarint(self.buf, items.len() as u64);
        for item in items.iter() {
            self.write_value(item)?;
        }
        Ok(())
    }

    fn write_uniform_array_body(
        &mut self,
        element_type: i32,
        values: &Arc<Vec<PofValue>>,
    ) -> PofResult<()> {
        write_svarint32(self.buf, element_type);
        write_uvarint(self.buf, values.len() as u64);
        for item in values.iter() {
            self.write_value_body(item)?;
        }
        Ok(())
    }

    fn write_map_body(&mut self, entries: &Arc<Vec<(PofValue, PofValue)>>) -> PofResult<()> {
        write_uvarint(self.buf, entries.len() as u64);
        for (k, v) in entries.iter() {
            self.write_value(k)?;
            self.write_value(v)?;
        }
        Ok(())
    }

    /// Writes a user-type envelope: `type-id` was already written by the
    /// caller (it doubles as the outer value's type indicator); this writes
    /// `data-version, (property-index, value)*, remainder-or-terminator`.
    fn write_user_type_body(&mut self, ut: &UserTypeValue) -> PofResult<()> {
        let on_wire_version = if self.context.is_registered(ut.type_id) {
            let descriptor = self.context.descriptor(ut.type_id)?;
            ut.data_version.max(descriptor.impl_version)
        } else {
            ut.data_version
        };
        self.write_indexed_properties(on_wire_version, &ut.properties)?;
        self.buf.put_slice(&ut.remainder);
        Ok(())
    }

    /// Writes `data-version, (property-index, value)*, -1` — the same
    /// indexed-property envelope a user type's body uses, without the
    /// leading type-id indicator. Shared with callers that already have an
    /// identifier for the shape elsewhere (a message-type-id in an envelope,
    /// for instance) and so don't need POF's own type-id redundantly.
    pub fn write_indexed_properties(
        &mut self,
        data_version: i32,
        properties: &[(i32, PofValue)],
    ) -> PofResult<()> {
        write_svarint32(self.buf, data_version);
        let mut last_index = -1i32;
        for (index, value) in properties {
            debug_assert!(
                *index > last_index,
                "properties must be written in ascending index order"
            );
            last_index = *index;
            write_uvarint(self.buf, *index as u64);
            self.write_value(value)?;
        }
        write_svarint32(self.buf, -1);
        Ok(())
    }

    /// Encodes a concrete registered Rust type via its
    /// [`UserTypeSerializer`](crate::context::UserTypeSerializer). The data
    /// version is the registered impl-version unless the serializer's
    /// property list carries indices it inherited from a newer version it
    /// round-tripped without fully understanding, in which case the
    /// serializer is expected to report that via `to_properties` alone —
    /// the envelope here always advertises this binary's own impl-version.
    pub fn write_user_object(&mut self, type_id_val: i32, value: &dyn Any) -> PofResult<()> {
        let impl_version = self.context.descriptor(type_id_val)?.impl_version;
        let serializer = self.context.serializer(type_id_val)?.clone();
        let properties = serializer.to_properties(value)?;
        let ut = UserTypeValue {
            type_id: type_id_val,
            data_version: impl_version,
            properties,
            remainder: Vec::new(),
        };
        self.write_indicator(type_id_val);
        self.write_user_type_body(&ut)
    }

    fn write_decimal(&mut self, d: Decimal, width: DecimalWidth) -> PofResult<()> {
        if !d.fits(width) {
            let bits = match width {
                DecimalWidth::D32 => 32,
                DecimalWidth::D64 => 64,
                DecimalWidth::D128 => 128,
            };
            return Err(PofError::Overflow(bits));
        }
        write_svarint32(self.buf, d.scale);
        write_svarint128(self.buf, d.unscaled);
        Ok(())
    }

    fn write_time(&mut self, t: &crate::value::Time) {
        self.buf.put_u8(t.hour);
        self.buf.put_u8(t.minute);
        self.buf.put_u8(t.second);
        write_uvarint(self.buf, u64::from(t.nanos));
        match t.zone {
            TimeZone::None => self.buf.put_u8(0),
            TimeZone::Utc => self.buf.put_u8(1),
            TimeZone::Offset { hour, minute } => {
                self.buf.put_u8(2);
                self.buf.put_i8(hour);
                self.buf.put_i8(minute);
            }
        }
    }

    fn write_str(&mut self, s: &str) {
        write_uvarint(self.buf, s.len() as u64);
        self.buf.put_slice(s.as_bytes());
    }
}

/// Encodes a single top-level value against `context`, producing a
/// self-contained byte slice decodable by [`crate::reader::decode`].
pub fn encode(context: &PofContext, value: &PofValue) -> PofResult<Bytes> {
    let mut buf = BytesMut::new();
    {
        let mut writer = PofWriter::new(&mut buf, context);
        writer.write_value(value)?;
    }
    Ok(buf.freeze())
}

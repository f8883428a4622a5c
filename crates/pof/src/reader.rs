//! POF decoder (§4.1).

use std::any::Any;
use std::sync::Arc;

use bytes::{Buf, Bytes};

use crate::context::PofContext;
use crate::error::{PofError, PofResult};
use crate::identity::DecodeIdentities;
use crate::value::{
    type_id, Date, DateTime, DayTimeInterval, Decimal, PofValue, Time, TimeZone,
    UserTypeValue, YearMonthInterval,
};
use crate::varint::{read_svarint, read_svarint128, read_svarint32, read_uvarint};

pub struct PofReader<'a> {
    buf: &'a mut Bytes,
    context: &'a PofContext,
    identities: DecodeIdentities,
}

impl<'a> PofReader<'a> {
    pub fn new(buf: &'a mut Bytes, context: &'a PofContext) -> Self {
        Self {
            buf,
            context,
            identities: DecodeIdentities::default(),
        }
    }

    pub fn context(&self) -> &PofContext {
        self.context
    }

    fn read_indicator(&mut self) -> PofResult<i32> {
        read_svarint32(self.buf)
    }

    /// Reads one value, transparently resolving identity/reference markers
    /// before reading a real type indicator (§4.1).
    pub fn read_value(&mut self) -> PofResult<PofValue> {
        let indicator = self.read_indicator()?;
        match indicator {
            type_id::REFERENCE => {
                let id = read_svarint32(self.buf)?;
                self.identities.resolve(id)
            }
            type_id::IDENTITY => {
                let _assigned_id = read_svarint32(self.buf)?;
                let id = self.identities.reserve();
                let inner_indicator = self.read_indicator()?;
                let value = self.read_value_body(inner_indicator)?;
                self.identities.fill(id, value.clone());
                Ok(value)
            }
            other => self.read_value_body(other),
        }
    }

    /// Like [`Self::read_value`] but for positions that never carry an
    /// identity/reference marker (uniform-container elements, map keys that
    /// are already known to be scalar, etc.) — the indicator is the real
    /// type indicator.
    fn read_value_no_ref(&mut self) -> PofResult<PofValue> {
        let indicator = self.read_indicator()?;
        self.read_value_body(indicator)
    }

    fn read_value_body(&mut self, indicator: i32) -> PofResult<PofValue> {
        use type_id::*;
        Ok(match indicator {
            NIL => PofValue::Nil,
            BOOLEAN => PofValue::Boolean(self.require(1)?.get_u8() != 0),
            INT8 => PofValue::Int8(read_svarint(self.buf)? as i8),
            INT16 => PofValue::Int16(read_svarint(self.buf)? as i16),
            INT32 => PofValue::Int32(read_svarint32(self.buf)?),
            INT64 => PofValue::Int64(read_svarint(self.buf)?),
            INT128 => PofValue::Int128(read_svarint128(self.buf)?),
            FLOAT32 => PofValue::Float32(self.require(4)?.get_f32()),
            FLOAT64 => PofValue::Float64(self.require(8)?.get_f64()),
            DECIMAL32 => PofValue::Decimal32(self.read_decimal()?),
            DECIMAL64 => PofValue::Decimal64(self.read_decimal()?),
            DECIMAL128 => PofValue::Decimal128(self.read_decimal()?),
            CHAR => {
                let code = read_uvarint(self.buf)? as u32;
                PofValue::Char(char::from_u32(code).ok_or(PofError::Io("invalid char".into()))?)
            }
            STRING => PofValue::String(self.read_str()?),
            DATE => PofValue::Date(self.read_date()?),
            TIME => PofValue::Time(self.read_time()?),
            DATETIME => {
                let date = self.read_date()?;
                let time = self.read_time()?;
                PofValue::DateTime(DateTime { date, time })
            }
            YEAR_MONTH_INTERVAL => PofValue::YearMonthInterval(YearMonthInterval {
                years: read_svarint32(self.buf)?,
                months: read_svarint32(self.buf)?,
            }),
            TIME_INTERVAL => PofValue::TimeInterval(crate::value::TimeInterval {
                hours: read_svarint32(self.buf)?,
                minutes: read_svarint32(self.buf)?,
                seconds: read_svarint32(self.buf)?,
                nanos: read_svarint32(self.buf)?,
            }),
            DAY_TIME_INTERVAL => PofValue::DayTimeInterval(DayTimeInterval {
                days: read_svarint32(self.buf)?,
                hours: read_svarint32(self.buf)?,
                minutes: read_svarint32(self.buf)?,
                seconds: read_svarint32(self.buf)?,
                nanos: read_svarint32(self.buf)?,
            }),
            ARRAY => PofValue::Array(Arc::new(self.read_array_body()?)),
            COLLECTION => PofValue::Collection(Arc::new(self.read_array_body()?)),
            UNIFORM_ARRAY => {
                let (element_type, values) = self.read_uniform_array_body()?;
                PofValue::UniformArray {
                    element_type,
                    values: Arc::new(values),
                }
            }
            UNIFORM_COLLECTION => {
                let (element_type, values) = self.read_uniform_array_body()?;
                PofValue::UniformCollection {
                    element_type,
                    values: Arc::new(values),
                }
            }
            MAP => PofValue::Map(Arc::new(self.read_map_body()?)),
            UNIFORM_KEYS_MAP => {
                let key_type = read_svarint32(self.buf)?;
                let len = read_uvarint(self.buf)? as usize;
                let mut entries = Vec::with_capacity(len);
                for _ in 0..len {
                    let k = self.read_value_no_ref()?;
                    let v = self.read_value()?;
                    entries.push((k, v));
                }
                PofValue::UniformKeysMap {
                    key_type,
                    entries: Arc::new(entries),
                }
            }
            UNIFORM_MAP => {
                let key_type = read_svarint32(self.buf)?;
                let value_type = read_svarint32(self.buf)?;
                let len = read_uvarint(self.buf)? as usize;
                let mut entries = Vec::with_capacity(len);
                for _ in 0..len {
                    let k = self.read_value_no_ref()?;
                    let v = self.read_value_no_ref()?;
                    entries.push((k, v));
                }
                PofValue::UniformMap {
                    key_type,
                    value_type,
                    entries: Arc::new(entries),
                }
            }
            SPARSE_ARRAY => {
                let len_hint = read_uvarint(self.buf)? as usize;
                let mut entries = Vec::with_capacity(len_hint);
                loop {
                    let idx = read_svarint32(self.buf)?;
                    if idx < 0 {
                        break;
                    }
                    let v = self.read_value()?;
                    entries.push((idx, v));
                }
                PofValue::SparseArray(Arc::new(entries))
            }
            UNIFORM_SPARSE_ARRAY => {
                let element_type = read_svarint32(self.buf)?;
                let len_hint = read_uvarint(self.buf)? as usize;
                let mut entries = Vec::with_capacity(len_hint);
                loop {
                    let idx = read_svarint32(self.buf)?;
                    if idx < 0 {
                        break;
                    }
                    let v = self.read_value_no_ref()?;
                    entries.push((idx, v));
                }
                PofValue::UniformSparseArray {
                    element_type,
                    entries: Arc::new(entries),
                }
            }
            tid if tid >= 0 => PofValue::UserType(Arc::new(self.read_user_type_body(tid)?)),
            other => return Err(PofError::UnknownType(other)),
        })
    }

    fn read_array_body(&mut self) -> PofResult<Vec<PofValue>> {
        let len = read_uvarint(self.buf)? as usize;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(self.read_value()?);
        }
        Ok(items)
    }

    fn read_uniform_array_body(&mut self) -> PofResult<(i32, Vec<PofValue>)> {
        let element_type = read_svarint32(self.buf)?;
        let len = read_uvarint(self.buf)? as usize;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(self.read_value_no_ref()?);
        }
        Ok((element_type, items))
    }

    fn read_map_body(&mut self) -> PofResult<Vec<(PofValue, PofValue)>> {
        let len = read_uvarint(self.buf)? as usize;
        let mut entries = Vec::with_capacity(len);
        for _ in 0..len {
            let k = self.read_value()?;
            let v = self.read_value()?;
            entries.push((k, v));
        }
        Ok(entries)
    }

    /// Reads `data-version, (property-index, value)*, remainder-or-
    /// terminator` for a user type whose type-id was already consumed as
    /// the outer indicator (§4.1).
    fn read_user_type_body(&mut self, type_id_val: i32) -> PofResult<UserTypeValue> {
        let (data_version, properties) = self.read_indexed_properties()?;
        // POF is self-describing, so a property index this binary doesn't
        // know about still decodes correctly — it just lands in `properties`
        // as an entry the caller's schema doesn't have a field for.
        // Evolvability therefore falls out of preserving the full property
        // list, not out of stashing raw trailing bytes; `remainder` stays
        // empty for values built from the generic reader and only exists so
        // a `UserTypeSerializer` can round-trip indices it doesn't recognize
        // by keeping them out of `properties` and re-emitting them verbatim.
        Ok(UserTypeValue {
            type_id: type_id_val,
            data_version,
            properties,
            remainder: Vec::new(),
        })
    }

    /// Reads `data-version, (property-index, value)*, -1` without a leading
    /// type-id indicator — the counterpart to
    /// [`PofWriter::write_indexed_properties`](crate::writer::PofWriter::write_indexed_properties).
    pub fn read_indexed_properties(&mut self) -> PofResult<(i32, Vec<(i32, PofValue)>)> {
        let data_version = read_svarint32(self.buf)?;
        if data_version < 0 {
            return Err(PofError::Version(data_version));
        }
        let mut properties = Vec::new();
        let mut last_index = -1i32;
        loop {
            let index = read_svarint32(self.buf)?;
            if index < 0 {
                break;
            }
            if index <= last_index {
                return Err(PofError::Io(format!(
                    "property index {index} out of ascending order"
                )));
            }
            last_index = index;
            properties.push((index, self.read_value()?));
        }
        Ok((data_version, properties))
    }

    /// Decodes a value known to be a registered user type, producing the
    /// concrete Rust type via its [`UserTypeSerializer`](crate::context::UserTypeSerializer)
    /// rather than the generic [`PofValue::UserType`] tree.
    pub fn read_user_object(&mut self, expected_type_id: i32) -> PofResult<Box<dyn Any>> {
        let indicator = self.read_indicator()?;
        if indicator != expected_type_id {
            return Err(PofError::TypeMismatch {
                type_id: indicator,
                reason: format!("expected user type {expected_type_id}"),
            });
        }
        let ut = self.read_user_type_body(indicator)?;
        let serializer = self.context.serializer(expected_type_id)?.clone();
        serializer.from_properties(ut.properties, ut.data_version)
    }

    fn read_decimal(&mut self) -> PofResult<Decimal> {
        let scale = read_svarint32(self.buf)?;
        let unscaled = read_svarint128(self.buf)?;
        Ok(Decimal { unscaled, scale })
    }

    fn read_date(&mut self) -> PofResult<Date> {
        Ok(Date {
            year: read_svarint32(self.buf)?,
            month: self.require(1)?.get_u8(),
            day: self.require(1)?.get_u8(),
        })
    }

    fn read_time(&mut self) -> PofResult<Time> {
        let hour = self.require(1)?.get_u8();
        let minute = self.require(1)?.get_u8();
        let second = self.require(1)?.get_u8();
        let nanos = read_uvarint(self.buf)? as u32;
        let zone_tag = self.require(1)?.get_u8();
        let zone = match zone_tag {
            0 => TimeZone::None,
            1 => TimeZone::Utc,
            2 => TimeZone::Offset {
                hour: self.require(1)?.get_i8(),
                minute: self.require(1)?.get_i8(),
            },
            other => return Err(PofError::Io(format!("invalid time zone tag {other}"))),
        };
        Ok(Time {
            hour,
            minute,
            second,
            nanos,
            zone,
        })
    }

    fn read_str(&mut self) -> PofResult<String> {
        let len = read_uvarint(self.buf)? as usize;
        if self.buf.remaining() < len {
            return Err(PofError::Io("truncated string".into()));
        }
        let bytes = self.buf.copy_to_bytes(len);
        String::from_utf8(bytes.to_vec()).map_err(|e| PofError::Io(e.to_string()))
    }

    fn require(&mut self, n: usize) -> PofResult<&mut Bytes> {
        if self.buf.remaining() < n {
            return Err(PofError::Io("truncated value".into()));
        }
        Ok(self.buf)
    }
}

/// Decodes a single top-level value, as produced by [`crate::writer::encode`].
pub fn decode(context: &PofContext, bytes: &[u8]) -> PofResult<PofValue> {
    let mut buf = Bytes::copy_from_slice(bytes);
    let mut reader = PofReader::new(&mut buf, context);
    reader.read_value()
}

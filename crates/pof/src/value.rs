//! The POF value tree (§3 "POF value") and its composite/intrinsic shapes.

use std::sync::Arc;

/// Negative type indicators naming POF intrinsics (§4.1), and the two
/// reserved non-type indicators (identity, reference).
pub mod type_id {
    pub const BOOLEAN: i32 = -1;
    pub const INT8: i32 = -2;
    pub const INT16: i32 = -3;
    pub const INT32: i32 = -4;
    pub const INT64: i32 = -5;
    pub const INT128: i32 = -6;
    pub const FLOAT32: i32 = -7;
    pub const FLOAT64: i32 = -8;
    pub const DECIMAL32: i32 = -9;
    pub const DECIMAL64: i32 = -10;
    pub const DECIMAL128: i32 = -11;
    pub const CHAR: i32 = -12;
    pub const STRING: i32 = -13;
    pub const DATE: i32 = -14;
    pub const TIME: i32 = -15;
    pub const DATETIME: i32 = -16;
    pub const YEAR_MONTH_INTERVAL: i32 = -17;
    pub const TIME_INTERVAL: i32 = -18;
    pub const DAY_TIME_INTERVAL: i32 = -19;
    pub const ARRAY: i32 = -20;
    pub const UNIFORM_ARRAY: i32 = -21;
    pub const COLLECTION: i32 = -22;
    pub const UNIFORM_COLLECTION: i32 = -23;
    pub const MAP: i32 = -24;
    pub const UNIFORM_KEYS_MAP: i32 = -25;
    pub const UNIFORM_MAP: i32 = -26;
    pub const SPARSE_ARRAY: i32 = -27;
    pub const UNIFORM_SPARSE_ARRAY: i32 = -28;
    pub const NIL: i32 = -29;
    /// Reserved indicator: the next value on the stream is assigned an identity.
    pub const IDENTITY: i32 = -30;
    /// Reserved indicator: the next varint is a reference to a prior identity.
    pub const REFERENCE: i32 = -31;

    /// True for composite shapes eligible for reference tracking (§4.1:
    /// "every encoded reference-capable value (user types, collections,
    /// maps, arrays that are not intrinsic primitives)").
    pub fn is_reference_capable(id: i32) -> bool {
        matches!(
            id,
            ARRAY
                | UNIFORM_ARRAY
                | COLLECTION
                | UNIFORM_COLLECTION
                | MAP
                | UNIFORM_KEYS_MAP
                | UNIFORM_MAP
                | SPARSE_ARRAY
                | UNIFORM_SPARSE_ARRAY
        ) || id >= 0
    }
}

/// A decimal intrinsic: an unscaled integer plus a scale, per §4.1.
/// decimal32/64/128 differ only in the maximum unscaled magnitude they permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal {
    pub unscaled: i128,
    pub scale: i32,
}

impl Decimal {
    pub const fn new(unscaled: i128, scale: i32) -> Self {
        Self { unscaled, scale }
    }

    /// Maximum unscaled magnitude for each decimal width, used to validate
    /// on encode and to detect overflow when a wider wire value is decoded
    /// into a narrower local type.
    pub fn fits(self, width: DecimalWidth) -> bool {
        let bound: i128 = match width {
            DecimalWidth::D32 => 9_999_999,
            DecimalWidth::D64 => 999_999_999_999_999_999,
            DecimalWidth::D128 => i128::MAX / 10,
        };
        self.unscaled.unsigned_abs() <= bound as u128
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecimalWidth {
    D32,
    D64,
    D128,
}

/// Timezone carried by a [`Time`] or [`DateTime`] value (§4.1: "zone is
/// absent, UTC, or a signed hour/minute offset").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeZone {
    None,
    Utc,
    Offset { hour: i8, minute: i8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Date {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub nanos: u32,
    pub zone: TimeZone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
    pub date: Date,
    pub time: Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearMonthInterval {
    pub years: i32,
    pub months: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    pub hours: i32,
    pub minutes: i32,
    pub seconds: i32,
    pub nanos: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayTimeInterval {
    pub days: i32,
    pub hours: i32,
    pub minutes: i32,
    pub seconds: i32,
    pub nanos: i32,
}

/// A decoded user-type instance (§3: "a user type carries (type-id,
/// data-version, impl-version, ordered property slots, optional
/// remainder)"). `impl_version` is not itself carried on the wire — only
/// the computed `max(vd, vi)` is — so this holds the on-wire data version
/// plus whatever trailing bytes the local context didn't recognize.
#[derive(Debug, Clone, PartialEq)]
pub struct UserTypeValue {
    pub type_id: i32,
    pub data_version: i32,
    pub properties: Vec<(i32, PofValue)>,
    /// Opaque tail bytes from a newer writer's version (§4.1 "remainder").
    pub remainder: Vec<u8>,
}

/// A single POF-encoded value (§3).
///
/// Composite variants wrap their payload in `Arc` so that the encoder can
/// detect object-identity sharing (`Arc::ptr_eq`) the way §4.1's reference
/// semantics require, and so the decoder can hand back the exact same
/// allocation for every occurrence of a shared sub-object within one decode —
/// `Arc` rather than `Rc` because a decoded value can end up on another
/// thread once it's captured by a `Send` message.
#[derive(Debug, Clone, PartialEq)]
pub enum PofValue {
    Nil,
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Int128(i128),
    Float32(f32),
    Float64(f64),
    Decimal32(Decimal),
    Decimal64(Decimal),
    Decimal128(Decimal),
    Char(char),
    String(String),
    Date(Date),
    Time(Time),
    DateTime(DateTime),
    YearMonthInterval(YearMonthInterval),
    TimeInterval(TimeInterval),
    DayTimeInterval(DayTimeInterval),
    Array(Arc<Vec<PofValue>>),
    UniformArray {
        element_type: i32,
        values: Arc<Vec<PofValue>>,
    },
    Collection(Arc<Vec<PofValue>>),
    UniformCollection {
        element_type: i32,
        values: Arc<Vec<PofValue>>,
    },
    Map(Arc<Vec<(PofValue, PofValue)>>),
    UniformKeysMap {
        key_type: i32,
        entries: Arc<Vec<(PofValue, PofValue)>>,
    },
    UniformMap {
        key_type: i32,
        value_type: i32,
        entries: Arc<Vec<(PofValue, PofValue)>>,
    },
    /// Sparse array: absent indices are conceptually [`PofValue::Nil`] (§4.1).
    SparseArray(Arc<Vec<(i32, PofValue)>>),
    UniformSparseArray {
        element_type: i32,
        entries: Arc<Vec<(i32, PofValue)>>,
    },
    UserType(Arc<UserTypeValue>),
}

impl PofValue {
    /// The pointer identity used for reference tracking, if this value is a
    /// reference-capable composite. Primitive leaves return `None` — they are
    /// never individually reference-tracked (§4.1).
    pub(crate) fn identity_ptr(&self) -> Option<*const ()> {
        match self {
            PofValue::Array(shared) | PofValue::Collection(shared) => Some(Arc::as_ptr(shared).cast()),
            PofValue::UniformArray { values, .. } | PofValue::UniformCollection { values, .. } => {
                Some(Arc::as_ptr(values).cast())
            }
            PofValue::Map(shared) => Some(Arc::as_ptr(shared).cast()),
            PofValue::UniformKeysMap { entries, .. } | PofValue::UniformMap { entries, .. } => {
                Some(Arc::as_ptr(entries).cast())
            }
            PofValue::SparseArray(shared) => Some(Arc::as_ptr(shared).cast()),
            PofValue::UniformSparseArray { entries, .. } => Some(Arc::as_ptr(entries).cast()),
            PofValue::UserType(shared) => Some(Arc::as_ptr(shared).cast()),
            _ => None,
        }
    }
}

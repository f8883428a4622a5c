//! The named-cache message taxonomy (§4.5).
//!
//! The core only frames and routes these — key/value/filter/processor
//! payloads are carried as opaque [`PofValue`]s produced by whatever POF
//! context the caller registered for its own cache value types; this crate
//! never interprets them (§1 non-goal: entry-processor/aggregator/query
//! business logic is out of scope).

use std::collections::HashMap;
use std::sync::Arc;

use pof::{PofReader, PofValue, PofWriter};

use crate::error::{ProtocolError, ProtocolResult};
use crate::exception::PortableException;
use crate::message::{Message, MessageRegistry};

/// Message-type-id table (§4.5, plus the `Response`/`PartialResponse`
/// plumbing the distillation didn't name but the protocol needs to
/// function — see DESIGN.md).
pub mod type_id {
    pub const RESPONSE: i32 = 0;
    pub const SIZE: i32 = 1;
    pub const CONTAINS_KEY: i32 = 2;
    pub const CONTAINS_VALUE: i32 = 3;
    pub const GET: i32 = 4;
    pub const PUT: i32 = 5;
    pub const REMOVE: i32 = 6;
    pub const PUT_ALL: i32 = 7;
    pub const CLEAR: i32 = 8;
    pub const CONTAINS_ALL: i32 = 9;
    pub const REMOVE_ALL: i32 = 10;
    pub const LISTENER_KEY: i32 = 11;
    pub const LISTENER_FILTER: i32 = 12;
    pub const CACHE_EVENT: i32 = 13;
    pub const GET_ALL: i32 = 21;
    pub const LOCK: i32 = 31;
    pub const UNLOCK: i32 = 32;
    pub const QUERY: i32 = 41;
    pub const INDEX: i32 = 42;
    pub const INVOKE: i32 = 51;
    pub const INVOKE_ALL: i32 = 52;
    pub const AGGREGATE: i32 = 53;
    pub const PARTIAL_RESPONSE: i32 = 54;
    pub const QUERY_CACHE: i32 = 55;
    pub const NO_STORAGE_MEMBERS: i32 = 56;
}

// --- shared value <-> property conversions ---------------------------------

fn props_map(properties: Vec<(i32, PofValue)>) -> HashMap<i32, PofValue> {
    properties.into_iter().collect()
}

fn take(map: &mut HashMap<i32, PofValue>, index: i32) -> ProtocolResult<PofValue> {
    map.remove(&index)
        .ok_or_else(|| ProtocolError::Malformed(format!("missing property {index}")))
}

fn as_u64(value: PofValue) -> ProtocolResult<u64> {
    match value {
        PofValue::Int64(n) => Ok(n as u64),
        PofValue::Int32(n) => Ok(n as u64),
        other => Err(ProtocolError::Malformed(format!("expected integer, got {other:?}"))),
    }
}

fn as_i64(value: PofValue) -> ProtocolResult<i64> {
    match value {
        PofValue::Int64(n) => Ok(n),
        PofValue::Int32(n) => Ok(i64::from(n)),
        other => Err(ProtocolError::Malformed(format!("expected integer, got {other:?}"))),
    }
}

fn as_bool(value: PofValue) -> ProtocolResult<bool> {
    match value {
        PofValue::Boolean(b) => Ok(b),
        other => Err(ProtocolError::Malformed(format!("expected boolean, got {other:?}"))),
    }
}

fn as_array(value: PofValue) -> ProtocolResult<Vec<PofValue>> {
    match value {
        PofValue::Array(items) | PofValue::Collection(items) => {
            Ok(Arc::try_unwrap(items).unwrap_or_else(|rc| (*rc).clone()))
        }
        other => Err(ProtocolError::Malformed(format!("expected array, got {other:?}"))),
    }
}

fn as_map(value: PofValue) -> ProtocolResult<Vec<(PofValue, PofValue)>> {
    match value {
        PofValue::Map(entries) => Ok(Arc::try_unwrap(entries).unwrap_or_else(|rc| (*rc).clone())),
        other => Err(ProtocolError::Malformed(format!("expected map, got {other:?}"))),
    }
}

fn binary_to_value(bytes: &[u8]) -> PofValue {
    PofValue::UniformArray {
        element_type: pof::type_id::INT8,
        values: Arc::new(bytes.iter().map(|b| PofValue::Int8(*b as i8)).collect()),
    }
}

fn value_to_binary(value: PofValue) -> ProtocolResult<Vec<u8>> {
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

fn cookie_to_value(cookie: &Option<Vec<u8>>) -> PofValue {
    match cookie {
        Some(bytes) => binary_to_value(bytes),
        None => PofValue::Nil,
    }
}

fn value_to_cookie(value: PofValue) -> ProtocolResult<Option<Vec<u8>>> {
    match value {
        PofValue::Nil => Ok(None),
        other => value_to_binary(other).map(Some),
    }
}

// --- PriorityTask capability (§4.5) -----------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingPriority {
    #[default]
    Standard,
    First,
    Immediate,
}

/// Priority-task fields carried on request messages; when the payload
/// behind a request isn't actually a priority task, these stay at their
/// defaults (§4.5: "defaulted when the payload isn't a priority task").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityTask {
    pub request_timeout_millis: i64,
    pub execution_timeout_millis: i64,
    pub scheduling_priority: SchedulingPriority,
}

impl Default for PriorityTask {
    fn default() -> Self {
        Self {
            request_timeout_millis: -1,
            execution_timeout_millis: -1,
            scheduling_priority: SchedulingPriority::Standard,
        }
    }
}

fn scheduling_priority_to_value(priority: SchedulingPriority) -> PofValue {
    PofValue::Int32(match priority {
        SchedulingPriority::Standard => 0,
        SchedulingPriority::First => 1,
        SchedulingPriority::Immediate => 2,
    })
}

fn value_to_scheduling_priority(value: PofValue) -> SchedulingPriority {
    match as_i64(value) {
        Ok(1) => SchedulingPriority::First,
        Ok(2) => SchedulingPriority::Immediate,
        _ => SchedulingPriority::Standard,
    }
}

/// The three priority-task properties (§4.5), written starting at `base`.
fn priority_properties(priority: &PriorityTask, base: i32) -> [(i32, PofValue); 3] {
    [
        (base, PofValue::Int64(priority.request_timeout_millis)),
        (base + 1, PofValue::Int64(priority.execution_timeout_millis)),
        (base + 2, scheduling_priority_to_value(priority.scheduling_priority)),
    ]
}

fn priority_from_properties(map: &mut HashMap<i32, PofValue>, base: i32) -> PriorityTask {
    PriorityTask {
        request_timeout_millis: take(map, base).and_then(as_i64).unwrap_or(-1),
        execution_timeout_millis: take(map, base + 1).and_then(as_i64).unwrap_or(-1),
        scheduling_priority: take(map, base + 2).map(value_to_scheduling_priority).unwrap_or_default(),
    }
}

// --- CacheEvent (§4.5) -------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    Inserted,
    Updated,
    Deleted,
}

/// Modifier bits on a [`CacheEventMessage`]; unrecognized bits are preserved
/// verbatim across decode/re-encode rather than masked off (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheEventFlags(pub u32);

impl CacheEventFlags {
    pub const SYNTHETIC: u32 = 0x1;
    pub const PRIMING: u32 = 0x2;
    pub const EXPIRED: u32 = 0x4;
    pub const TRUNCATE: u32 = 0x8;

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn with(self, bit: u32) -> Self {
        Self(self.0 | bit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformState {
    #[default]
    NonTransformable,
    Transformed,
    Untransformed,
}

#[derive(Debug, Clone)]
pub struct CacheEventMessage {
    pub kind: CacheEventKind,
    pub flags: CacheEventFlags,
    pub transform_state: TransformState,
    pub key: PofValue,
    pub old_value: Option<PofValue>,
    pub new_value: Option<PofValue>,
    /// Filter ids this event matched, for filter-based listener fan-out.
    pub filter_ids: Vec<i64>,
}

impl Default for CacheEventMessage {
    fn default() -> Self {
        Self {
            kind: CacheEventKind::Inserted,
            flags: CacheEventFlags::default(),
            transform_state: TransformState::default(),
            key: PofValue::Nil,
            old_value: None,
            new_value: None,
            filter_ids: Vec::new(),
        }
    }
}

impl Message for CacheEventMessage {
    fn type_id(&self) -> i32 {
        type_id::CACHE_EVENT
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let kind = match self.kind {
            CacheEventKind::Inserted => 0,
            CacheEventKind::Updated => 1,
            CacheEventKind::Deleted => 2,
        };
        let transform_state = match self.transform_state {
            TransformState::NonTransformable => 0,
            TransformState::Transformed => 1,
            TransformState::Untransformed => 2,
        };
        let filter_ids = PofValue::Array(Arc::new(
            self.filter_ids.iter().map(|id| PofValue::Int64(*id)).collect(),
        ));
        let properties = vec![
            (0, PofValue::Int32(kind)),
            (1, PofValue::Int32(self.flags.0 as i32)),
            (2, PofValue::Int32(transform_state)),
            (3, self.key.clone()),
            (4, self.old_value.clone().unwrap_or(PofValue::Nil)),
            (5, self.new_value.clone().unwrap_or(PofValue::Nil)),
            (6, filter_ids),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        let kind = match take(&mut map, 0).and_then(as_i64) {
            Ok(0) => CacheEventKind::Inserted,
            Ok(1) => CacheEventKind::Updated,
            Ok(2) => CacheEventKind::Deleted,
            _ => CacheEventKind::Inserted,
        };
        let flags = CacheEventFlags(take(&mut map, 1).and_then(as_i64).unwrap_or(0) as u32);
        let transform_state = match take(&mut map, 2).and_then(as_i64) {
            Ok(1) => TransformState::Transformed,
            Ok(2) => TransformState::Untransformed,
            _ => TransformState::NonTransformable,
        };
        let key = take(&mut map, 3).unwrap_or(PofValue::Nil);
        let old_value = match take(&mut map, 4) {
            Ok(PofValue::Nil) | Err(_) => None,
            Ok(v) => Some(v),
        };
        let new_value = match take(&mut map, 5) {
            Ok(PofValue::Nil) | Err(_) => None,
            Ok(v) => Some(v),
        };
        let filter_ids = take(&mut map, 6)
            .and_then(as_array)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| as_i64(v).ok())
            .collect();
        self.kind = kind;
        self.flags = flags;
        self.transform_state = transform_state;
        self.key = key;
        self.old_value = old_value;
        self.new_value = new_value;
        self.filter_ids = filter_ids;
        Ok(())
    }

    fn run(&self, channel_id: u64, ctx: &dyn crate::message::MessageContext) {
        ctx.dispatch_cache_event(channel_id, self.clone());
    }
}

// --- Response / PartialResponse --------------------------------------------

#[derive(Debug, Clone)]
pub enum ResponseResult {
    Success(PofValue),
    Failure(PortableException),
}

impl Default for ResponseResult {
    fn default() -> Self {
        Self::Success(PofValue::Nil)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Response {
    pub request_id: u64,
    pub result: ResponseResult,
}

impl Message for Response {
    fn type_id(&self) -> i32 {
        type_id::RESPONSE
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let (failure, value) = match &self.result {
            ResponseResult::Success(v) => (false, v.clone()),
            ResponseResult::Failure(e) => (true, exception_to_value(e)),
        };
        let properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, PofValue::Boolean(failure)),
            (2, value),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        let failure = take(&mut map, 1).and_then(as_bool).unwrap_or(false);
        let value = take(&mut map, 2).unwrap_or(PofValue::Nil);
        self.result = if failure {
            ResponseResult::Failure(value_to_exception(value))
        } else {
            ResponseResult::Success(value)
        };
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PartialResponse {
    pub request_id: u64,
    pub cookie: Option<Vec<u8>>,
    pub entries: Vec<(PofValue, PofValue)>,
}

impl Message for PartialResponse {
    fn type_id(&self) -> i32 {
        type_id::PARTIAL_RESPONSE
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let entries = PofValue::Map(Arc::new(self.entries.clone()));
        let properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, cookie_to_value(&self.cookie)),
            (2, entries),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.cookie = take(&mut map, 1).ok().and_then(|v| value_to_cookie(v).ok().flatten());
        self.entries = take(&mut map, 2).and_then(as_map).unwrap_or_default();
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

fn exception_to_value(exception: &PortableException) -> PofValue {
    let cause = exception
        .cause
        .as_ref()
        .map(|c| exception_to_value(c))
        .unwrap_or(PofValue::Nil);
    let frames = PofValue::Array(Arc::new(
        exception
            .stack_frames
            .iter()
            .map(|f| PofValue::String(f.clone()))
            .collect(),
    ));
    PofValue::Array(Arc::new(vec![
        PofValue::String(exception.class_name.clone()),
        PofValue::String(exception.message.clone()),
        cause,
        frames,
    ]))
}

fn value_to_exception(value: PofValue) -> PortableException {
    let Ok(mut items) = as_array(value) else {
        return PortableException::default();
    };
    if items.len() != 4 {
        return PortableException::default();
    }
    let frames = items.pop().unwrap();
    let cause = items.pop().unwrap();
    let message = items.pop().unwrap();
    let class_name = items.pop().unwrap();
    PortableException {
        class_name: match class_name {
            PofValue::String(s) => s,
            _ => String::new(),
        },
        message: match message {
            PofValue::String(s) => s,
            _ => String::new(),
        },
        cause: match cause {
            PofValue::Nil => None,
            other => Some(Box::new(value_to_exception(other))),
        },
        stack_frames: as_array(frames)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| match v {
                PofValue::String(s) => Some(s),
                _ => None,
            })
            .collect(),
    }
}

// --- simple request shapes, shared across several type-ids ------------------

/// A request carrying nothing beyond its identity — `Size`, `Clear`,
/// `NoStorageMembers`.
#[derive(Debug, Clone, Default)]
pub struct SimpleRequest {
    pub type_id: i32,
    pub request_id: u64,
}

impl Message for SimpleRequest {
    fn type_id(&self) -> i32 {
        self.type_id
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

/// A request keyed by a single entry key — `ContainsKey`, `Get`, `Remove`,
/// `Unlock`.
#[derive(Debug, Clone)]
pub struct KeyRequest {
    pub type_id: i32,
    pub request_id: u64,
    pub key: PofValue,
}

impl Default for KeyRequest {
    fn default() -> Self {
        Self {
            type_id: type_id::GET,
            request_id: 0,
            key: PofValue::Nil,
        }
    }
}

impl Message for KeyRequest {
    fn type_id(&self) -> i32 {
        self.type_id
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, self.key.clone()),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.key = take(&mut map, 1).unwrap_or(PofValue::Nil);
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

/// A request carrying a single value, used by `ContainsValue`.
#[derive(Debug, Clone, Default)]
pub struct ValueRequest {
    pub request_id: u64,
    pub value: PofValue,
}

impl Message for ValueRequest {
    fn type_id(&self) -> i32 {
        type_id::CONTAINS_VALUE
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, self.value.clone()),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.value = take(&mut map, 1).unwrap_or(PofValue::Nil);
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PutRequest {
    pub request_id: u64,
    pub key: PofValue,
    pub value: PofValue,
    pub expiry_millis: Option<i64>,
    pub return_current: bool,
}

impl Message for PutRequest {
    fn type_id(&self) -> i32 {
        type_id::PUT
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, self.key.clone()),
            (2, self.value.clone()),
            (
                3,
                self.expiry_millis.map(PofValue::Int64).unwrap_or(PofValue::Nil),
            ),
            (4, PofValue::Boolean(self.return_current)),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.key = take(&mut map, 1).unwrap_or(PofValue::Nil);
        self.value = take(&mut map, 2).unwrap_or(PofValue::Nil);
        self.expiry_millis = match take(&mut map, 3) {
            Ok(PofValue::Nil) | Err(_) => None,
            Ok(v) => as_i64(v).ok(),
        };
        self.return_current = take(&mut map, 4).and_then(as_bool).unwrap_or(false);
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

/// A request carrying a full key/value entry set — `PutAll`.
#[derive(Debug, Clone, Default)]
pub struct EntrySetRequest {
    pub request_id: u64,
    pub entries: Vec<(PofValue, PofValue)>,
}

impl Message for EntrySetRequest {
    fn type_id(&self) -> i32 {
        type_id::PUT_ALL
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, PofValue::Map(Arc::new(self.entries.clone()))),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.entries = take(&mut map, 1).and_then(as_map).unwrap_or_default();
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

/// A request carrying a key set — `ContainsAll`, `RemoveAll`, `GetAll`.
#[derive(Debug, Clone)]
pub struct KeySetRequest {
    pub type_id: i32,
    pub request_id: u64,
    pub keys: Vec<PofValue>,
}

impl Default for KeySetRequest {
    fn default() -> Self {
        Self {
            type_id: type_id::GET_ALL,
            request_id: 0,
            keys: Vec::new(),
        }
    }
}

impl Message for KeySetRequest {
    fn type_id(&self) -> i32 {
        self.type_id
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, PofValue::Array(Arc::new(self.keys.clone()))),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.keys = take(&mut map, 1).and_then(as_array).unwrap_or_default();
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListenerKeyRequest {
    pub request_id: u64,
    pub key: PofValue,
    pub add: bool,
    pub lite: bool,
    pub trigger: Option<PofValue>,
    pub priority: PriorityTask,
}

impl Message for ListenerKeyRequest {
    fn type_id(&self) -> i32 {
        type_id::LISTENER_KEY
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let mut properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, self.key.clone()),
            (2, PofValue::Boolean(self.add)),
            (3, PofValue::Boolean(self.lite)),
            (4, self.trigger.clone().unwrap_or(PofValue::Nil)),
        ];
        properties.extend(priority_properties(&self.priority, 5));
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.key = take(&mut map, 1).unwrap_or(PofValue::Nil);
        self.add = take(&mut map, 2).and_then(as_bool).unwrap_or(true);
        self.lite = take(&mut map, 3).and_then(as_bool).unwrap_or(false);
        self.trigger = match take(&mut map, 4) {
            Ok(PofValue::Nil) | Err(_) => None,
            Ok(v) => Some(v),
        };
        self.priority = priority_from_properties(&mut map, 5);
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListenerFilterRequest {
    pub request_id: u64,
    pub filter_id: i64,
    pub filter: Option<PofValue>,
    pub add: bool,
    pub lite: bool,
    pub trigger: Option<PofValue>,
}

impl Message for ListenerFilterRequest {
    fn type_id(&self) -> i32 {
        type_id::LISTENER_FILTER
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, PofValue::Int64(self.filter_id)),
            (2, self.filter.clone().unwrap_or(PofValue::Nil)),
            (3, PofValue::Boolean(self.add)),
            (4, PofValue::Boolean(self.lite)),
            (5, self.trigger.clone().unwrap_or(PofValue::Nil)),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.filter_id = take(&mut map, 1).and_then(as_i64).unwrap_or(0);
        self.filter = match take(&mut map, 2) {
            Ok(PofValue::Nil) | Err(_) => None,
            Ok(v) => Some(v),
        };
        self.add = take(&mut map, 3).and_then(as_bool).unwrap_or(true);
        self.lite = take(&mut map, 4).and_then(as_bool).unwrap_or(false);
        self.trigger = match take(&mut map, 5) {
            Ok(PofValue::Nil) | Err(_) => None,
            Ok(v) => Some(v),
        };
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LockRequest {
    pub request_id: u64,
    pub key: PofValue,
    pub wait_millis: i64,
}

impl Message for LockRequest {
    fn type_id(&self) -> i32 {
        type_id::LOCK
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, self.key.clone()),
            (2, PofValue::Int64(self.wait_millis)),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.key = take(&mut map, 1).unwrap_or(PofValue::Nil);
        self.wait_millis = take(&mut map, 2).and_then(as_i64).unwrap_or(0);
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

/// A filtered query request — `Query` and `QueryCache`'s cookie-driven
/// iteration share this shape (§4.5).
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub type_id: i32,
    pub request_id: u64,
    pub filter: PofValue,
    pub cookie: Option<Vec<u8>>,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            type_id: type_id::QUERY,
            request_id: 0,
            filter: PofValue::Nil,
            cookie: None,
        }
    }
}

impl Message for QueryRequest {
    fn type_id(&self) -> i32 {
        self.type_id
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, self.filter.clone()),
            (2, cookie_to_value(&self.cookie)),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.filter = take(&mut map, 1).unwrap_or(PofValue::Nil);
        self.cookie = take(&mut map, 2).ok().and_then(|v| value_to_cookie(v).ok().flatten());
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexRequest {
    pub request_id: u64,
    pub extractor: Vec<u8>,
    pub ordered: bool,
    pub comparator: Option<Vec<u8>>,
    pub add: bool,
}

impl Message for IndexRequest {
    fn type_id(&self) -> i32 {
        type_id::INDEX
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let comparator = match &self.comparator {
            Some(bytes) => binary_to_value(bytes),
            None => PofValue::Nil,
        };
        let properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, binary_to_value(&self.extractor)),
            (2, PofValue::Boolean(self.ordered)),
            (3, comparator),
            (4, PofValue::Boolean(self.add)),
        ];
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.extractor = take(&mut map, 1).and_then(value_to_binary).unwrap_or_default();
        self.ordered = take(&mut map, 2).and_then(as_bool).unwrap_or(false);
        self.comparator = match take(&mut map, 3) {
            Ok(PofValue::Nil) | Err(_) => None,
            Ok(v) => value_to_binary(v).ok(),
        };
        self.add = take(&mut map, 4).and_then(as_bool).unwrap_or(true);
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

/// Either a key set or a filter — the addressing mode shared by
/// `InvokeAll` and `Aggregate` (§4.5: "filter or key set").
#[derive(Debug, Clone)]
pub enum KeysOrFilter {
    Keys(Vec<PofValue>),
    Filter(PofValue),
}

impl KeysOrFilter {
    fn to_value(&self) -> (bool, PofValue) {
        match self {
            Self::Keys(keys) => (false, PofValue::Array(Arc::new(keys.clone()))),
            Self::Filter(filter) => (true, filter.clone()),
        }
    }

    fn from_value(is_filter: bool, value: PofValue) -> ProtocolResult<Self> {
        if is_filter {
            Ok(Self::Filter(value))
        } else {
            Ok(Self::Keys(as_array(value)?))
        }
    }
}

impl Default for KeysOrFilter {
    fn default() -> Self {
        Self::Keys(Vec::new())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InvokeRequest {
    pub request_id: u64,
    pub key: PofValue,
    pub processor: PofValue,
    pub priority: PriorityTask,
}

impl Message for InvokeRequest {
    fn type_id(&self) -> i32 {
        type_id::INVOKE
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let mut properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, self.key.clone()),
            (2, self.processor.clone()),
        ];
        properties.extend(priority_properties(&self.priority, 3));
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        self.key = take(&mut map, 1).unwrap_or(PofValue::Nil);
        self.processor = take(&mut map, 2).unwrap_or(PofValue::Nil);
        self.priority = priority_from_properties(&mut map, 3);
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InvokeAllRequest {
    pub request_id: u64,
    pub target: KeysOrFilter,
    pub processor: PofValue,
    pub cookie: Option<Vec<u8>>,
    pub priority: PriorityTask,
}

impl Message for InvokeAllRequest {
    fn type_id(&self) -> i32 {
        type_id::INVOKE_ALL
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let (is_filter, target_value) = self.target.to_value();
        let mut properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, PofValue::Boolean(is_filter)),
            (2, target_value),
            (3, self.processor.clone()),
            (4, cookie_to_value(&self.cookie)),
        ];
        properties.extend(priority_properties(&self.priority, 5));
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        let is_filter = take(&mut map, 1).and_then(as_bool).unwrap_or(false);
        let target_value = take(&mut map, 2).unwrap_or(PofValue::Nil);
        self.target = KeysOrFilter::from_value(is_filter, target_value)
            .unwrap_or_else(|_| KeysOrFilter::Keys(Vec::new()));
        self.processor = take(&mut map, 3).unwrap_or(PofValue::Nil);
        self.cookie = take(&mut map, 4).ok().and_then(|v| value_to_cookie(v).ok().flatten());
        self.priority = priority_from_properties(&mut map, 5);
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

/// Factory for the whole named-cache protocol (§4.5). Several type-ids
/// share a struct, parametrized by its own `type_id` field, so the
/// constructor closures fix that field to the id being registered.
pub fn named_cache_registry() -> MessageRegistry {
    MessageRegistry::builder()
        .register(type_id::RESPONSE, || Box::new(Response::default()))
        .register(type_id::SIZE, || {
            Box::new(SimpleRequest {
                type_id: type_id::SIZE,
                ..Default::default()
            })
        })
        .register(type_id::CLEAR, || {
            Box::new(SimpleRequest {
                type_id: type_id::CLEAR,
                ..Default::default()
            })
        })
        .register(type_id::NO_STORAGE_MEMBERS, || {
            Box::new(SimpleRequest {
                type_id: type_id::NO_STORAGE_MEMBERS,
                ..Default::default()
            })
        })
        .register(type_id::CONTAINS_KEY, || {
            Box::new(KeyRequest {
                type_id: type_id::CONTAINS_KEY,
                ..Default::default()
            })
        })
        .register(type_id::GET, || {
            Box::new(KeyRequest {
                type_id: type_id::GET,
                ..Default::default()
            })
        })
        .register(type_id::REMOVE, || {
            Box::new(KeyRequest {
                type_id: type_id::REMOVE,
                ..Default::default()
            })
        })
        .register(type_id::UNLOCK, || {
            Box::new(KeyRequest {
                type_id: type_id::UNLOCK,
                ..Default::default()
            })
        })
        .register(type_id::CONTAINS_VALUE, || Box::new(ValueRequest::default()))
        .register(type_id::PUT, || Box::new(PutRequest::default()))
        .register(type_id::PUT_ALL, || Box::new(EntrySetRequest::default()))
        .register(type_id::CONTAINS_ALL, || {
            Box::new(KeySetRequest {
                type_id: type_id::CONTAINS_ALL,
                ..Default::default()
            })
        })
        .register(type_id::REMOVE_ALL, || {
            Box::new(KeySetRequest {
                type_id: type_id::REMOVE_ALL,
                ..Default::default()
            })
        })
        .register(type_id::GET_ALL, || {
            Box::new(KeySetRequest {
                type_id: type_id::GET_ALL,
                ..Default::default()
            })
        })
        .register(type_id::LISTENER_KEY, || Box::new(ListenerKeyRequest::default()))
        .register(type_id::LISTENER_FILTER, || Box::new(ListenerFilterRequest::default()))
        .register(type_id::CACHE_EVENT, || Box::new(CacheEventMessage::default()))
        .register(type_id::LOCK, || Box::new(LockRequest::default()))
        .register(type_id::QUERY, || {
            Box::new(QueryRequest {
                type_id: type_id::QUERY,
                ..Default::default()
            })
        })
        .register(type_id::QUERY_CACHE, || {
            Box::new(QueryRequest {
                type_id: type_id::QUERY_CACHE,
                ..Default::default()
            })
        })
        .register(type_id::INDEX, || Box::new(IndexRequest::default()))
        .register(type_id::INVOKE, || Box::new(InvokeRequest::default()))
        .register(type_id::INVOKE_ALL, || Box::new(InvokeAllRequest::default()))
        .register(type_id::AGGREGATE, || Box::new(AggregateRequest::default()))
        .register(type_id::PARTIAL_RESPONSE, || Box::new(PartialResponse::default()))
        .build()
}

#[derive(Debug, Clone, Default)]
pub struct AggregateRequest {
    pub request_id: u64,
    pub target: KeysOrFilter,
    pub aggregator: PofValue,
    pub priority: PriorityTask,
}

impl Message for AggregateRequest {
    fn type_id(&self) -> i32 {
        type_id::AGGREGATE
    }

    fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
        let (is_filter, target_value) = self.target.to_value();
        let mut properties = vec![
            (0, PofValue::Int64(self.request_id as i64)),
            (1, PofValue::Boolean(is_filter)),
            (2, target_value),
            (3, self.aggregator.clone()),
        ];
        properties.extend(priority_properties(&self.priority, 4));
        writer.write_indexed_properties(0, &properties)
    }

    fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
        let (_version, properties) = reader.read_indexed_properties()?;
        let mut map = props_map(properties);
        self.request_id = take(&mut map, 0).and_then(as_u64).unwrap_or(0);
        let is_filter = take(&mut map, 1).and_then(as_bool).unwrap_or(false);
        let target_value = take(&mut map, 2).unwrap_or(PofValue::Nil);
        self.target = KeysOrFilter::from_value(is_filter, target_value)
            .unwrap_or_else(|_| KeysOrFilter::Keys(Vec::new()));
        self.aggregator = take(&mut map, 3).unwrap_or(PofValue::Nil);
        self.priority = priority_from_properties(&mut map, 4);
        Ok(())
    }

    fn request_id(&self) -> Option<u64> {
        Some(self.request_id)
    }
}

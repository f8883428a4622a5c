//! The per-decode/per-encode identity bookkeeping behind reference tracking
//! (§4.1, design note §9).
//!
//! Both trackers live for exactly one top-level [`encode`](crate::writer::encode)
//! or [`decode`](crate::reader::decode) call and are dropped when it returns
//! — "no long-lived cyclic references survive" (§9).

use std::collections::HashMap;

use crate::error::{PofError, PofResult};
use crate::value::PofValue;

/// Maps an already-encoded composite's pointer identity to the id it was
/// assigned, so a later occurrence of the same `Arc` allocation is written as
/// a reference instead of being re-encoded in full.
#[derive(Default)]
pub(crate) struct EncodeIdentities {
    seen: HashMap<*const (), i32>,
    next_id: i32,
}

impl EncodeIdentities {
    /// Returns `Some(id)` if this pointer was already assigned an id (write
    /// a reference), or assigns and returns a fresh id (write identity+value).
    pub(crate) fn check(&mut self, ptr: *const ()) -> (i32, bool) {
        if let Some(&id) = self.seen.get(&ptr) {
            (id, true)
        } else {
            let id = self.next_id;
            self.next_id += 1;
            self.seen.insert(ptr, id);
            (id, false)
        }
    }
}

/// Arena of fully-decoded composites, indexed by the identity id assigned in
/// the order they were read. A reference may only resolve to an entry
/// already present — "a reference to an unread id is a decode error" (§4.1).
#[derive(Default)]
pub(crate) struct DecodeIdentities {
    arena: Vec<Option<PofValue>>,
}

impl DecodeIdentities {
    /// Reserve the next sequential id, to be filled in once the composite
    /// finishes decoding.
    pub(crate) fn reserve(&mut self) -> i32 {
        let id = self.arena.len() as i32;
        self.arena.push(None);
        id
    }

    pub(crate) fn fill(&mut self, id: i32, value: PofValue) {
        self.arena[id as usize] = Some(value);
    }

    pub(crate) fn resolve(&self, id: i32) -> PofResult<PofValue> {
        self.arena
            .get(id as usize)
            .and_then(|slot| slot.clone())
            .ok_or(PofError::Reference(id))
    }
}

//! The POF context: an immutable `{type-id -> (descriptor, serializer)}`
//! registry shared out-of-band between client and server (§3, §9).
//!
//! Design note §9 rejects runtime reflection: registration closes over a
//! concrete Rust type at `register` time, so no type name lookup or dynamic
//! construction happens on the hot path. A [`UserTypeSerializer`] converts
//! between a concrete Rust type and the type-id's ordered property list —
//! the property *values* are already self-describing [`PofValue`]s, so the
//! serializer never touches raw bytes.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{PofError, PofResult};
use crate::value::PofValue;

/// A user type's registration-time metadata.
#[derive(Debug, Clone)]
pub struct UserTypeDescriptor {
    pub type_id: i32,
    pub name: &'static str,
    /// The version of the schema this binary's code understands, written as
    /// `impl-version` per §4.1's evolvability protocol.
    pub impl_version: i32,
}

/// Converts a concrete Rust type to/from its POF user-type property list.
pub trait UserTypeSerializer: Send + Sync {
    /// Ordered `(property-index, value)` pairs, strictly ascending (§4.1).
    fn to_properties(&self, value: &dyn Any) -> PofResult<Vec<(i32, PofValue)>>;

    /// Builds the concrete type back from its decoded properties.
    /// `data_version` is the on-wire version, which may exceed this
    /// serializer's own `impl_version` when a newer peer wrote the value.
    fn from_properties(
        &self,
        properties: Vec<(i32, PofValue)>,
        data_version: i32,
    ) -> PofResult<Box<dyn Any>>;
}

struct Registration {
    descriptor: UserTypeDescriptor,
    serializer: Arc<dyn UserTypeSerializer>,
}

/// Immutable after construction (§5: "no lock needed on the hot path").
#[derive(Clone, Default)]
pub struct PofContext {
    types: Arc<HashMap<i32, Registration>>,
    /// Whether composite/user-type values are reference-tracked on encode.
    reference_tracking: bool,
}

impl PofContext {
    pub fn builder() -> PofContextBuilder {
        PofContextBuilder::default()
    }

    pub fn reference_tracking(&self) -> bool {
        self.reference_tracking
    }

    pub fn descriptor(&self, type_id: i32) -> PofResult<&UserTypeDescriptor> {
        self.types
            .get(&type_id)
            .map(|r| &r.descriptor)
            .ok_or(PofError::UnknownType(type_id))
    }

    pub fn serializer(&self, type_id: i32) -> PofResult<&Arc<dyn UserTypeSerializer>> {
        self.types
            .get(&type_id)
            .map(|r| &r.serializer)
            .ok_or(PofError::UnknownType(type_id))
    }

    pub fn is_registered(&self, type_id: i32) -> bool {
        self.types.contains_key(&type_id)
    }
}

#[derive(Default)]
pub struct PofContextBuilder {
    types: HashMap<i32, Registration>,
    reference_tracking: bool,
}

impl PofContextBuilder {
    pub fn register(
        mut self,
        type_id: i32,
        name: &'static str,
        impl_version: i32,
        serializer: impl UserTypeSerializer + 'static,
    ) -> Self {
        self.types.insert(
            type_id,
            Registration {
                descriptor: UserTypeDescriptor {
                    type_id,
                    name,
                    impl_version,
                },
                serializer: Arc::new(serializer),
            },
        );
        self
    }

    pub fn with_reference_tracking(mut self, enabled: bool) -> Self {
        self.reference_tracking = enabled;
        self
    }

    pub fn build(self) -> PofContext {
        PofContext {
            types: Arc::new(self.types),
            reference_tracking: self.reference_tracking,
        }
    }
}

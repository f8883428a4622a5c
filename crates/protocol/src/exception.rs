//! The error kind 3 "remote exception" type (§7), shaped concretely since
//! the distilled spec requires round-trip losslessness for it without
//! specifying its fields.

use std::fmt;

/// A server-side exception relayed to the client without reinterpretation —
/// carried verbatim so a caller sees the same class name, message, cause
/// chain, and stack trace the server produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PortableException {
    pub class_name: String,
    pub message: String,
    pub cause: Option<Box<PortableException>>,
    pub stack_frames: Vec<String>,
}

impl fmt::Display for PortableException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class_name, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by {cause})")?;
        }
        Ok(())
    }
}

impl std::error::Error for PortableException {}

//! Domain model for calltrace
//!
//! This module contains core domain types and errors that provide:
//! - Name conversions between binary (`a/b/C`) and dotted (`a.b.C`) forms
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{dotted, slashed, ClassLoadRequest, StackFrame};

pub use errors::{ClassFormatError, ConfigError, JvmtiError, SinkError, TransformError};

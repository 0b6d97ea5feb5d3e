//! # Class File Codec
//!
//! Decode and re-encode JVM class files (JVMS chapter 4) as an explicit
//! in-memory model, so the rewriter can work as a single linear pass over a
//! class's methods instead of a chain of streaming visitors.
//!
//! ## Layers
//!
//! ```text
//! bytes           ByteReader / ByteWriter: bounds-checked big-endian I/O
//! mutf8           modified UTF-8 used by Utf8 constants
//! constant_pool   typed entries, lookup, append-only growth
//! model           ClassFile, MemberInfo, raw Attribute envelopes
//! code            Code attribute + relocation of bytecode offsets
//! stackmap        StackMapTable frames and verification types
//! ```
//!
//! ## Fidelity
//!
//! Decoding keeps raw representations (modified UTF-8 bytes, number bit
//! patterns, compact vs. extended frame encodings, unknown attributes), so
//! `encode(parse(bytes)) == bytes` for every class the rewriter does not
//! touch. That makes "leave it alone" the default for anything the agent does
//! not understand.

pub mod bytes;
pub mod code;
pub mod constant_pool;
pub mod model;
pub mod mutf8;
pub mod stackmap;

pub use code::{CodeAttribute, ExceptionHandler, MAX_CODE_LENGTH};
pub use constant_pool::{Constant, ConstantPool};
pub use model::{Attribute, ClassFile, MemberInfo};
pub use stackmap::{StackMapFrame, StackMapTable, VerificationType};

// Access flags (JVMS tables 4.1-B, 4.6-A)
pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_ABSTRACT: u16 = 0x0400;

// Opcodes used by the injected prelude
pub const OP_NOP: u8 = 0x00;
pub const OP_LDC: u8 = 0x12;
pub const OP_LDC_W: u8 = 0x13;
pub const OP_INVOKESTATIC: u8 = 0xB8;

/// Name of instance initializers
pub const CONSTRUCTOR: &str = "<init>";
/// Name of static initializers
pub const STATIC_INITIALIZER: &str = "<clinit>";

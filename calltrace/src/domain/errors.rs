//! Structured error types for calltrace
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! None of these ever reach the traced program: every caller recovers and
//! reports through the `log` facade.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Error loading properties file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value {value:?} for {key}: expected {expected}")]
    InvalidValue { key: &'static str, value: String, expected: &'static str },
}

/// Malformed input while decoding a class file
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ClassFormatError {
    #[error("Unexpected end of class data at offset {offset} (needed {needed} bytes)")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("Bad magic number 0x{0:08x}")]
    BadMagic(u32),

    #[error("Unknown constant pool tag {tag} at index {index}")]
    UnknownConstantTag { tag: u8, index: u16 },

    #[error("Constant at index {index} runs past the end of the constant pool")]
    ConstantPoolOverrun { index: u16 },

    #[error("Constant pool index {index} is not a {expected}")]
    BadConstantIndex { index: u16, expected: &'static str },

    #[error("Malformed modified UTF-8 in constant {index}")]
    InvalidUtf8 { index: u16 },

    #[error("Unknown stack map frame type {0}")]
    UnknownFrameType(u8),

    #[error("Unknown verification type tag {0}")]
    UnknownVerificationType(u8),

    #[error("{0} trailing bytes after {1}")]
    TrailingBytes(usize, &'static str),
}

/// Failure to instrument one class. The class still loads, unmodified.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Failed to decode class: {0}")]
    Decode(#[from] ClassFormatError),

    #[error("Method {method} would exceed the code size limit ({len} bytes)")]
    CodeTooLarge { method: String, len: usize },

    #[error("Constant pool is full")]
    ConstantPoolOverflow,

    #[error("Attribute {0} would exceed the attribute size limit")]
    AttributeTooLarge(&'static str),

    #[error("Rewriter panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Error initializing writer for file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error writing trace line: {0}")]
    Write(#[from] std::io::Error),
}

/// A JVMTI or JNI call returned an error or was unavailable
#[derive(Error, Debug)]
pub enum JvmtiError {
    #[error("{function} failed with JVMTI error {code}")]
    Call { function: &'static str, code: u32 },

    #[error("JNI {function} failed")]
    Jni { function: &'static str },

    #[error("JVMTI environment unavailable (GetEnv returned {0})")]
    EnvUnavailable(i32),

    #[error("Function {0} missing from the host function table")]
    MissingFunction(&'static str),

    #[error("Failed to build helper class: {0}")]
    HelperClass(#[from] TransformError),
}

//! Method entry instrumentation
//!
//! For every concrete method of a target class, a short prelude is inserted
//! before the first original instruction:
//!
//! ```text
//! ldc           "com/acme/Widget"        // class name
//! ldc           "run"                    // method name
//! invokestatic  calltrace/Tracer.logMethodCalled(Ljava/lang/String;Ljava/lang/String;)V
//! nop ...                                // pad to a multiple of 4 bytes
//! ```
//!
//! The prelude leaves the operand stack empty and touches no locals, so the
//! method's own frames are unchanged at every original instruction. Padding
//! keeps `tableswitch`/`lookupswitch` alignment, which makes the insertion a
//! uniform shift: relative branches stay valid as-is, and only absolute
//! offsets in the exception table and `Code` sub-attributes move (see
//! [`CodeAttribute::relocate`]). Branches back to offset 0 land on the first
//! original instruction, never on the prelude, so each invocation traces once.

use calltrace_common::{ENTRY_DESCRIPTOR, ENTRY_METHOD, HELPER_CLASS, PRELUDE_STACK_DEPTH};
use log::{debug, warn};
use std::borrow::Cow;

use crate::classfile::bytes::ByteWriter;
use crate::classfile::{
    ClassFile, CodeAttribute, ConstantPool, MemberInfo, ACC_ABSTRACT, ACC_NATIVE, CONSTRUCTOR,
    MAX_CODE_LENGTH, OP_INVOKESTATIC, OP_LDC, OP_LDC_W, OP_NOP, STATIC_INITIALIZER,
};
use crate::config::Config;
use crate::domain::TransformError;

/// Result of instrumenting one class
#[derive(Debug, Clone)]
pub struct Rewritten {
    pub bytes: Vec<u8>,
    /// Names of the methods that received a prelude, in class file order
    pub methods: Vec<String>,
}

/// Injects the trace prelude into class files
#[derive(Debug, Clone, Default)]
pub struct MethodBodyRewriter {
    instrument_constructors: bool,
}

impl MethodBodyRewriter {
    #[must_use]
    pub fn new(instrument_constructors: bool) -> Self {
        Self { instrument_constructors }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.capabilities().instrument_constructors)
    }

    /// Instrument `original`, or return it untouched
    ///
    /// Never fails: any decode, injection or encode error is reported and
    /// yields `Cow::Borrowed(original)`. A class with nothing to instrument is
    /// returned borrowed as well.
    #[must_use]
    pub fn rewrite<'a>(&self, original: &'a [u8], class_name: &str) -> Cow<'a, [u8]> {
        match self.try_rewrite(original, class_name) {
            Ok(Some(rewritten)) => {
                debug!(
                    "Instrumented {} method(s) in {class_name}: {}",
                    rewritten.methods.len(),
                    rewritten.methods.join(", ")
                );
                Cow::Owned(rewritten.bytes)
            }
            Ok(None) => Cow::Borrowed(original),
            Err(e) => {
                warn!("Error while transforming class {class_name}: {e}");
                Cow::Borrowed(original)
            }
        }
    }

    /// Instrument `original`, surfacing errors
    ///
    /// Returns `Ok(None)` when no method needed a prelude.
    ///
    /// # Errors
    /// Returns a [`TransformError`] if the class cannot be decoded, a method
    /// would exceed the code size limit, or the constant pool is full
    pub fn try_rewrite(
        &self,
        original: &[u8],
        class_name: &str,
    ) -> Result<Option<Rewritten>, TransformError> {
        let mut class = ClassFile::parse(original)?;
        let ClassFile { constant_pool: pool, methods, .. } = &mut class;

        let mut targets = Vec::new();
        for (i, method) in methods.iter().enumerate() {
            let name = pool.utf8(method.name_index)?;
            if self.wants(method, &name) {
                if let Some(code_at) = method.code_index(pool) {
                    targets.push((i, code_at, name));
                }
            }
        }
        if targets.is_empty() {
            return Ok(None);
        }

        let entry = pool.add_methodref(HELPER_CLASS, ENTRY_METHOD, ENTRY_DESCRIPTOR)?;
        let class_constant = pool.add_string(class_name)?;

        let mut instrumented = Vec::with_capacity(targets.len());
        for (i, code_at, name) in targets {
            let attribute = &mut methods[i].attributes[code_at];
            let mut code = CodeAttribute::parse(&attribute.info)?;

            let prelude = prelude(class_constant, pool.add_string(&name)?, entry);
            if code.code.starts_with(&prelude) {
                continue;
            }
            inject(&mut code, &prelude, pool, &name)?;
            attribute.info = code.encode()?;
            instrumented.push(name);
        }

        if instrumented.is_empty() {
            return Ok(None);
        }
        Ok(Some(Rewritten { bytes: class.encode()?, methods: instrumented }))
    }

    fn wants(&self, method: &MemberInfo, name: &str) -> bool {
        if method.has_flag(ACC_ABSTRACT) || method.has_flag(ACC_NATIVE) {
            return false;
        }
        self.instrument_constructors || (name != CONSTRUCTOR && name != STATIC_INITIALIZER)
    }
}

/// Put `prelude` in front of the method body and fix up derived metadata
fn inject(
    code: &mut CodeAttribute,
    prelude: &[u8],
    pool: &ConstantPool,
    method: &str,
) -> Result<(), TransformError> {
    let len = code.code.len() + prelude.len();
    if len > MAX_CODE_LENGTH {
        return Err(TransformError::CodeTooLarge { method: method.to_string(), len });
    }
    let shift = u16::try_from(prelude.len())
        .map_err(|_| TransformError::CodeTooLarge { method: method.to_string(), len })?;

    code.relocate(shift, pool)?;
    code.code.splice(0..0, prelude.iter().copied());
    code.max_stack = code.max_stack.max(PRELUDE_STACK_DEPTH);
    Ok(())
}

/// Encode the prelude for one method, padded to a multiple of 4 bytes
#[must_use]
pub fn prelude(class_constant: u16, method_constant: u16, entry: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(12);
    push_ldc(&mut out, class_constant);
    push_ldc(&mut out, method_constant);
    out.put_u8(OP_INVOKESTATIC);
    out.put_u16(entry);
    while out.len() % 4 != 0 {
        out.put_u8(OP_NOP);
    }
    out
}

fn push_ldc(out: &mut Vec<u8>, index: u16) {
    match u8::try_from(index) {
        Ok(narrow) => {
            out.put_u8(OP_LDC);
            out.put_u8(narrow);
        }
        Err(_) => {
            out.put_u8(OP_LDC_W);
            out.put_u16(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_with_narrow_indices() {
        assert_eq!(prelude(3, 4, 5), vec![OP_LDC, 3, OP_LDC, 4, OP_INVOKESTATIC, 0, 5, OP_NOP]);
    }

    #[test]
    fn test_prelude_with_wide_indices() {
        let bytes = prelude(300, 4, 500);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..3], &[OP_LDC_W, 0x01, 0x2C]);

        let bytes = prelude(300, 301, 500);
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(bytes.len(), 12);
    }

    #[test]
    fn test_garbage_is_returned_unchanged() {
        let rewriter = MethodBodyRewriter::default();
        let garbage = [0xCA, 0xFE, 0xBA, 0xBE, 0x00];
        let result = rewriter.rewrite(&garbage, "com/acme/Broken");
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(&*result, &garbage);
    }

    #[test]
    fn test_constructor_exclusion() {
        let hardened = MethodBodyRewriter::new(false);
        let permissive = MethodBodyRewriter::new(true);
        let method = MemberInfo { access_flags: 0, name_index: 1, descriptor_index: 2, attributes: Vec::new() };

        assert!(!hardened.wants(&method, CONSTRUCTOR));
        assert!(!hardened.wants(&method, STATIC_INITIALIZER));
        assert!(hardened.wants(&method, "run"));
        assert!(permissive.wants(&method, CONSTRUCTOR));

        let native = MemberInfo { access_flags: ACC_NATIVE, ..method.clone() };
        let abstract_method = MemberInfo { access_flags: ACC_ABSTRACT, ..method };
        assert!(!permissive.wants(&native, "run"));
        assert!(!permissive.wants(&abstract_method, "run"));
    }
}

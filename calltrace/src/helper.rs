//! The runtime-resident helper class
//!
//! Injected preludes call `calltrace/Tracer.logMethodCalled`, a static native
//! method. The agent generates that class itself and defines it in the
//! bootstrap loader at VM init, so it resolves from every class loader
//! without shipping a jar. The native method is then bound to
//! [`crate::agent`]'s entry point with `RegisterNatives`.

use calltrace_common::{ENTRY_DESCRIPTOR, ENTRY_METHOD, HELPER_CLASS};

use crate::classfile::{
    ClassFile, ConstantPool, MemberInfo, ACC_FINAL, ACC_NATIVE, ACC_PUBLIC, ACC_STATIC, ACC_SUPER,
};
use crate::domain::TransformError;

/// Java 8 class file version, loadable by every VM the agent supports
const HELPER_MAJOR_VERSION: u16 = 52;

/// Build the class file bytes of [`HELPER_CLASS`]
///
/// ```text
/// public final class calltrace.Tracer {
///     public static native void logMethodCalled(String className, String methodName);
/// }
/// ```
///
/// # Errors
/// Only fails if encoding fails, which cannot happen for this fixed shape
pub fn helper_class_bytes() -> Result<Vec<u8>, TransformError> {
    let mut pool = ConstantPool::new();
    let this_class = pool.add_class(HELPER_CLASS)?;
    let super_class = pool.add_class("java/lang/Object")?;
    let name_index = pool.add_utf8(ENTRY_METHOD)?;
    let descriptor_index = pool.add_utf8(ENTRY_DESCRIPTOR)?;

    let class = ClassFile {
        minor_version: 0,
        major_version: HELPER_MAJOR_VERSION,
        constant_pool: pool,
        access_flags: ACC_PUBLIC | ACC_FINAL | ACC_SUPER,
        this_class,
        super_class,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods: vec![MemberInfo {
            access_flags: ACC_PUBLIC | ACC_STATIC | ACC_NATIVE,
            name_index,
            descriptor_index,
            attributes: Vec::new(),
        }],
        attributes: Vec::new(),
    };
    class.encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_declares_static_native_entry() {
        let bytes = helper_class_bytes().unwrap();
        let class = ClassFile::parse(&bytes).unwrap();

        assert_eq!(class.name().unwrap(), HELPER_CLASS);
        assert_eq!(class.constant_pool.class_name(class.super_class).unwrap(), "java/lang/Object");
        assert_eq!(class.methods.len(), 1);

        let method = &class.methods[0];
        assert_eq!(class.method_name(method).unwrap(), ENTRY_METHOD);
        assert_eq!(class.constant_pool.utf8(method.descriptor_index).unwrap(), ENTRY_DESCRIPTOR);
        assert!(method.has_flag(ACC_STATIC));
        assert!(method.has_flag(ACC_NATIVE));
        assert!(method.code(&class.constant_pool).unwrap().is_none());
    }
}

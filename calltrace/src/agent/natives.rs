//! The native side of `calltrace/Tracer`
//!
//! Every injected prelude calls `Tracer.logMethodCalled(String, String)`,
//! which lands in [`log_method_called`] on the traced thread.

#![allow(unsafe_code)] // JNI entry point and JNI calls

use calltrace_common::{ENTRY_DESCRIPTOR, ENTRY_METHOD, HELPER_CLASS};
use jni_sys::{jclass, jsize, jstring, JNIEnv, JNINativeMethod, JNI_OK};
use log::{debug, error};
use std::ffi::{c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use super::jvmti::{delete_local_ref, Jvmti};
use super::{context, LIFECYCLE};
use crate::caller::StackSource;
use crate::classfile::mutf8;
use crate::domain::{JvmtiError, StackFrame};
use crate::helper::helper_class_bytes;
use crate::hook::panic_message;

/// Define [`HELPER_CLASS`] in the bootstrap loader and bind its native method
///
/// # Safety
/// `jni` must be the current thread's JNI environment, in the live phase
pub(crate) unsafe fn install_helper(jni: *mut JNIEnv) -> Result<(), JvmtiError> {
    let bytes = helper_class_bytes()?;
    let define = (**jni).DefineClass.ok_or(JvmtiError::MissingFunction("DefineClass"))?;
    let register = (**jni).RegisterNatives.ok_or(JvmtiError::MissingFunction("RegisterNatives"))?;

    let name = c_string(HELPER_CLASS, "DefineClass")?;
    let len = jsize::try_from(bytes.len()).map_err(|_| JvmtiError::Jni { function: "DefineClass" })?;
    let class = define(jni, name.as_ptr(), ptr::null_mut(), bytes.as_ptr().cast(), len);
    if class.is_null() {
        clear_exception(jni);
        return Err(JvmtiError::Jni { function: "DefineClass" });
    }

    let method = c_string(ENTRY_METHOD, "RegisterNatives")?;
    let descriptor = c_string(ENTRY_DESCRIPTOR, "RegisterNatives")?;
    let natives = [JNINativeMethod {
        name: method.as_ptr().cast_mut(),
        signature: descriptor.as_ptr().cast_mut(),
        fnPtr: log_method_called as *mut c_void,
    }];
    let rc = register(jni, class, natives.as_ptr(), 1);
    delete_local_ref(jni, class);
    if rc != JNI_OK {
        clear_exception(jni);
        return Err(JvmtiError::Jni { function: "RegisterNatives" });
    }

    debug!("Defined {HELPER_CLASS} and bound {ENTRY_METHOD}{ENTRY_DESCRIPTOR}");
    Ok(())
}

fn c_string(value: &str, function: &'static str) -> Result<CString, JvmtiError> {
    CString::new(value).map_err(|_| JvmtiError::Jni { function })
}

/// `static native void logMethodCalled(String className, String methodName)`
///
/// Never unwinds into the VM and never leaves a Java exception pending.
unsafe extern "system" fn log_method_called(
    jni: *mut JNIEnv,
    _class: jclass,
    class_name: jstring,
    method_name: jstring,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| emit(jni, class_name, method_name)));
    if let Err(payload) = outcome {
        error!("Trace emission panicked: {}", panic_message(payload.as_ref()));
    }
}

unsafe fn emit(jni: *mut JNIEnv, class_name: jstring, method_name: jstring) {
    if !LIFECYCLE.is_active() {
        return;
    }
    let Some(context) = context() else {
        return;
    };
    let (Some(class_name), Some(method_name)) = (java_string(jni, class_name), java_string(jni, method_name))
    else {
        return;
    };

    let stack = JvmtiStack {
        jvmti: context.jvmti,
        jni,
        max_depth: context.config.capabilities().caller_max_depth,
    };
    context.emitter.log_method_called(&class_name, &method_name, &stack);
}

/// Copy a `java.lang.String` out of the VM
unsafe fn java_string(jni: *mut JNIEnv, value: jstring) -> Option<String> {
    if value.is_null() {
        return None;
    }
    let get = (**jni).GetStringUTFChars?;
    let release = (**jni).ReleaseStringUTFChars?;

    let chars = get(jni, value, ptr::null_mut());
    if chars.is_null() {
        clear_exception(jni);
        return None;
    }
    let text = mutf8::decode_lossy(CStr::from_ptr(chars).to_bytes());
    release(jni, value, chars);
    Some(text)
}

/// Drop an exception raised by one of our own JNI calls
unsafe fn clear_exception(jni: *mut JNIEnv) {
    let (Some(check), Some(clear)) = ((**jni).ExceptionCheck, (**jni).ExceptionClear) else {
        return;
    };
    if check(jni) != 0 {
        clear(jni);
    }
}

/// The current thread's stack, resolved one frame at a time
struct JvmtiStack {
    jvmti: Jvmti,
    jni: *mut JNIEnv,
    max_depth: u32,
}

impl StackSource for JvmtiStack {
    fn frames(&self) -> Box<dyn Iterator<Item = StackFrame> + '_> {
        let frames = match self.jvmti.stack_trace(self.max_depth) {
            Ok(frames) => frames,
            Err(e) => {
                debug!("Stack capture failed: {e}");
                Vec::new()
            }
        };
        Box::new(frames.into_iter().filter_map(move |frame| {
            // SAFETY: called on the traced thread with its own JNI environment
            match unsafe { self.jvmti.resolve_frame(self.jni, frame.method) } {
                Ok(resolved) => Some(resolved),
                Err(e) => {
                    debug!("Skipping unresolvable frame: {e}");
                    None
                }
            }
        }))
    }
}

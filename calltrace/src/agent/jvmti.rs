//! JVMTI bindings
//!
//! `jni-sys` covers JNI; JVMTI has no equivalent crate in our stack, so the
//! subset of `jvmtiInterface_1_` the agent calls is declared here. Unused
//! slots are kept as padding so every declared function sits at its index
//! from `jvmti.h`. The table layout is stable from JVMTI 1.0 onwards.

#![allow(unsafe_code)] // FFI with the host VM
#![allow(non_snake_case, non_camel_case_types)]

use jni_sys::{jclass, jint, jlong, jmethodID, jobject, JNIEnv, JavaVM, JNI_OK};
use log::debug;
use std::ffi::{c_char, c_uchar, c_void, CStr};
use std::ptr;

use crate::classfile::mutf8;
use crate::config::Properties;
use crate::domain::{JvmtiError, StackFrame};

pub type jthread = jobject;
pub type jlocation = jlong;
pub type jvmtiError = u32;

/// `jvmtiEnv`: pointer to the function table
pub type JvmtiEnv = *const JvmtiInterface;

pub const JVMTI_VERSION_1_2: jint = 0x3001_0200;
pub const JVMTI_ERROR_NONE: jvmtiError = 0;
pub const JVMTI_ENABLE: jint = 1;

pub const JVMTI_EVENT_VM_INIT: jint = 50;
pub const JVMTI_EVENT_VM_DEATH: jint = 51;
pub const JVMTI_EVENT_CLASS_FILE_LOAD_HOOK: jint = 54;

type Pad = Option<unsafe extern "system" fn()>;

/// Leading part of `jvmtiInterface_1_`, through `GetSystemProperty` (slot 131)
#[repr(C)]
pub struct JvmtiInterface {
    _reserved1: *mut c_void,
    pub SetEventNotificationMode:
        Option<unsafe extern "C" fn(env: *mut JvmtiEnv, mode: jint, event_type: jint, event_thread: jthread, ...) -> jvmtiError>,
    _slots_3_to_45: [Pad; 43],
    pub Allocate: Option<unsafe extern "system" fn(env: *mut JvmtiEnv, size: jlong, mem_ptr: *mut *mut c_uchar) -> jvmtiError>,
    pub Deallocate: Option<unsafe extern "system" fn(env: *mut JvmtiEnv, mem: *mut c_uchar) -> jvmtiError>,
    pub GetClassSignature: Option<
        unsafe extern "system" fn(
            env: *mut JvmtiEnv,
            klass: jclass,
            signature_ptr: *mut *mut c_char,
            generic_ptr: *mut *mut c_char,
        ) -> jvmtiError,
    >,
    _slots_49_to_63: [Pad; 15],
    pub GetMethodName: Option<
        unsafe extern "system" fn(
            env: *mut JvmtiEnv,
            method: jmethodID,
            name_ptr: *mut *mut c_char,
            signature_ptr: *mut *mut c_char,
            generic_ptr: *mut *mut c_char,
        ) -> jvmtiError,
    >,
    pub GetMethodDeclaringClass:
        Option<unsafe extern "system" fn(env: *mut JvmtiEnv, method: jmethodID, declaring_class_ptr: *mut jclass) -> jvmtiError>,
    _slots_66_to_103: [Pad; 38],
    pub GetStackTrace: Option<
        unsafe extern "system" fn(
            env: *mut JvmtiEnv,
            thread: jthread,
            start_depth: jint,
            max_frame_count: jint,
            frame_buffer: *mut FrameInfo,
            count_ptr: *mut jint,
        ) -> jvmtiError,
    >,
    _slots_105_to_121: [Pad; 17],
    pub SetEventCallbacks: Option<
        unsafe extern "system" fn(env: *mut JvmtiEnv, callbacks: *const EventCallbacks, size_of_callbacks: jint) -> jvmtiError,
    >,
    _slots_123_to_127: [Pad; 5],
    pub GetErrorName:
        Option<unsafe extern "system" fn(env: *mut JvmtiEnv, error: jvmtiError, name_ptr: *mut *mut c_char) -> jvmtiError>,
    _slot_129: Pad,
    pub GetSystemProperties:
        Option<unsafe extern "system" fn(env: *mut JvmtiEnv, count_ptr: *mut jint, property_ptr: *mut *mut *mut c_char) -> jvmtiError>,
    pub GetSystemProperty: Option<
        unsafe extern "system" fn(env: *mut JvmtiEnv, property: *const c_char, value_ptr: *mut *mut c_char) -> jvmtiError,
    >,
}

/// `jvmtiFrameInfo`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    pub method: jmethodID,
    pub location: jlocation,
}

pub type VmInitFn = unsafe extern "system" fn(jvmti: *mut JvmtiEnv, jni: *mut JNIEnv, thread: jthread);
pub type VmDeathFn = unsafe extern "system" fn(jvmti: *mut JvmtiEnv, jni: *mut JNIEnv);
pub type ThreadFn = unsafe extern "system" fn(jvmti: *mut JvmtiEnv, jni: *mut JNIEnv, thread: jthread);
pub type ClassFileLoadHookFn = unsafe extern "system" fn(
    jvmti: *mut JvmtiEnv,
    jni: *mut JNIEnv,
    class_being_redefined: jclass,
    loader: jobject,
    name: *const c_char,
    protection_domain: jobject,
    class_data_len: jint,
    class_data: *const c_uchar,
    new_class_data_len: *mut jint,
    new_class_data: *mut *mut c_uchar,
);

/// Leading part of `jvmtiEventCallbacks`. JVMTI treats the callbacks past
/// the size it is given as unset.
#[repr(C)]
#[derive(Default)]
pub struct EventCallbacks {
    pub VMInit: Option<VmInitFn>,
    pub VMDeath: Option<VmDeathFn>,
    pub ThreadStart: Option<ThreadFn>,
    pub ThreadEnd: Option<ThreadFn>,
    pub ClassFileLoadHook: Option<ClassFileLoadHookFn>,
}

/// A JVMTI environment
///
/// JVMTI environments may be used from any thread, so the wrapper is shared
/// freely once obtained.
#[derive(Debug, Clone, Copy)]
pub struct Jvmti {
    env: *mut JvmtiEnv,
}

// SAFETY: jvmtiEnv functions are callable from any thread
unsafe impl Send for Jvmti {}
unsafe impl Sync for Jvmti {}

impl Jvmti {
    /// Obtain a JVMTI 1.2 environment from the VM
    ///
    /// # Safety
    /// `vm` must be the `JavaVM` pointer handed to `Agent_OnLoad`
    pub unsafe fn from_vm(vm: *mut JavaVM) -> Result<Self, JvmtiError> {
        let get_env = (**vm).GetEnv.ok_or(JvmtiError::MissingFunction("GetEnv"))?;
        let mut env: *mut c_void = ptr::null_mut();
        let rc = get_env(vm, &mut env, JVMTI_VERSION_1_2);
        if rc != JNI_OK || env.is_null() {
            return Err(JvmtiError::EnvUnavailable(rc));
        }
        Ok(Self { env: env.cast() })
    }

    fn table(&self) -> &JvmtiInterface {
        // SAFETY: `env` points at the VM's function table for the VM's lifetime
        unsafe { &**self.env }
    }

    fn check(&self, function: &'static str, code: jvmtiError) -> Result<(), JvmtiError> {
        if code == JVMTI_ERROR_NONE {
            Ok(())
        } else {
            debug!("{function} returned {}", self.error_name(code));
            Err(JvmtiError::Call { function, code })
        }
    }

    /// Symbolic name of a JVMTI error code, e.g. `JVMTI_ERROR_WRONG_PHASE`
    #[must_use]
    pub fn error_name(&self, code: jvmtiError) -> String {
        let Some(get_error_name) = self.table().GetErrorName else {
            return code.to_string();
        };
        let mut name: *mut c_char = ptr::null_mut();
        // SAFETY: valid env, out-pointer to a local
        let rc = unsafe { get_error_name(self.env, code, &mut name) };
        if rc != JVMTI_ERROR_NONE || name.is_null() {
            return code.to_string();
        }
        self.take_string(name)
    }

    /// Copy `bytes` into memory allocated by JVMTI, as required for class
    /// data returned from `ClassFileLoadHook`
    ///
    /// # Errors
    /// Returns an error if the allocation fails
    pub fn allocate_copy(&self, bytes: &[u8]) -> Result<*mut c_uchar, JvmtiError> {
        let allocate = self.table().Allocate.ok_or(JvmtiError::MissingFunction("Allocate"))?;
        let size = jlong::try_from(bytes.len()).map_err(|_| JvmtiError::Call { function: "Allocate", code: 0 })?;
        let mut mem: *mut c_uchar = ptr::null_mut();
        // SAFETY: valid env, out-pointer to a local
        self.check("Allocate", unsafe { allocate(self.env, size, &mut mem) })?;
        // SAFETY: JVMTI returned a block of at least `size` bytes
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), mem, bytes.len()) };
        Ok(mem)
    }

    fn deallocate<T>(&self, mem: *mut T) {
        if mem.is_null() {
            return;
        }
        if let Some(deallocate) = self.table().Deallocate {
            // SAFETY: `mem` was allocated by this environment
            unsafe { deallocate(self.env, mem.cast()) };
        }
    }

    /// Decode and free a JVMTI-allocated modified UTF-8 string
    fn take_string(&self, raw: *mut c_char) -> String {
        if raw.is_null() {
            return String::new();
        }
        // SAFETY: JVMTI strings are NUL-terminated
        let text = mutf8::decode_lossy(unsafe { CStr::from_ptr(raw) }.to_bytes());
        self.deallocate(raw);
        text
    }

    /// Snapshot of the VM's system properties, `-D` options included
    ///
    /// # Errors
    /// Returns an error if the property names cannot be listed
    pub fn system_properties(&self) -> Result<Properties, JvmtiError> {
        let table = self.table();
        let list = table.GetSystemProperties.ok_or(JvmtiError::MissingFunction("GetSystemProperties"))?;
        let get = table.GetSystemProperty.ok_or(JvmtiError::MissingFunction("GetSystemProperty"))?;

        let mut count: jint = 0;
        let mut keys: *mut *mut c_char = ptr::null_mut();
        // SAFETY: valid env, out-pointers to locals
        self.check("GetSystemProperties", unsafe { list(self.env, &mut count, &mut keys) })?;

        let mut properties = Properties::new();
        for i in 0..usize::try_from(count).unwrap_or(0) {
            // SAFETY: JVMTI returned `count` key pointers
            let key = unsafe { *keys.add(i) };
            if key.is_null() {
                continue;
            }
            let mut value: *mut c_char = ptr::null_mut();
            // SAFETY: `key` is a NUL-terminated string owned by JVMTI
            let rc = unsafe { get(self.env, key, &mut value) };
            let name = self.take_string(key);
            if rc == JVMTI_ERROR_NONE {
                properties.insert(name, self.take_string(value));
            } else {
                self.deallocate(value);
            }
        }
        self.deallocate(keys);
        Ok(properties)
    }

    /// # Errors
    /// Returns an error if the VM rejects the callbacks
    pub fn set_event_callbacks(&self, callbacks: &EventCallbacks) -> Result<(), JvmtiError> {
        let set = self.table().SetEventCallbacks.ok_or(JvmtiError::MissingFunction("SetEventCallbacks"))?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let size = std::mem::size_of::<EventCallbacks>() as jint;
        // SAFETY: JVMTI copies the callback table
        self.check("SetEventCallbacks", unsafe { set(self.env, callbacks, size) })
    }

    /// Enable delivery of `event` on all threads
    ///
    /// # Errors
    /// Returns an error if the event cannot be enabled in the current phase
    pub fn enable_event(&self, event: jint) -> Result<(), JvmtiError> {
        let set_mode = self
            .table()
            .SetEventNotificationMode
            .ok_or(JvmtiError::MissingFunction("SetEventNotificationMode"))?;
        // SAFETY: null thread means globally
        self.check("SetEventNotificationMode", unsafe {
            set_mode(self.env, JVMTI_ENABLE, event, ptr::null_mut())
        })
    }

    /// Method IDs of the current thread's frames, innermost first
    ///
    /// # Errors
    /// Returns an error if the stack cannot be captured
    pub fn stack_trace(&self, max_depth: u32) -> Result<Vec<FrameInfo>, JvmtiError> {
        let get = self.table().GetStackTrace.ok_or(JvmtiError::MissingFunction("GetStackTrace"))?;
        let max = jint::try_from(max_depth).unwrap_or(jint::MAX);
        let mut frames = vec![FrameInfo { method: ptr::null_mut(), location: 0 }; usize::try_from(max).unwrap_or(0)];
        let mut count: jint = 0;
        // SAFETY: the buffer holds `max` frames; null thread is the current thread
        self.check("GetStackTrace", unsafe {
            get(self.env, ptr::null_mut(), 0, max, frames.as_mut_ptr(), &mut count)
        })?;
        frames.truncate(usize::try_from(count).unwrap_or(0));
        Ok(frames)
    }

    /// Resolve a method ID to its declaring class and name
    ///
    /// # Errors
    /// Returns an error if the method or its class cannot be queried
    ///
    /// # Safety
    /// `jni` must be the current thread's JNI environment
    pub unsafe fn resolve_frame(&self, jni: *mut JNIEnv, method: jmethodID) -> Result<StackFrame, JvmtiError> {
        let table = self.table();
        let get_name = table.GetMethodName.ok_or(JvmtiError::MissingFunction("GetMethodName"))?;
        let get_class = table.GetMethodDeclaringClass.ok_or(JvmtiError::MissingFunction("GetMethodDeclaringClass"))?;
        let get_signature = table.GetClassSignature.ok_or(JvmtiError::MissingFunction("GetClassSignature"))?;

        let mut name: *mut c_char = ptr::null_mut();
        self.check(
            "GetMethodName",
            get_name(self.env, method, &mut name, ptr::null_mut(), ptr::null_mut()),
        )?;
        let method_name = self.take_string(name);

        let mut class: jclass = ptr::null_mut();
        self.check("GetMethodDeclaringClass", get_class(self.env, method, &mut class))?;

        let mut signature: *mut c_char = ptr::null_mut();
        let rc = get_signature(self.env, class, &mut signature, ptr::null_mut());
        delete_local_ref(jni, class);
        self.check("GetClassSignature", rc)?;

        Ok(StackFrame::from_signature(&self.take_string(signature), method_name))
    }
}

/// # Safety
/// `jni` must be the current thread's JNI environment
pub(crate) unsafe fn delete_local_ref(jni: *mut JNIEnv, obj: jobject) {
    if jni.is_null() || obj.is_null() {
        return;
    }
    if let Some(delete) = (**jni).DeleteLocalRef {
        delete(jni, obj);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    const SLOT: usize = size_of::<*const c_void>();

    /// Byte offset of a 1-based `jvmti.h` function slot
    fn slot(index: usize) -> usize {
        (index - 1) * SLOT
    }

    #[test]
    fn test_function_table_layout() {
        assert_eq!(offset_of!(JvmtiInterface, SetEventNotificationMode), slot(2));
        assert_eq!(offset_of!(JvmtiInterface, Allocate), slot(46));
        assert_eq!(offset_of!(JvmtiInterface, Deallocate), slot(47));
        assert_eq!(offset_of!(JvmtiInterface, GetClassSignature), slot(48));
        assert_eq!(offset_of!(JvmtiInterface, GetMethodName), slot(64));
        assert_eq!(offset_of!(JvmtiInterface, GetMethodDeclaringClass), slot(65));
        assert_eq!(offset_of!(JvmtiInterface, GetStackTrace), slot(104));
        assert_eq!(offset_of!(JvmtiInterface, SetEventCallbacks), slot(122));
        assert_eq!(offset_of!(JvmtiInterface, GetErrorName), slot(128));
        assert_eq!(offset_of!(JvmtiInterface, GetSystemProperties), slot(130));
        assert_eq!(offset_of!(JvmtiInterface, GetSystemProperty), slot(131));
    }

    #[test]
    fn test_callback_table_layout() {
        assert_eq!(size_of::<EventCallbacks>(), 5 * SLOT);
        assert_eq!(offset_of!(EventCallbacks, ClassFileLoadHook), 4 * SLOT);
    }

    #[test]
    fn test_frame_info_layout() {
        assert_eq!(size_of::<FrameInfo>(), 16);
    }
}

//! # Host Integration
//!
//! The JVM loads the agent with `-agentpath:<lib>` and calls
//! [`Agent_OnLoad`] before any application class exists.
//!
//! ```text
//! Agent_OnLoad        JVMTI env, system properties → Config     Configured
//!                     sink, hook, emitter → AgentContext
//!                     callbacks + events enabled                 Hooked
//! VMInit              define calltrace/Tracer, RegisterNatives   Active
//! ClassFileLoadHook   LoadTimeHook::transform (only while Active)
//! Tracer.logMethodCalled → TraceEmitter (only while Active)
//! VMDeath / Agent_OnUnload   close sink once                    Terminated
//! ```
//!
//! Classes loaded before `VMInit` pass through unmodified: the helper class
//! cannot be defined earlier, and a prelude calling an undefined class would
//! break them.
//!
//! Nothing here can fail the host: initialization errors disable the agent
//! and every callback catches panics at the boundary.

#![allow(unsafe_code)] // JVMTI entry points and callbacks

pub mod jvmti;
pub mod lifecycle;
mod natives;

pub use lifecycle::{AgentState, Lifecycle};

use calltrace_common::HELPER_CLASS;
use jni_sys::{jclass, jint, jobject, JNIEnv, JavaVM, JNI_OK};
use log::{debug, error, info, warn};
use std::borrow::Cow;
use std::ffi::{c_char, c_uchar, c_void, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::OnceLock;

use self::jvmti::{
    jthread, EventCallbacks, Jvmti, JvmtiEnv, JVMTI_EVENT_CLASS_FILE_LOAD_HOOK, JVMTI_EVENT_VM_DEATH,
    JVMTI_EVENT_VM_INIT,
};
use crate::classfile::mutf8;
use crate::config::{self, Config, Properties};
use crate::domain::{ClassLoadRequest, JvmtiError};
use crate::emitter::{TraceEmitter, TraceSink};
use crate::hook::{panic_message, LoadTimeHook};

/// Environment variable holding the `env_logger` filter for agent diagnostics
pub const LOG_ENV: &str = "CALLTRACE_LOG";

/// Process-wide state, built once in `Agent_OnLoad` and read-only afterwards
#[derive(Debug)]
pub struct AgentContext {
    jvmti: Jvmti,
    config: Config,
    hook: LoadTimeHook,
    emitter: TraceEmitter,
}

static CONTEXT: OnceLock<AgentContext> = OnceLock::new();
static LIFECYCLE: Lifecycle = Lifecycle::new();

fn context() -> Option<&'static AgentContext> {
    CONTEXT.get()
}

/// Current lifecycle state of the agent
#[must_use]
pub fn state() -> AgentState {
    LIFECYCLE.state()
}

/// Run a callback body, turning a panic into a log line
fn guarded(what: &str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        error!("{what} panicked: {}", panic_message(payload.as_ref()));
    }
}

/// # Safety
/// Called by the JVM with a valid `JavaVM` pointer
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn Agent_OnLoad(vm: *mut JavaVM, _options: *mut c_char, _reserved: *mut c_void) -> jint {
    let _ = env_logger::Builder::from_env(env_logger::Env::new().filter_or(LOG_ENV, "warn")).try_init();
    info!("Agent starting...");

    guarded("Agent_OnLoad", || match on_load(vm) {
        Ok(()) => info!("Agent started"),
        Err(e) => error!("Agent initialization error: {e}; tracing disabled"),
    });
    JNI_OK
}

/// # Safety
/// Called by the JVM during shutdown
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn Agent_OnUnload(_vm: *mut JavaVM) {
    guarded("Agent_OnUnload", shutdown);
}

unsafe fn on_load(vm: *mut JavaVM) -> Result<(), JvmtiError> {
    if LIFECYCLE.state() != AgentState::Uninitialized {
        warn!("Agent was already initialized, skipping initialization");
        return Ok(());
    }

    let jvmti = Jvmti::from_vm(vm)?;
    debug!("JVMTI environment obtained");

    let system = jvmti.system_properties().unwrap_or_else(|e| {
        warn!("Unable to read system properties: {e}");
        Properties::new()
    });
    let config = config::resolve(&system);
    info!("Resolved configuration:\n{config}");
    LIFECYCLE.advance(AgentState::Uninitialized, AgentState::Configured);

    let sink = TraceSink::open(&config);
    info!("Trace output: {}", sink.kind());
    let context = AgentContext {
        jvmti,
        hook: LoadTimeHook::from_config(&config),
        emitter: TraceEmitter::from_config(&config, sink),
        config,
    };
    if CONTEXT.set(context).is_err() {
        warn!("Agent context already set, skipping initialization");
        return Ok(());
    }

    let callbacks = EventCallbacks {
        VMInit: Some(on_vm_init),
        VMDeath: Some(on_vm_death),
        ClassFileLoadHook: Some(on_class_file_load_hook),
        ..EventCallbacks::default()
    };
    jvmti.set_event_callbacks(&callbacks)?;
    for event in [JVMTI_EVENT_VM_INIT, JVMTI_EVENT_VM_DEATH, JVMTI_EVENT_CLASS_FILE_LOAD_HOOK] {
        jvmti.enable_event(event)?;
    }
    debug!("Event callbacks set and events enabled");
    LIFECYCLE.advance(AgentState::Configured, AgentState::Hooked);
    Ok(())
}

unsafe extern "system" fn on_vm_init(_jvmti: *mut JvmtiEnv, jni: *mut JNIEnv, _thread: jthread) {
    guarded("VMInit", || {
        // SAFETY: VMInit runs in the live phase with this thread's JNI env
        match unsafe { natives::install_helper(jni) } {
            Ok(()) => {
                if LIFECYCLE.advance(AgentState::Hooked, AgentState::Active) {
                    info!("Tracing active");
                }
            }
            Err(e) => error!("Failed to install {HELPER_CLASS}: {e}; classes will load uninstrumented"),
        }
    });
}

unsafe extern "system" fn on_vm_death(_jvmti: *mut JvmtiEnv, _jni: *mut JNIEnv) {
    guarded("VMDeath", shutdown);
}

/// Close the sink exactly once, whichever of `VMDeath` and `Agent_OnUnload`
/// gets here first
fn shutdown() {
    if !LIFECYCLE.begin_shutdown() {
        return;
    }
    info!("Agent shutting down...");
    if let Some(context) = context() {
        context.emitter.close();
    }
    LIFECYCLE.finish_shutdown();
    info!("Agent terminated");
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn on_class_file_load_hook(
    _jvmti: *mut JvmtiEnv,
    _jni: *mut JNIEnv,
    class_being_redefined: jclass,
    _loader: jobject,
    name: *const c_char,
    _protection_domain: jobject,
    class_data_len: jint,
    class_data: *const c_uchar,
    new_class_data_len: *mut jint,
    new_class_data: *mut *mut c_uchar,
) {
    if !LIFECYCLE.is_active() {
        return;
    }
    let Some(context) = context() else {
        return;
    };
    guarded("ClassFileLoadHook", || {
        let Ok(len) = usize::try_from(class_data_len) else {
            return;
        };
        if class_data.is_null() || new_class_data.is_null() || new_class_data_len.is_null() {
            return;
        }
        // SAFETY: the VM guarantees `class_data` holds `class_data_len` bytes
        // and `name` is null or a NUL-terminated string for this call
        let (class_data, raw_name) = unsafe {
            (slice::from_raw_parts(class_data, len), (!name.is_null()).then(|| CStr::from_ptr(name).to_bytes()))
        };
        let class_name = raw_name.and_then(decode_class_name);

        let request = ClassLoadRequest {
            class_name: class_name.as_deref(),
            redefining: !class_being_redefined.is_null(),
            class_data,
        };
        let Some(bytes) = context.hook.transform(&request) else {
            return;
        };

        let Ok(new_len) = jint::try_from(bytes.len()) else {
            warn!("Rewritten class {} is too large, loading it unchanged", class_name.unwrap_or_default());
            return;
        };
        match context.jvmti.allocate_copy(&bytes) {
            Ok(mem) => {
                // SAFETY: out-pointers supplied by the VM for this call
                unsafe {
                    *new_class_data_len = new_len;
                    *new_class_data = mem;
                }
            }
            Err(e) => warn!("Error while transforming class {}: {e}", class_name.unwrap_or_default()),
        }
    });
}

/// Decode a class name from modified UTF-8, borrowing when it is plain UTF-8
fn decode_class_name(raw: &[u8]) -> Option<Cow<'_, str>> {
    match std::str::from_utf8(raw) {
        Ok(name) => Some(Cow::Borrowed(name)),
        Err(_) => mutf8::decode(raw).map(Cow::Owned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_name_decoding() {
        assert_eq!(decode_class_name(b"com/acme/Widget").as_deref(), Some("com/acme/Widget"));
        assert!(matches!(decode_class_name(b"com/acme/Widget"), Some(Cow::Borrowed(_))));

        // U+1F600 as a surrogate pair in modified UTF-8
        let raw = [b'a', b'/', 0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80];
        assert_eq!(decode_class_name(&raw).as_deref(), Some("a/\u{1F600}"));
    }

    #[test]
    fn test_state_before_load() {
        assert_eq!(state(), AgentState::Uninitialized);
    }
}

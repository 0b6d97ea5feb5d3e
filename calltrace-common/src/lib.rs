//! # Shared Constants (Agent ↔ Injected Bytecode ↔ Tooling)
//!
//! Names and formats that must agree between three parties:
//!
//! 1. The native agent (`calltrace`), which defines the helper class and binds
//!    its native entry point
//! 2. The bytecode injected into every traced method, which calls that entry
//!    point by name and descriptor
//! 3. Log consumers (`xtask verify-trace`, downstream scripts), which parse the
//!    emitted trace lines
//!
//! ## Key Items
//!
//! - [`HELPER_CLASS`], [`ENTRY_METHOD`], [`ENTRY_DESCRIPTOR`] - injected call target
//! - `PROP_*` - recognized configuration keys
//! - [`TraceLine`] / [`parse_trace_line`] - the stable trace line grammar

#![no_std]

// ============================================================================
// Injected Call Target
// ============================================================================

/// Binary name of the class the agent defines in the bootstrap loader.
///
/// Every instrumented method calls a static native method on this class, so
/// the class must be resolvable from any class loader.
pub const HELPER_CLASS: &str = "calltrace/Tracer";

/// Package prefix of the helper class. Classes under it are never rewritten.
pub const HELPER_PACKAGE: &str = "calltrace/";

/// Name of the static native method invoked by the injected prelude
pub const ENTRY_METHOD: &str = "logMethodCalled";

/// JVM descriptor of [`ENTRY_METHOD`]: `(String className, String methodName) -> void`
pub const ENTRY_DESCRIPTOR: &str = "(Ljava/lang/String;Ljava/lang/String;)V";

/// Operand stack slots the injected prelude needs (two string references)
pub const PRELUDE_STACK_DEPTH: u16 = 2;

// ============================================================================
// Configuration Keys
// ============================================================================

/// System property naming an optional `.properties` file
pub const PROP_CONFIG_FILE: &str = "config.file";

/// Comma-separated target packages, dotted or slashed
pub const PROP_TARGET_PACKAGES: &str = "target.packages";

/// Require a package separator right after a matched prefix
pub const PROP_TARGET_PACKAGES_STRICT: &str = "target.packages.strict";

/// Path of the trace file; blank or absent means console
pub const PROP_OUTPUT_FILE_PATH: &str = "output.file.path";

/// What to do when the trace file cannot be opened: `console` or `discard`
pub const PROP_OUTPUT_FILE_FALLBACK: &str = "output.file.fallback";

/// Also trace constructors and static initializers
pub const PROP_INSTRUMENT_CONSTRUCTORS: &str = "instrument.constructors";

/// Attach the nearest target caller to each trace line
pub const PROP_CALLER_CONTEXT_ENABLED: &str = "caller.context.enabled";

/// Maximum number of stack frames inspected per traced call
pub const PROP_CALLER_CONTEXT_MAX_DEPTH: &str = "caller.context.max.depth";

/// Prefix used when no target packages are configured
pub const DEFAULT_TARGET_PREFIX: &str = "org/eclipse/edc";

// ============================================================================
// Trace Line Grammar
// ============================================================================

/// Marker between the timestamp and the called method
pub const LINE_MARKER: &str = "METHOD CALLED --> Class: \"";

const METHOD_SEPARATOR: &str = "\", Method: \"";
const CALLER_MARKER: &str = "\" --> Caller Class: \"";
const CALLER_METHOD_SEPARATOR: &str = "\", Caller Method \"";

/// One parsed trace line, borrowing from the input
///
/// Class names are in dotted form, exactly as written by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceLine<'a> {
    pub timestamp: &'a str,
    pub class_name: &'a str,
    pub method_name: &'a str,
    /// `(caller class, caller method)` when caller context was attached
    pub caller: Option<(&'a str, &'a str)>,
}

/// Parse a single trace line (without its line terminator)
///
/// Returns `None` when the line does not follow the grammar:
///
/// ```text
/// <timestamp> METHOD CALLED --> Class: "<class>", Method: "<method>"[ --> Caller Class: "<class>", Caller Method "<method>"]
/// ```
#[must_use]
pub fn parse_trace_line(line: &str) -> Option<TraceLine<'_>> {
    let (timestamp, rest) = line.split_once(' ')?;
    if timestamp.is_empty() {
        return None;
    }

    let rest = rest.strip_prefix(LINE_MARKER)?;
    let (class_name, rest) = rest.split_once(METHOD_SEPARATOR)?;

    // Without caller context the line ends with the closing quote of the method
    if let Some((method_name, caller)) = rest.split_once(CALLER_MARKER) {
        let (caller_class, caller_rest) = caller.split_once(CALLER_METHOD_SEPARATOR)?;
        let caller_method = caller_rest.strip_suffix('"')?;
        return Some(TraceLine {
            timestamp,
            class_name,
            method_name,
            caller: Some((caller_class, caller_method)),
        });
    }

    let method_name = rest.strip_suffix('"')?;
    Some(TraceLine { timestamp, class_name, method_name, caller: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_without_caller() {
        let line = "2026-01-02T03:04:05.678 METHOD CALLED --> Class: \"com.acme.Widget\", Method: \"run\"";
        let parsed = parse_trace_line(line).unwrap();

        assert_eq!(parsed.timestamp, "2026-01-02T03:04:05.678");
        assert_eq!(parsed.class_name, "com.acme.Widget");
        assert_eq!(parsed.method_name, "run");
        assert_eq!(parsed.caller, None);
    }

    #[test]
    fn test_parse_line_with_caller() {
        let line = "2026-01-02T03:04:05 METHOD CALLED --> Class: \"com.acme.Widget\", Method: \"run\" \
                    --> Caller Class: \"com.acme.Main\", Caller Method \"main\"";
        let parsed = parse_trace_line(line).unwrap();

        assert_eq!(parsed.method_name, "run");
        assert_eq!(parsed.caller, Some(("com.acme.Main", "main")));
    }

    #[test]
    fn test_parse_rejects_truncated_lines() {
        assert!(parse_trace_line("").is_none());
        assert!(parse_trace_line("2026-01-02T03:04:05 METHOD CALLED --> Class: \"a.B\"").is_none());
        assert!(parse_trace_line("2026-01-02T03:04:05 METHOD CALLED --> Class: \"a.B\", Method: \"run").is_none());
        assert!(parse_trace_line(" METHOD CALLED --> Class: \"a.B\", Method: \"run\"").is_none());
    }

    #[test]
    fn test_parse_rejects_half_written_caller() {
        let line = "t METHOD CALLED --> Class: \"a.B\", Method: \"run\" --> Caller Class: \"a.C\"";
        assert!(parse_trace_line(line).is_none());
    }
}

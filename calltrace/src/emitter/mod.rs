//! # Trace Emission
//!
//! The run-time half of the agent. Every injected prelude ends up in
//! [`TraceEmitter::log_method_called`] on the application thread that entered
//! the traced method, before any of that method's own code runs.
//!
//! ```text
//! log_method_called(class, method, stack)
//!   ├─ CallerContextResolver (optional, walks `stack` lazily)
//!   ├─ TraceRecord::now(..).to_string()     outside the lock
//!   └─ TraceSink::write_line                write + '\n' + flush under lock
//! ```
//!
//! Nothing here returns an error to the caller: a failed write is reported
//! and the traced program carries on.

pub mod record;
pub mod sink;

pub use record::{TraceRecord, TIMESTAMP_FORMAT};
pub use sink::{SinkKind, TraceSink};

use log::error;

use crate::caller::{CallerContextResolver, StackSource};
use crate::config::Config;
use crate::filter::TargetFilter;

/// Formats and writes one line per traced call
#[derive(Debug)]
pub struct TraceEmitter {
    sink: TraceSink,
    /// `None` when caller context is disabled
    resolver: Option<CallerContextResolver>,
}

impl TraceEmitter {
    #[must_use]
    pub fn new(sink: TraceSink, resolver: Option<CallerContextResolver>) -> Self {
        Self { sink, resolver }
    }

    /// Emitter writing to `sink`, with caller context as configured
    #[must_use]
    pub fn from_config(config: &Config, sink: TraceSink) -> Self {
        let resolver = config
            .capabilities()
            .caller_context
            .then(|| CallerContextResolver::new(TargetFilter::from_config(config)));
        Self::new(sink, resolver)
    }

    #[must_use]
    pub fn sink(&self) -> &TraceSink {
        &self.sink
    }

    #[must_use]
    pub fn caller_context_enabled(&self) -> bool {
        self.resolver.is_some()
    }

    /// Emit the trace line for entering `class_name.method_name`
    ///
    /// `stack` is only walked when caller context is enabled.
    pub fn log_method_called<S>(&self, class_name: &str, method_name: &str, stack: &S)
    where
        S: StackSource + ?Sized,
    {
        let caller = self
            .resolver
            .as_ref()
            .and_then(|resolver| resolver.resolve_from(stack, class_name, method_name));

        let line = TraceRecord::now(class_name, method_name, caller.as_ref()).to_string();
        if let Err(e) = self.sink.write_line(&line) {
            error!("{e}");
        }
    }

    /// Flush and close the sink; safe to call more than once
    pub fn close(&self) {
        if let Err(e) = self.sink.close() {
            error!("Error closing trace output: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Capabilities;
    use crate::domain::StackFrame;
    use calltrace_common::parse_trace_line;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Panics if walked; proves the stack is left alone
    struct UntouchableStack;

    impl StackSource for UntouchableStack {
        fn frames(&self) -> Box<dyn Iterator<Item = StackFrame> + '_> {
            panic!("stack walked with caller context disabled");
        }
    }

    fn emitter(config: &Config) -> (TraceEmitter, SharedBuffer) {
        let buffer = SharedBuffer::default();
        (TraceEmitter::from_config(config, TraceSink::from_writer(buffer.clone())), buffer)
    }

    #[test]
    fn test_line_with_caller_context() {
        let (emitter, buffer) = emitter(&Config::new(["com.acme"]));
        let stack = vec![
            StackFrame::new("com/acme/Widget", "run"),
            StackFrame::new("org/lib/Runner", "go"),
            StackFrame::new("com/acme/Main", "main"),
        ];
        emitter.log_method_called("com/acme/Widget", "run", &stack);

        let out = buffer.contents();
        let line = parse_trace_line(out.trim_end()).unwrap();
        assert_eq!(line.class_name, "com.acme.Widget");
        assert_eq!(line.method_name, "run");
        assert_eq!(line.caller, Some(("com.acme.Main", "main")));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn test_no_caller_from_non_target_class() {
        let (emitter, buffer) = emitter(&Config::new(["com.acme"]));
        let stack = vec![StackFrame::new("com/acme/Widget", "run"), StackFrame::new("org/lib/Runner", "go")];
        emitter.log_method_called("com/acme/Widget", "run", &stack);

        let out = buffer.contents();
        assert!(out.trim_end().ends_with("METHOD CALLED --> Class: \"com.acme.Widget\", Method: \"run\""));
    }

    #[test]
    fn test_caller_context_disabled_skips_stack() {
        let capabilities = Capabilities { caller_context: false, ..Capabilities::default() };
        let config = Config::new(["com.acme"]).with_capabilities(capabilities);
        let (emitter, buffer) = emitter(&config);
        assert!(!emitter.caller_context_enabled());

        emitter.log_method_called("com/acme/Widget", "run", &UntouchableStack);
        assert_eq!(buffer.contents().lines().count(), 1);
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        let emitter = TraceEmitter::new(TraceSink::from_writer(FailingWriter), None);
        emitter.log_method_called("com/acme/Widget", "run", &UntouchableStack);
        emitter.log_method_called("com/acme/Widget", "run", &UntouchableStack);
    }

    #[test]
    fn test_emissions_after_close_are_dropped() {
        let (emitter, buffer) = emitter(&Config::new(["com.acme"]));
        let stack: Vec<StackFrame> = Vec::new();

        emitter.log_method_called("com/acme/Widget", "run", &stack);
        emitter.close();
        emitter.close();
        emitter.log_method_called("com/acme/Widget", "stop", &stack);

        assert_eq!(buffer.contents().lines().count(), 1);
    }
}

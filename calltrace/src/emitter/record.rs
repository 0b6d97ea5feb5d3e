//! Trace line formatting

use chrono::{Local, NaiveDateTime};
use std::fmt;

use crate::domain::{dotted, StackFrame};

/// Local time, ISO-8601 without offset, with as many fraction digits as needed
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// One traced call, ready to be rendered as a line
#[derive(Debug, Clone, Copy)]
pub struct TraceRecord<'a> {
    pub timestamp: NaiveDateTime,
    /// Binary (slash) name, rendered dotted
    pub class_name: &'a str,
    pub method_name: &'a str,
    pub caller: Option<&'a StackFrame>,
}

impl<'a> TraceRecord<'a> {
    /// Record stamped with the current local wall-clock time
    #[must_use]
    pub fn now(class_name: &'a str, method_name: &'a str, caller: Option<&'a StackFrame>) -> Self {
        Self { timestamp: Local::now().naive_local(), class_name, method_name, caller }
    }
}

impl fmt::Display for TraceRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} METHOD CALLED --> Class: \"{}\", Method: \"{}\"",
            self.timestamp.format(TIMESTAMP_FORMAT),
            dotted(self.class_name),
            self.method_name
        )?;
        if let Some(caller) = self.caller {
            write!(
                f,
                " --> Caller Class: \"{}\", Caller Method \"{}\"",
                dotted(&caller.class_name),
                caller.method_name
            )?;
        }
        Ok(())
    }
}

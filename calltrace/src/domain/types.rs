//! Core domain types shared by the load-time and run-time halves of the agent

use std::borrow::Cow;
use std::fmt;

/// Convert a binary class name (`com/acme/Widget`) to its dotted form
/// (`com.acme.Widget`), borrowing when there is nothing to replace.
#[must_use]
pub fn dotted(class_name: &str) -> Cow<'_, str> {
    if class_name.contains('/') {
        Cow::Owned(class_name.replace('/', "."))
    } else {
        Cow::Borrowed(class_name)
    }
}

/// Convert a dotted package or class name to binary form
#[must_use]
pub fn slashed(name: &str) -> String {
    name.replace('.', "/")
}

/// One resolved frame of a thread's call stack
///
/// Method identity is `(class, name)` only. Overloads are indistinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackFrame {
    /// Declaring class in binary (slash) form
    pub class_name: String,
    pub method_name: String,
}

impl StackFrame {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self { class_name: class_name.into(), method_name: method_name.into() }
    }

    /// Build a frame from a JVM type signature such as `Lcom/acme/Widget;`
    #[must_use]
    pub fn from_signature(signature: &str, method_name: impl Into<String>) -> Self {
        let class_name = signature
            .strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
            .unwrap_or(signature);
        Self::new(class_name, method_name)
    }

    #[must_use]
    pub fn is(&self, class_name: &str, method_name: &str) -> bool {
        self.class_name == class_name && self.method_name == method_name
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", dotted(&self.class_name), self.method_name)
    }
}

/// A class offered to the load-time hook by the host
#[derive(Debug, Clone, Copy)]
pub struct ClassLoadRequest<'a> {
    /// Binary class name; `None` when the host cannot name the class
    pub class_name: Option<&'a str>,
    /// Set when the host is redefining or retransforming an existing class
    pub redefining: bool,
    /// Class file bytes as supplied by the host
    pub class_data: &'a [u8],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_borrows_when_unchanged() {
        assert!(matches!(dotted("Widget"), Cow::Borrowed("Widget")));
        assert_eq!(dotted("com/acme/Widget$Inner"), "com.acme.Widget$Inner");
    }

    #[test]
    fn test_slashed() {
        assert_eq!(slashed("com.acme"), "com/acme");
        assert_eq!(slashed("com/acme"), "com/acme");
    }

    #[test]
    fn test_frame_from_signature() {
        let frame = StackFrame::from_signature("Lcom/acme/Widget;", "run");
        assert_eq!(frame.class_name, "com/acme/Widget");
        assert!(frame.is("com/acme/Widget", "run"));
        assert!(!frame.is("com/acme/Widget", "stop"));
        assert_eq!(frame.to_string(), "com.acme.Widget.run");
    }
}

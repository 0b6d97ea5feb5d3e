//! Caller context resolution
//!
//! Given the current thread's stack (most recent frame first), find the
//! nearest frame below the traced method that belongs to a target package.
//! The stack is consumed as an iterator so a lazy source, such as the JVMTI
//! walker in [`crate::agent`], stops resolving frames once a caller is found.

use crate::domain::StackFrame;
use crate::filter::TargetFilter;

/// Something that can produce the calling thread's frames, innermost first
pub trait StackSource {
    /// Frames of the current thread, most recent first
    fn frames(&self) -> Box<dyn Iterator<Item = StackFrame> + '_>;
}

impl StackSource for [StackFrame] {
    fn frames(&self) -> Box<dyn Iterator<Item = StackFrame> + '_> {
        Box::new(self.iter().cloned())
    }
}

impl StackSource for Vec<StackFrame> {
    fn frames(&self) -> Box<dyn Iterator<Item = StackFrame> + '_> {
        self.as_slice().frames()
    }
}

/// Finds the nearest target-package frame that called a traced method
#[derive(Debug, Clone)]
pub struct CallerContextResolver {
    filter: TargetFilter,
}

impl CallerContextResolver {
    #[must_use]
    pub fn new(filter: TargetFilter) -> Self {
        Self { filter }
    }

    /// Resolve the caller of `called_class.called_method`
    ///
    /// Frames are skipped until the first one equal to the called method
    /// (the injected call site). From the next frame on, the first frame
    /// whose class is a target is the caller. `None` when the called frame
    /// is missing or no target frame follows it.
    ///
    /// Recursion resolves to the recursive frame itself: for `A.f -> A.f`
    /// the inner call reports `A.f` as its caller.
    pub fn resolve_caller<I>(
        &self,
        frames: I,
        called_class: &str,
        called_method: &str,
    ) -> Option<StackFrame>
    where
        I: IntoIterator<Item = StackFrame>,
    {
        let mut frames = frames.into_iter();
        frames.by_ref().find(|frame| frame.is(called_class, called_method))?;
        frames.find(|frame| self.filter.is_target(&frame.class_name))
    }

    /// [`Self::resolve_caller`] over a [`StackSource`]
    pub fn resolve_from<S>(&self, source: &S, called_class: &str, called_method: &str) -> Option<StackFrame>
    where
        S: StackSource + ?Sized,
    {
        self.resolve_caller(source.frames(), called_class, called_method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> CallerContextResolver {
        CallerContextResolver::new(TargetFilter::new(["a/"], false))
    }

    /// `A.foo -> B.bar -> A.baz`, innermost first, with the native entry on top
    fn nested_stack() -> Vec<StackFrame> {
        vec![
            StackFrame::new("calltrace/Tracer", "logMethodCalled"),
            StackFrame::new("a/A", "baz"),
            StackFrame::new("b/B", "bar"),
            StackFrame::new("a/A", "foo"),
            StackFrame::new("java/lang/Thread", "run"),
        ]
    }

    #[test]
    fn test_target_caller_through_non_target_frame() {
        let caller = resolver().resolve_from(&nested_stack(), "a/A", "baz");
        assert_eq!(caller, Some(StackFrame::new("a/A", "foo")));
    }

    #[test]
    fn test_scan_from_non_target_frame_finds_enclosing_target() {
        // B.bar is never instrumented, but the scan itself still finds A.foo
        let caller = resolver().resolve_from(&nested_stack(), "b/B", "bar");
        assert_eq!(caller, Some(StackFrame::new("a/A", "foo")));
    }

    #[test]
    fn test_outermost_target_has_no_caller() {
        assert_eq!(resolver().resolve_from(&nested_stack(), "a/A", "foo"), None);
    }

    #[test]
    fn test_called_frame_missing() {
        assert_eq!(resolver().resolve_from(&nested_stack(), "a/A", "qux"), None);
        assert_eq!(resolver().resolve_caller(Vec::new(), "a/A", "baz"), None);
    }

    #[test]
    fn test_first_matching_frame_is_the_call_site() {
        let stack = vec![
            StackFrame::new("a/A", "walk"),
            StackFrame::new("a/A", "walk"),
            StackFrame::new("a/A", "main"),
        ];
        assert_eq!(resolver().resolve_from(&stack, "a/A", "walk"), Some(StackFrame::new("a/A", "walk")));
    }

    #[test]
    fn test_scan_stops_at_first_caller() {
        let mut pulled = 0;
        let frames = nested_stack().into_iter().inspect(|_| pulled += 1);
        let caller = resolver().resolve_caller(frames, "a/A", "baz");

        assert_eq!(caller, Some(StackFrame::new("a/A", "foo")));
        assert_eq!(pulled, 4);
    }
}

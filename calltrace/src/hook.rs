//! Load-time hook: the one place the host hands class bytes to the agent
//!
//! Called from the `ClassFileLoadHook` event on whatever thread is loading
//! the class. The hook holds only read-only state, so concurrent loads need
//! no coordination.

use calltrace_common::HELPER_PACKAGE;
use log::{debug, error};
use std::any::Any;
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};

use crate::config::Config;
use crate::domain::{ClassLoadRequest, TransformError};
use crate::filter::TargetFilter;
use crate::rewriter::MethodBodyRewriter;

/// Routes each loading class through the eligibility filter and the rewriter
#[derive(Debug, Clone)]
pub struct LoadTimeHook {
    filter: TargetFilter,
    rewriter: MethodBodyRewriter,
}

impl LoadTimeHook {
    #[must_use]
    pub fn new(filter: TargetFilter, rewriter: MethodBodyRewriter) -> Self {
        Self { filter, rewriter }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(TargetFilter::from_config(config), MethodBodyRewriter::from_config(config))
    }

    #[must_use]
    pub fn filter(&self) -> &TargetFilter {
        &self.filter
    }

    /// Replacement bytes for `request`, or `None` to load the class unchanged
    ///
    /// Never panics: a panic inside the rewriter is caught here, reported and
    /// treated as "no change".
    #[must_use]
    pub fn transform(&self, request: &ClassLoadRequest<'_>) -> Option<Vec<u8>> {
        if !self.filter.eligible(request.class_name) {
            return None;
        }
        let class_name = request.class_name?;
        if class_name.starts_with(HELPER_PACKAGE) {
            return None;
        }
        if request.redefining {
            debug!("Class {class_name} is being redefined, instrumenting the new definition");
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.rewriter.rewrite(request.class_data, class_name)
        }));
        match outcome {
            Ok(Cow::Owned(bytes)) => Some(bytes),
            Ok(Cow::Borrowed(_)) => None,
            Err(payload) => {
                let err = TransformError::Panicked(panic_message(payload.as_ref()));
                error!("Error while transforming class {class_name}: {err}");
                None
            }
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook() -> LoadTimeHook {
        LoadTimeHook::new(TargetFilter::new(["com/acme", "calltrace"], false), MethodBodyRewriter::default())
    }

    #[test]
    fn test_non_target_class_is_unchanged() {
        let request = ClassLoadRequest {
            class_name: Some("java/lang/String"),
            redefining: false,
            class_data: &[1, 2, 3],
        };
        assert_eq!(hook().transform(&request), None);
    }

    #[test]
    fn test_unnamed_class_is_unchanged() {
        let request = ClassLoadRequest { class_name: None, redefining: false, class_data: &[] };
        assert_eq!(hook().transform(&request), None);
    }

    #[test]
    fn test_helper_class_is_never_rewritten() {
        let bytes = crate::helper::helper_class_bytes().unwrap();
        let request = ClassLoadRequest {
            class_name: Some(calltrace_common::HELPER_CLASS),
            redefining: false,
            class_data: &bytes,
        };
        assert_eq!(hook().transform(&request), None);
    }

    #[test]
    fn test_malformed_target_is_unchanged() {
        let request = ClassLoadRequest {
            class_name: Some("com/acme/Broken"),
            redefining: false,
            class_data: b"not a class",
        };
        assert_eq!(hook().transform(&request), None);
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 7");
    }
}

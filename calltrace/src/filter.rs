//! Class eligibility by package prefix
//!
//! The host offers every class it loads to the hook, including thousands of
//! JDK and library classes. This test runs before any decoding so that
//! non-target classes cost a handful of string comparisons.

use crate::config::Config;

/// Decides whether a class (or a stack frame's class) is a trace target
#[derive(Debug, Clone)]
pub struct TargetFilter {
    prefixes: Vec<String>,
    strict_boundary: bool,
}

impl TargetFilter {
    pub fn new<I, S>(prefixes: I, strict_boundary: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { prefixes: prefixes.into_iter().map(Into::into).collect(), strict_boundary }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.target_prefixes().iter().cloned(),
            config.capabilities().strict_package_boundary,
        )
    }

    /// `false` for unnamed classes, otherwise [`Self::is_target`]
    #[must_use]
    pub fn eligible(&self, class_name: Option<&str>) -> bool {
        class_name.is_some_and(|name| self.is_target(name))
    }

    /// True iff some configured prefix is a prefix of `class_name`
    ///
    /// Plain prefix matching lets `com/acme` match `com/acmecorp/Foo`. With a
    /// strict boundary the prefix must be followed by `/` or end the name.
    #[must_use]
    pub fn is_target(&self, class_name: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            let Some(rest) = class_name.strip_prefix(prefix.as_str()) else {
                return false;
            };
            !self.strict_boundary || rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/')
        })
    }

    #[must_use]
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unnamed_class_is_never_eligible() {
        let filter = TargetFilter::new(["com/acme"], false);
        assert!(!filter.eligible(None));
        assert!(filter.eligible(Some("com/acme/Widget")));
    }

    #[test]
    fn test_prefix_semantics() {
        let filter = TargetFilter::new(["com/acme", "org/example/"], false);

        assert!(filter.is_target("com/acme/Widget"));
        assert!(filter.is_target("com/acme"));
        assert!(filter.is_target("org/example/Main"));
        assert!(!filter.is_target("org/examples/Main"));
        assert!(!filter.is_target("java/lang/String"));
        assert!(!filter.is_target("com/acm"));
    }

    #[test]
    fn test_plain_prefix_matches_sibling_package() {
        let filter = TargetFilter::new(["com/acme"], false);
        assert!(filter.is_target("com/acmecorp/Foo"));
    }

    #[test]
    fn test_strict_boundary_rejects_sibling_package() {
        let filter = TargetFilter::new(["com/acme"], true);
        assert!(!filter.is_target("com/acmecorp/Foo"));
        assert!(filter.is_target("com/acme/Foo"));
        assert!(filter.is_target("com/acme/sub/Bar"));
    }

    #[test]
    fn test_eligible_iff_some_prefix_matches() {
        let prefixes = ["a/b", "c", "d/e/f"];
        let names = ["a/b/C", "a/bc", "c", "cX/Y", "d/e/f/G", "d/e/G", "", "x/a/b"];
        let filter = TargetFilter::new(prefixes, false);

        for name in names {
            let expected = prefixes.iter().any(|p| name.starts_with(p));
            assert_eq!(filter.eligible(Some(name)), expected, "class {name}");
        }
    }

    #[test]
    fn test_from_config() {
        let config = Config::new(["com.acme"]);
        let filter = TargetFilter::from_config(&config);
        assert_eq!(filter.prefixes(), ["com/acme".to_string()]);
    }
}

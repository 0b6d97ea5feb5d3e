//! Layered agent configuration
//!
//! The configuration is resolved exactly once, in `Agent_OnLoad`, from two
//! layers:
//!
//! 1. An optional `.properties` file named by the `config.file` system property
//! 2. The JVM system property table (`-Dkey=value`), which wins over the file
//!
//! The result is an immutable [`Config`] snapshot shared by the load-time hook
//! and the trace emitter for the life of the process. A missing or unreadable
//! file is reported and otherwise ignored; resolution never fails.

use calltrace_common::{
    DEFAULT_TARGET_PREFIX, PROP_CALLER_CONTEXT_ENABLED, PROP_CALLER_CONTEXT_MAX_DEPTH,
    PROP_CONFIG_FILE, PROP_INSTRUMENT_CONSTRUCTORS, PROP_OUTPUT_FILE_FALLBACK,
    PROP_OUTPUT_FILE_PATH, PROP_TARGET_PACKAGES, PROP_TARGET_PACKAGES_STRICT,
};
use log::{error, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::domain::{slashed, ConfigError};

/// Default number of frames inspected when resolving caller context
pub const DEFAULT_CALLER_MAX_DEPTH: u32 = 512;

const WHITESPACE: [char; 3] = [' ', '\t', '\x0c'];

// ============================================================================
// Properties
// ============================================================================

/// A flat key/value table in Java `.properties` semantics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `.properties` text
    ///
    /// Supports `#`/`!` comments, `=`, `:` or whitespace separators, backslash
    /// line continuations and the `\t \n \r \f \uXXXX` escapes. Later entries
    /// override earlier ones.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut properties = Self::new();
        for line in logical_lines(text) {
            let (key, value) = split_entry(&line);
            properties.insert(unescape(key), unescape(value));
        }
        properties
    }

    /// Read and parse a `.properties` file
    ///
    /// # Errors
    /// Returns [`ConfigError::Read`] if the file cannot be read
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes =
            fs::read(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;

        // Properties files are traditionally ISO-8859-1; accept UTF-8 when valid
        let text = String::from_utf8(bytes)
            .unwrap_or_else(|e| e.into_bytes().iter().map(|&b| char::from(b)).collect());
        Ok(Self::parse(&text))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut properties = Self::new();
        for (key, value) in iter {
            properties.insert(key, value);
        }
        properties
    }
}

/// Join physical lines into logical ones, dropping blanks and comments
fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pending: Option<String> = None;

    for raw in text.lines() {
        let trimmed = raw.trim_start_matches(WHITESPACE);

        let mut buf = match pending.take() {
            Some(buf) => buf,
            None if trimmed.is_empty() || trimmed.starts_with(['#', '!']) => continue,
            None => String::new(),
        };

        if ends_with_continuation(trimmed) {
            buf.push_str(&trimmed[..trimmed.len() - 1]);
            pending = Some(buf);
        } else {
            buf.push_str(trimmed);
            lines.push(buf);
        }
    }

    if let Some(buf) = pending {
        lines.push(buf);
    }
    lines
}

/// An odd number of trailing backslashes continues the line
fn ends_with_continuation(line: &str) -> bool {
    line.bytes().rev().take_while(|&b| b == b'\\').count() % 2 == 1
}

/// Split a logical line into raw (still escaped) key and value
fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();
    let mut value_start = line.len();

    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                key_end = i;
                value_start = i + 1;
                break;
            }
            ' ' | '\t' | '\x0c' => {
                key_end = i;
                let rest = line[i..].trim_start_matches(WHITESPACE);
                let rest = rest.strip_prefix(['=', ':']).unwrap_or(rest);
                value_start = line.len() - rest.len();
                break;
            }
            _ => {}
        }
    }

    (&line[..key_end], line[value_start..].trim_start_matches(WHITESPACE))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        warn!("Malformed \\u escape in properties: \\u{hex}");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

// ============================================================================
// Configuration Snapshot
// ============================================================================

/// Where trace lines go when the configured output file cannot be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkFallback {
    /// Write to standard output instead
    #[default]
    Console,
    /// Drop trace lines
    Discard,
}

impl FromStr for SinkFallback {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" | "stdout" => Ok(Self::Console),
            "discard" | "none" => Ok(Self::Discard),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SinkFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Console => f.write_str("console"),
            Self::Discard => f.write_str("discard"),
        }
    }
}

/// Behaviors that differed between historical versions of the agent
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    /// Trace `<init>` and `<clinit>` as well
    pub instrument_constructors: bool,
    /// Attach the nearest target caller to each line
    pub caller_context: bool,
    /// Stack frames inspected per call when resolving the caller
    pub caller_max_depth: u32,
    pub sink_fallback: SinkFallback,
    /// Require `/` right after a matched prefix (`com/acme` won't match `com/acmecorp`)
    pub strict_package_boundary: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            instrument_constructors: false,
            caller_context: true,
            caller_max_depth: DEFAULT_CALLER_MAX_DEPTH,
            sink_fallback: SinkFallback::Console,
            strict_package_boundary: false,
        }
    }
}

/// Immutable agent configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    target_prefixes: BTreeSet<String>,
    output_path: Option<PathBuf>,
    capabilities: Capabilities,
}

type Handler = fn(&mut Config, &str) -> Result<(), ConfigError>;

/// Recognized keys, applied in this order for every layer
const HANDLERS: &[(&str, Handler)] = &[
    (PROP_TARGET_PACKAGES, Config::set_target_packages),
    (PROP_TARGET_PACKAGES_STRICT, Config::set_strict_package_boundary),
    (PROP_OUTPUT_FILE_PATH, Config::set_output_path),
    (PROP_OUTPUT_FILE_FALLBACK, Config::set_sink_fallback),
    (PROP_INSTRUMENT_CONSTRUCTORS, Config::set_instrument_constructors),
    (PROP_CALLER_CONTEXT_ENABLED, Config::set_caller_context),
    (PROP_CALLER_CONTEXT_MAX_DEPTH, Config::set_caller_max_depth),
];

impl Default for Config {
    fn default() -> Self {
        Self::new([DEFAULT_TARGET_PREFIX])
    }
}

impl Config {
    /// Build a configuration for the given prefixes (dotted or slashed)
    ///
    /// Falls back to the built-in default prefix if `prefixes` is empty.
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut target_prefixes: BTreeSet<String> =
            prefixes.into_iter().map(|p| slashed(p.as_ref())).collect();
        if target_prefixes.is_empty() {
            target_prefixes.insert(DEFAULT_TARGET_PREFIX.to_string());
        }
        Self { target_prefixes, output_path: None, capabilities: Capabilities::default() }
    }

    #[must_use]
    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Target prefixes in binary (slash) form, never empty
    #[must_use]
    pub fn target_prefixes(&self) -> &BTreeSet<String> {
        &self.target_prefixes
    }

    #[must_use]
    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    #[must_use]
    pub fn has_output_file(&self) -> bool {
        self.output_path.is_some()
    }

    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Apply every recognized key present in `properties`
    ///
    /// Invalid values are reported and leave the previous value in place.
    pub fn apply(&mut self, properties: &Properties) {
        for (key, handler) in HANDLERS {
            if let Some(value) = properties.get(key) {
                if let Err(e) = handler(self, value) {
                    warn!("{e}");
                }
            }
        }
    }

    fn set_target_packages(&mut self, value: &str) -> Result<(), ConfigError> {
        let packages: BTreeSet<String> = value
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(slashed)
            .collect();

        if packages.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: PROP_TARGET_PACKAGES,
                value: value.to_string(),
                expected: "a comma-separated list of packages",
            });
        }
        self.target_prefixes = packages;
        Ok(())
    }

    fn set_output_path(&mut self, value: &str) -> Result<(), ConfigError> {
        self.output_path = if value.trim().is_empty() { None } else { Some(PathBuf::from(value)) };
        Ok(())
    }

    fn set_sink_fallback(&mut self, value: &str) -> Result<(), ConfigError> {
        self.capabilities.sink_fallback = value.parse().map_err(|()| ConfigError::InvalidValue {
            key: PROP_OUTPUT_FILE_FALLBACK,
            value: value.to_string(),
            expected: "console or discard",
        })?;
        Ok(())
    }

    fn set_strict_package_boundary(&mut self, value: &str) -> Result<(), ConfigError> {
        self.capabilities.strict_package_boundary = parse_bool(PROP_TARGET_PACKAGES_STRICT, value)?;
        Ok(())
    }

    fn set_instrument_constructors(&mut self, value: &str) -> Result<(), ConfigError> {
        self.capabilities.instrument_constructors =
            parse_bool(PROP_INSTRUMENT_CONSTRUCTORS, value)?;
        Ok(())
    }

    fn set_caller_context(&mut self, value: &str) -> Result<(), ConfigError> {
        self.capabilities.caller_context = parse_bool(PROP_CALLER_CONTEXT_ENABLED, value)?;
        Ok(())
    }

    fn set_caller_max_depth(&mut self, value: &str) -> Result<(), ConfigError> {
        self.capabilities.caller_max_depth = value
            .trim()
            .parse()
            .ok()
            .filter(|&depth: &u32| depth > 0 && i32::try_from(depth).is_ok())
            .ok_or_else(|| ConfigError::InvalidValue {
                key: PROP_CALLER_CONTEXT_MAX_DEPTH,
                value: value.to_string(),
                expected: "a positive frame count",
            })?;
        Ok(())
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            expected: "true or false",
        }),
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefixes: Vec<&str> = self.target_prefixes.iter().map(String::as_str).collect();
        let caps = &self.capabilities;
        writeln!(f, "{PROP_TARGET_PACKAGES} = [{}]", prefixes.join(", "))?;
        writeln!(f, "{PROP_TARGET_PACKAGES_STRICT} = {}", caps.strict_package_boundary)?;
        match &self.output_path {
            Some(path) => writeln!(f, "{PROP_OUTPUT_FILE_PATH} = {}", path.display())?,
            None => writeln!(f, "{PROP_OUTPUT_FILE_PATH} = null")?,
        }
        writeln!(f, "{PROP_OUTPUT_FILE_FALLBACK} = {}", caps.sink_fallback)?;
        writeln!(f, "{PROP_INSTRUMENT_CONSTRUCTORS} = {}", caps.instrument_constructors)?;
        writeln!(f, "{PROP_CALLER_CONTEXT_ENABLED} = {}", caps.caller_context)?;
        write!(f, "{PROP_CALLER_CONTEXT_MAX_DEPTH} = {}", caps.caller_max_depth)
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolve the configuration snapshot from the system property table
///
/// The file named by `config.file` (if any) is applied first, then the system
/// properties themselves, so a key present in both takes the system value.
#[must_use]
pub fn resolve(system: &Properties) -> Config {
    let mut config = Config::default();

    if let Some(path) = system.get(PROP_CONFIG_FILE).filter(|p| !p.trim().is_empty()) {
        match Properties::load(Path::new(path)) {
            Ok(file) => config.apply(&file),
            Err(e) => error!("{e}"),
        }
    }

    config.apply(system);
    config
}

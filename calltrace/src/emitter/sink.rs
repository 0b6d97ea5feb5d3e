//! The single output destination for trace lines
//!
//! A sink is chosen once at agent start and shared by every application
//! thread. Each line is written, terminated and flushed while holding the
//! sink's lock, so concurrent lines never interleave.

use log::{error, warn};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::{Config, SinkFallback};
use crate::domain::SinkError;

type Writer = Box<dyn Write + Send>;

/// What a sink writes to, for reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkKind {
    Console,
    File(PathBuf),
    Discard,
    Custom,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Console => f.write_str("console"),
            Self::File(path) => write!(f, "file {}", path.display()),
            Self::Discard => f.write_str("discard"),
            Self::Custom => f.write_str("custom writer"),
        }
    }
}

/// Mutex-guarded line writer. `None` once closed.
pub struct TraceSink {
    kind: SinkKind,
    writer: Mutex<Option<Writer>>,
}

impl fmt::Debug for TraceSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceSink").field("kind", &self.kind).field("closed", &self.is_closed()).finish()
    }
}

impl TraceSink {
    fn with_writer(kind: SinkKind, writer: Writer) -> Self {
        Self { kind, writer: Mutex::new(Some(writer)) }
    }

    /// Standard output
    #[must_use]
    pub fn console() -> Self {
        Self::with_writer(SinkKind::Console, Box::new(io::stdout()))
    }

    /// Accepts and drops every line
    #[must_use]
    pub fn discard() -> Self {
        Self::with_writer(SinkKind::Discard, Box::new(io::sink()))
    }

    /// Any writer, e.g. an in-memory buffer
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self::with_writer(SinkKind::Custom, Box::new(writer))
    }

    /// Create or truncate `path`
    ///
    /// # Errors
    /// Returns [`SinkError::Open`] if the file cannot be created
    pub fn file(path: &Path) -> Result<Self, SinkError> {
        let file = File::create(path)
            .map_err(|source| SinkError::Open { path: path.to_path_buf(), source })?;
        Ok(Self::with_writer(SinkKind::File(path.to_path_buf()), Box::new(BufWriter::new(file))))
    }

    /// The sink selected by `config`
    ///
    /// With no output path this is the console. If the file cannot be opened
    /// the failure is reported and the configured fallback is used instead.
    #[must_use]
    pub fn open(config: &Config) -> Self {
        let Some(path) = config.output_path() else {
            return Self::console();
        };
        match Self::file(path) {
            Ok(sink) => sink,
            Err(e) => {
                error!("{e}");
                let fallback = config.capabilities().sink_fallback;
                warn!("Trace output falls back to {fallback}");
                match fallback {
                    SinkFallback::Console => Self::console(),
                    SinkFallback::Discard => Self::discard(),
                }
            }
        }
    }

    #[must_use]
    pub fn kind(&self) -> &SinkKind {
        &self.kind
    }

    fn lock(&self) -> MutexGuard<'_, Option<Writer>> {
        // A panic while holding the lock leaves at worst a partial line
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `line`, a line terminator, and flush, as one critical section
    ///
    /// A closed sink silently drops the line.
    ///
    /// # Errors
    /// Returns [`SinkError::Write`] if writing or flushing fails
    pub fn write_line(&self, line: &str) -> Result<(), SinkError> {
        let mut guard = self.lock();
        if let Some(writer) = guard.as_mut() {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Flush and release the writer. Later calls do nothing.
    ///
    /// # Errors
    /// Returns [`SinkError::Write`] if the final flush fails
    pub fn close(&self) -> Result<(), SinkError> {
        let writer = self.lock().take();
        if let Some(mut writer) = writer {
            writer.flush()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }
}

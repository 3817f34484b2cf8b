//! Access and diagnostic log sinks.
//!
//! # Responsibilities
//! - Route access lines (target [`ACCESS_TARGET`]) and diagnostic events to separate sinks
//! - Fan each sink out to an optional file and the console (unless silent)
//! - Render the fixed line layouts for both sinks
//!
//! # Data Flow
//! ```text
//! tracing event
//!     ├─ target == gateway::access → AccessFormat     → access file + stdout
//!     └─ anything else → EnvFilter → DiagnosticFormat → error file + stderr
//! ```
//!
//! Each gateway owns a [`Dispatch`] built from its own sinks, and runs its
//! lifecycle, serve task and requests under it. The first gateway in a
//! process also installs its dispatcher as the global default so that code
//! outside any gateway still logs somewhere.

use std::fmt::{self, Write as _};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Dispatch, Event, Subscriber};
use tracing_subscriber::filter::{filter_fn, EnvFilter, FilterExt};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::error::{GatewayError, LogKind};

/// Target carrying Common Log lines.
pub const ACCESS_TARGET: &str = "gateway::access";

/// Timestamp layout shared by both sinks.
pub const LOG_TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Diagnostic filter when neither `RUST_LOG` nor a level is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Where log output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSinks {
    pub access_path: Option<PathBuf>,
    pub error_path: Option<PathBuf>,
    /// Suppress console echo on both sinks.
    pub silent: bool,
    /// Diagnostic filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogSinks {
    fn default() -> Self {
        Self {
            access_path: None,
            error_path: None,
            silent: false,
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Console {
    Stdout,
    Stderr,
}

/// A file and/or console writer.
#[derive(Debug, Clone)]
pub struct SinkWriter {
    file: Option<Arc<Mutex<File>>>,
    console: Option<Console>,
}

impl SinkWriter {
    fn open(
        kind: LogKind,
        path: Option<&Path>,
        console: Console,
        silent: bool,
    ) -> Result<Self, GatewayError> {
        let file = match path {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| GatewayError::LogOutput {
                        kind,
                        path: path.to_path_buf(),
                        source,
                    })?;
                Some(Arc::new(Mutex::new(file)))
            }
            None => None,
        };

        Ok(Self {
            file,
            console: (!silent).then_some(console),
        })
    }

    /// Whether lines are appended to a file.
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }

    /// Whether lines are echoed to the console.
    pub fn echoes(&self) -> bool {
        self.console.is_some()
    }
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(file) = &self.file {
            let mut file = file
                .lock()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))?;
            file.write_all(buf)?;
        }
        match self.console {
            Some(Console::Stdout) => io::stdout().lock().write_all(buf)?,
            Some(Console::Stderr) => io::stderr().lock().write_all(buf)?,
            None => {}
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                file.flush()?;
            }
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SinkWriter {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Collects the message and remaining fields of an event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Writes the pre-rendered access line as-is.
struct AccessFormat;

impl<S, N> FormatEvent<S, N> for AccessFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        writeln!(writer, "{}", visitor.message)
    }
}

/// `[timestamp] LEVEL : message key=value`
struct DiagnosticFormat;

impl<S, N> FormatEvent<S, N> for DiagnosticFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let line = diagnostic_line(
            &chrono::Local::now().format(LOG_TIME_FORMAT).to_string(),
            event.metadata().level(),
            &visitor.message,
            &visitor.fields,
        );
        writeln!(writer, "{line}")
    }
}

/// Render one diagnostic line.
pub fn diagnostic_line(
    timestamp: &str,
    level: &tracing::Level,
    message: &str,
    fields: &str,
) -> String {
    format!("[{timestamp}] {level} : {message}{fields}")
}

/// Open the sinks and assemble the subscriber that writes to them.
pub fn dispatch(sinks: &LogSinks) -> Result<Dispatch, GatewayError> {
    let access = SinkWriter::open(
        LogKind::Access,
        sinks.access_path.as_deref(),
        Console::Stdout,
        sinks.silent,
    )?;
    let diagnostic = SinkWriter::open(
        LogKind::Error,
        sinks.error_path.as_deref(),
        Console::Stderr,
        sinks.silent,
    )?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&sinks.level));

    let access_layer = tracing_subscriber::fmt::layer()
        .event_format(AccessFormat)
        .with_writer(access)
        .with_filter(filter_fn(|meta| meta.target() == ACCESS_TARGET));

    let diagnostic_layer = tracing_subscriber::fmt::layer()
        .event_format(DiagnosticFormat)
        .with_writer(diagnostic)
        .with_filter(filter_fn(|meta| meta.target() != ACCESS_TARGET).and(env_filter));

    let subscriber = tracing_subscriber::registry()
        .with(access_layer)
        .with(diagnostic_layer);

    Ok(Dispatch::new(subscriber))
}

/// Make `dispatch` the process-wide default unless one is already set.
///
/// Returns `false` when another subscriber was installed first.
pub fn install_global(dispatch: &Dispatch) -> bool {
    tracing::dispatcher::set_global_default(dispatch.clone()).is_ok()
}

/// The dispatcher in effect on this thread.
///
/// Captured on the request path so that work finishing later (body
/// completion, compressor close) still reaches the owning gateway's sinks.
pub fn current() -> Dispatch {
    tracing::dispatcher::get_default(Dispatch::clone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_layout() {
        let line = diagnostic_line(
            "02/Jan/2006:15:04:05 -0700",
            &tracing::Level::WARN,
            "Drain timed out",
            " timeout_secs=10.0",
        );
        assert_eq!(
            line,
            "[02/Jan/2006:15:04:05 -0700] WARN : Drain timed out timeout_secs=10.0"
        );
    }

    #[test]
    fn silent_sink_has_no_console() {
        let writer = SinkWriter::open(LogKind::Access, None, Console::Stdout, true).unwrap();
        assert!(!writer.has_file());
        assert!(!writer.echoes());
    }

    #[test]
    fn file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");

        let mut writer =
            SinkWriter::open(LogKind::Access, Some(&path), Console::Stdout, true).unwrap();
        writer.write_all(b"first\n").unwrap();
        let mut again =
            SinkWriter::open(LogKind::Access, Some(&path), Console::Stdout, true).unwrap();
        again.write_all(b"second\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn dispatch_writes_to_its_own_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.log");
        let second = dir.path().join("second.log");

        let sinks = |path: &Path| LogSinks {
            access_path: Some(path.to_path_buf()),
            silent: true,
            ..LogSinks::default()
        };
        let a = dispatch(&sinks(&first)).unwrap();
        let b = dispatch(&sinks(&second)).unwrap();

        tracing::dispatcher::with_default(&a, || {
            tracing::info!(target: ACCESS_TARGET, "line for a");
        });
        tracing::dispatcher::with_default(&b, || {
            tracing::info!(target: ACCESS_TARGET, "line for b");
            tracing::info!("diagnostics stay off the access sink");
        });

        assert_eq!(std::fs::read_to_string(&first).unwrap(), "line for a\n");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "line for b\n");
    }

    #[test]
    fn unopenable_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("error.log");

        let err = SinkWriter::open(LogKind::Error, Some(&path), Console::Stderr, false).unwrap_err();
        assert!(matches!(err, GatewayError::LogOutput { kind: LogKind::Error, .. }));
    }
}

//! # Logging: tracing subscriber plus the identity log channel.
//!
//! Every component logs through `tracing`. [`init`] installs a registry with:
//! - an [`EnvFilter`] (`RUST_LOG`, default `info`),
//! - a `fmt` layer on stderr when console echo is requested,
//! - a [`ChannelLayer`] forwarding each record, as one line, to the log channel.
//!
//! The log channel (syslog and/or an append-mode file) is opened and closed by the
//! identity guard through a shared [`LogSink`]. Records emitted while the channel
//! is closed only reach the stderr layer.
//!
//! ```text
//! info!(..) ──► registry ──► EnvFilter ──┬──► fmt layer (stderr)
//!                                        └──► ChannelLayer ──► LogSink ──┬──► syslog(3)
//!                                                                        └──► log file
//! ```

use std::ffi::CString;
use std::fmt::{self, Write as _};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tsfmt, EnvFilter, Layer};

use crate::core::role;
use crate::error::IdentityError;

/// Where the channel writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Identifier prefixed to every record.
    pub ident: String,
    /// Write to syslog.
    pub syslog: bool,
    /// Mirror syslog records to the console (`LOG_CONS`).
    pub console: bool,
    /// Syslog facility (`libc::LOG_*`).
    pub facility: libc::c_int,
    /// Append-mode log file.
    pub file: Option<PathBuf>,
}

struct OpenChannel {
    // openlog(3) keeps the pointer: the string must outlive the channel.
    syslog_ident: Option<CString>,
    file: Option<BufWriter<File>>,
    ident: String,
}

/// Shared handle to the process log channel.
#[derive(Clone, Default)]
pub struct LogSink {
    inner: Arc<Mutex<Option<OpenChannel>>>,
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("open", &self.is_open())
            .finish()
    }
}

impl LogSink {
    /// Closed sink.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<OpenChannel>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the channel, replacing any channel already open.
    pub fn open(&self, spec: &ChannelSpec) -> Result<(), IdentityError> {
        let file = match &spec.file {
            Some(path) => {
                let f = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| IdentityError::LogFile {
                        path: path.clone(),
                        source,
                    })?;
                Some(BufWriter::new(f))
            }
            None => None,
        };

        let syslog_ident = if spec.syslog {
            let ident = CString::new(spec.ident.replace('\0', "")).unwrap_or_default();
            let mut opts = libc::LOG_PID;
            if spec.console {
                opts |= libc::LOG_CONS;
            }
            // SAFETY: `ident` is stored in the channel and outlives the syslog session.
            unsafe { libc::openlog(ident.as_ptr(), opts, spec.facility) };
            Some(ident)
        } else {
            None
        };

        let mut guard = self.lock();
        if let Some(old) = guard.take() {
            Self::shut(old);
        }
        *guard = Some(OpenChannel {
            syslog_ident,
            file,
            ident: spec.ident.clone(),
        });
        Ok(())
    }

    /// Closes the channel. Idempotent.
    pub fn close(&self) {
        if let Some(channel) = self.lock().take() {
            Self::shut(channel);
        }
    }

    fn shut(mut channel: OpenChannel) {
        if let Some(file) = channel.file.as_mut() {
            let _ = file.flush();
        }
        if channel.syslog_ident.is_some() {
            // SAFETY: closes the descriptor opened by openlog.
            unsafe { libc::closelog() };
        }
    }

    /// True while a channel is open.
    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Identifier of the open channel.
    pub fn ident(&self) -> Option<String> {
        self.lock().as_ref().map(|c| c.ident.clone())
    }

    /// Flushes buffered file output.
    pub fn flush(&self) {
        if let Some(file) = self.lock().as_mut().and_then(|c| c.file.as_mut()) {
            let _ = file.flush();
        }
    }

    /// Writes one record to the channel; no-op when closed.
    pub fn emit(&self, level: Level, line: &str) {
        let mut guard = self.lock();
        let Some(channel) = guard.as_mut() else {
            return;
        };

        if channel.syslog_ident.is_some() {
            if let Ok(msg) = CString::new(line.replace('\0', "")) {
                // SAFETY: constant "%s" format with a NUL-terminated argument.
                unsafe { libc::syslog(syslog_priority(level), c"%s".as_ptr(), msg.as_ptr()) };
            }
        }

        if let Some(file) = channel.file.as_mut() {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            let _ = writeln!(
                file,
                "{}.{:03} {}[{}] {}: {}",
                now.as_secs(),
                now.subsec_millis(),
                channel.ident,
                std::process::id(),
                level,
                line
            );
            if level <= Level::WARN {
                let _ = file.flush();
            }
        }
    }
}

fn syslog_priority(level: Level) -> libc::c_int {
    match level {
        Level::ERROR => libc::LOG_ERR,
        Level::WARN => libc::LOG_WARNING,
        Level::INFO => libc::LOG_INFO,
        _ => libc::LOG_DEBUG,
    }
}

/// Maps a facility name (`daemon`, `local0`..`local7`, `user`) to its value.
pub fn facility_from_name(name: &str) -> Option<libc::c_int> {
    let facility = match name.to_ascii_lowercase().as_str() {
        "daemon" => libc::LOG_DAEMON,
        "user" => libc::LOG_USER,
        "local0" => libc::LOG_LOCAL0,
        "local1" => libc::LOG_LOCAL1,
        "local2" => libc::LOG_LOCAL2,
        "local3" => libc::LOG_LOCAL3,
        "local4" => libc::LOG_LOCAL4,
        "local5" => libc::LOG_LOCAL5,
        "local6" => libc::LOG_LOCAL6,
        "local7" => libc::LOG_LOCAL7,
        _ => return None,
    };
    Some(facility)
}

/// Collects a record into one line: message first, then `key=value` fields.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self) -> String {
        let mut line = format!("[{}] {}", role().as_label(), self.message);
        line.push_str(&self.fields);
        line
    }
}

impl Visit for LineVisitor {
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

/// `tracing` layer writing every enabled record to a [`LogSink`].
pub struct ChannelLayer {
    sink: LogSink,
}

impl ChannelLayer {
    pub fn new(sink: LogSink) -> Self {
        Self { sink }
    }
}

impl<S: Subscriber> Layer<S> for ChannelLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        self.sink.emit(*event.metadata().level(), &visitor.finish());
    }
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init(console: bool, sink: LogSink) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = console.then(|| {
        tsfmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(ChannelLayer::new(sink))
        .try_init();
}

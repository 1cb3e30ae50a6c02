//! Log initialization and setup
//!
//! Wires `tracing-subscriber` up from runtime configuration: an
//! env-filter (explicit, verbosity shorthand, or default), an output
//! format, and a destination stream.

#[cfg(feature = "clap")]
pub mod cli;
pub mod config;

pub use config::*;

use observability_deps::tracing::{self, Subscriber};
use std::io;
use thiserror::Error;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, MakeWriter, writer::BoxMakeWriter},
    layer::SubscriberExt,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot set global tracing subscriber")]
    SetGlobalDefaultError(#[from] tracing::dispatcher::SetGlobalDefaultError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Builder for the logging subscriber.
#[derive(Debug)]
pub struct Builder<W = fn() -> io::Stdout> {
    log_format: LogFormat,
    log_filter: Option<EnvFilter>,
    // used when log_filter is none.
    default_log_filter: EnvFilter,
    make_writer: W,
    with_target: bool,
    with_ansi: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Full,
            log_filter: None,
            default_log_filter: EnvFilter::try_new(Self::DEFAULT_LOG_FILTER).unwrap(),
            make_writer: io::stdout,
            with_target: true,
            with_ansi: true,
        }
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }
}

// This needs to be a separate impl block because they place different bounds on the type parameters.
impl<W> Builder<W> {
    pub fn with_writer<W2>(self, make_writer: W2) -> Builder<W2>
    where
        W2: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        Builder::<W2> {
            make_writer,
            // cannot use `..self` because W type parameter changes
            log_format: self.log_format,
            log_filter: self.log_filter,
            default_log_filter: self.default_log_filter,
            with_target: self.with_target,
            with_ansi: self.with_ansi,
        }
    }
}

// This needs to be a separate impl block because they place different bounds on the type parameters.
impl<W> Builder<W>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    pub const DEFAULT_LOG_FILTER: &'static str = "warn";

    /// Set log_filter using a simple numeric "verbosity level".
    ///
    /// 0 means, keep existing `log_filter` value.
    pub fn with_log_verbose_count(self, log_verbose_count: u8) -> Self {
        let log_filter = match log_verbose_count {
            0 => self.log_filter,
            1 => Some(EnvFilter::try_new("info").unwrap()),
            2 => Some(EnvFilter::try_new("debug,hyper::proto::h1=info,h2=info").unwrap()),
            _ => Some(EnvFilter::try_new("trace,hyper::proto::h1=info,h2=info").unwrap()),
        };
        Self { log_filter, ..self }
    }

    pub fn with_log_filter(self, log_filter: &Option<String>) -> Self {
        let log_filter = log_filter
            .as_ref()
            .map(|log_filter| EnvFilter::try_new(log_filter).unwrap());
        Self { log_filter, ..self }
    }

    pub fn with_default_log_filter(self, default_log_filter: impl AsRef<str>) -> Self {
        let default_log_filter = EnvFilter::try_new(default_log_filter).unwrap();
        Self {
            default_log_filter,
            ..self
        }
    }

    pub fn with_log_format(self, log_format: LogFormat) -> Self {
        Self { log_format, ..self }
    }

    pub fn with_log_destination(self, log_destination: LogDestination) -> Builder<BoxMakeWriter> {
        let make_writer = match log_destination {
            LogDestination::Stdout => BoxMakeWriter::new(io::stdout),
            LogDestination::Stderr => BoxMakeWriter::new(io::stderr),
        };
        Builder {
            make_writer,
            // cannot use `..self` because W type parameter changes
            log_format: self.log_format,
            log_filter: self.log_filter,
            default_log_filter: self.default_log_filter,
            with_target: self.with_target,
            with_ansi: self.with_ansi,
        }
    }

    /// Sets whether or not an event's target and location are displayed.
    ///
    /// Defaults to true.
    pub fn with_target(self, with_target: bool) -> Self {
        Self {
            with_target,
            ..self
        }
    }

    /// Enable/disable ANSI encoding for formatted events (i.e. colors).
    ///
    /// Defaults to true.
    pub fn with_ansi(self, with_ansi: bool) -> Self {
        Self { with_ansi, ..self }
    }

    pub fn build(self) -> impl Subscriber {
        let log_filter = self.log_filter.unwrap_or(self.default_log_filter);

        let log_writer = self.make_writer;
        let with_target = self.with_target;
        let with_ansi = self.with_ansi;

        let (log_format_full, log_format_pretty, log_format_json) = match self.log_format {
            LogFormat::Full => (
                Some(
                    fmt::layer()
                        .with_writer(log_writer)
                        .with_target(with_target)
                        .with_ansi(with_ansi),
                ),
                None,
                None,
            ),
            LogFormat::Pretty => (
                None,
                Some(
                    fmt::layer()
                        .pretty()
                        .with_writer(log_writer)
                        .with_target(with_target)
                        .with_ansi(with_ansi),
                ),
                None,
            ),
            LogFormat::Json => (
                None,
                None,
                Some(
                    fmt::layer()
                        .json()
                        .with_writer(log_writer)
                        .with_target(with_target)
                        .with_ansi(with_ansi),
                ),
            ),
        };

        tracing_subscriber::Registry::default()
            .with(log_filter)
            .with(log_format_full)
            .with(log_format_pretty)
            .with(log_format_json)
    }

    /// Build the logging subscriber and install it as the global default
    /// for all threads.
    pub fn install_global(self) -> Result<TroggingGuard> {
        let subscriber = self.build();
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(TroggingGuard)
    }
}

/// A RAII guard for the globally installed logging subscriber.
///
/// Hold it for the life of the process; the subscriber itself is never
/// uninstalled.
#[derive(Debug)]
pub struct TroggingGuard;

impl Drop for TroggingGuard {
    fn drop(&mut self) {}
}

#[cfg(test)]
pub mod test_util {
    //! Utilities for testing the logging setup.
    use super::*;

    use observability_deps::tracing::{debug, error, info, trace, warn};
    use std::sync::{Arc, Mutex};

    /// Log writer suitable for using in tests.
    ///
    /// It captures log output in a buffer and provides ways to filter out
    /// non-deterministic parts such as timestamps.
    #[derive(Default, Debug, Clone)]
    pub struct TestWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl TestWriter {
        /// Return a writer and a handle on the to-be-captured output.
        pub fn new() -> (Self, Captured) {
            let writer = Self::default();
            let captured = Captured(Arc::clone(&writer.buffer));
            (writer, captured)
        }
    }

    impl<'w> MakeWriter<'w> for TestWriter {
        type Writer = BufferWriter;

        fn make_writer(&'w self) -> Self::Writer {
            BufferWriter(Arc::clone(&self.buffer))
        }
    }

    /// Appends to the shared capture buffer, locking per call.
    #[derive(Debug)]
    pub struct BufferWriter(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(Debug)]
    pub struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        /// Removes non-determinism by removing timestamps from the log lines.
        pub fn without_timestamps(&self) -> String {
            // fmt::layer() time format
            let timestamp =
                regex::Regex::new(r"(?m)^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9:.]+Z *").unwrap();
            timestamp.replace_all(&self.to_string(), "").to_string()
        }
    }

    impl std::fmt::Display for Captured {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let bytes = self.0.lock().unwrap();
            write!(f, "{}", std::str::from_utf8(&bytes).unwrap())
        }
    }

    /// This is a test helper that sets a few test-friendly parameters
    /// such as disabled ANSI escape sequences on the provided builder.
    /// This helper then calls the provided function within the context
    /// of the test subscriber, and returns the captured output of all
    /// the logging macros invoked by the function.
    pub fn log_test<W, F>(builder: Builder<W>, f: F) -> Captured
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
        F: Fn(),
    {
        let (writer, output) = TestWriter::new();
        let subscriber = builder
            .with_writer(writer)
            .with_target(false)
            .with_ansi(false)
            .build();

        tracing::subscriber::with_default(subscriber, f);

        output
    }

    /// This is a test helper that sets a few test-friendly parameters
    /// such as disabled ANSI escape sequences on the provided builder.
    /// This helper then emits a few logs of different verbosity levels
    /// and returns the captured output.
    pub fn simple_test<W>(builder: Builder<W>) -> Captured
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        log_test(builder, || {
            error!("foo");
            warn!("woo");
            info!("bar");
            debug!("baz");
            trace!("trax");
        })
    }
}

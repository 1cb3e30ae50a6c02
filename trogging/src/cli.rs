//! Common CLI flags for logging
use crate::{Builder, Result, TroggingGuard, config::*};
use tracing_subscriber::fmt::{MakeWriter, writer::BoxMakeWriter};

/// CLI config for the logging related subset of options.
#[derive(Debug, Clone, clap::Parser)]
pub struct LoggingConfig {
    /// Logs: filter directive
    ///
    /// Configures log severity level filter, by target.
    ///
    /// Simplest options: error, warn, info, debug, trace
    ///
    /// Levels for different modules can be specified. For example
    /// `debug,hyper::proto::h1=info` specifies debug logging for all
    /// modules except for the `hyper::proto::h1` module which will only
    /// display info level logging.
    ///
    /// Extended syntax provided by `tracing-subscriber` includes
    /// span/field filters. See
    /// <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html>
    /// for more details.
    ///
    /// Overridden by `-v`.
    ///
    /// If None, [`crate::Builder`] sets a default, by default
    /// [`crate::Builder::DEFAULT_LOG_FILTER`], but overrideable with
    /// [`crate::Builder::with_default_log_filter`].
    #[clap(long = "log-filter", env = "LOG_FILTER", action)]
    pub log_filter: Option<String>,

    /// Logs: filter short-hand
    ///
    /// Convenient way to set log severity level filter.
    /// Overrides `--log-filter`.
    ///
    /// -v   'info'
    ///
    /// -vv  'debug,hyper::proto::h1=info,h2=info'
    ///
    /// -vvv 'trace,hyper::proto::h1=info,h2=info'
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub log_verbose_count: u8,

    /// Logs: destination
    ///
    /// Can be one of: stdout, stderr
    #[clap(
        long = "log-destination",
        env = "LOG_DESTINATION",
        default_value = "stdout",
        action
    )]
    pub log_destination: LogDestination,

    #[rustfmt::skip]
    /// Logs: message format
    ///
    /// Can be one of:
    ///
    /// full: human-readable, single line
    ///
    ///   2024-02-28T12:55:47.815 ERROR shaving_yaks{yaks=3}: fmt::yak_shave: failed to shave yak yak=3 error=missing yak
    ///   2024-02-28T12:55:47.815 TRACE shaving_yaks{yaks=3}: fmt::yak_shave: yaks_shaved=2
    ///   2024-02-28T12:55:47.815  INFO fmt: yak shaving completed all_yaks_shaved=false
    ///
    /// pretty: human-readable, multi line
    ///
    ///   2024-02-28T12:57:29.387 fmt_pretty::yak_shave: failed to shave yak, yak: 3, error: missing yak
    ///     at examples/examples/fmt/yak_shave.rs:48 on main
    ///     in fmt_pretty::yak_shave::shaving_yaks with yaks: 3
    ///
    /// json: machine-parseable
    ///
    ///   {"timestamp":"2024-02-28T13:00:00.875","level":"ERROR","fields":{"message":"failed to shave yak","yak":3,"error":"missing yak"},"target":"fmt_json::yak_shave"}
    ///   {"timestamp":"2024-02-28T13:00:00.875","level":"INFO","fields":{"message":"yak shaving completed","all_yaks_shaved":false},"target":"fmt_json"}
    #[clap(long = "log-format", env = "LOG_FORMAT", default_value = "full", verbatim_doc_comment, action)]
    pub log_format: LogFormat,
}

impl LoggingConfig {
    pub fn to_builder(&self) -> Builder<BoxMakeWriter> {
        self.with_builder(Builder::new())
    }

    pub fn with_builder<W>(&self, builder: Builder<W>) -> Builder<BoxMakeWriter>
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        builder
            .with_log_filter(&self.log_filter)
            // with_verbose_count goes after with_log_filter because our
            // CLI flags state that `-v` overrides `--log-filter`.
            .with_log_verbose_count(self.log_verbose_count)
            .with_log_destination(self.log_destination)
            .with_log_format(self.log_format)
    }

    pub fn install_global_subscriber(&self) -> Result<TroggingGuard> {
        self.to_builder().install_global()
    }
}

/// Extends the trogging [`crate::Builder`] API.
pub trait LoggingConfigBuilderExt {
    /// Applies all config entries from a [`LoggingConfig`] to a [`crate::Builder`].
    fn with_logging_config(self, config: &LoggingConfig) -> Builder<BoxMakeWriter>;
}

impl<W> LoggingConfigBuilderExt for Builder<W>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fn with_logging_config(self, config: &LoggingConfig) -> Builder<BoxMakeWriter> {
        config.with_builder(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::simple_test;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Config {
        #[clap(flatten)]
        logging: LoggingConfig,
    }

    fn parse(args: &[&str]) -> LoggingConfig {
        Config::try_parse_from(std::iter::once(&"prog").chain(args))
            .unwrap()
            .logging
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.log_filter, None);
        assert_eq!(config.log_verbose_count, 0);
        assert!(matches!(config.log_destination, LogDestination::Stdout));
        assert_eq!(config.log_format, LogFormat::Full);
    }

    #[test]
    fn test_parsing() {
        let config = parse(&[
            "--log-filter",
            "debug,hyper=info",
            "-vv",
            "--log-destination",
            "stderr",
            "--log-format",
            "json",
        ]);
        assert_eq!(config.log_filter.as_deref(), Some("debug,hyper=info"));
        assert_eq!(config.log_verbose_count, 2);
        assert!(matches!(config.log_destination, LogDestination::Stderr));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_format_is_rejected() {
        let err = Config::try_parse_from(["prog", "--log-format", "xml"]).unwrap_err();
        assert!(err.to_string().contains("Invalid log format"));
    }

    #[test]
    fn test_verbose_overrides_filter() {
        let config = parse(&["--log-filter", "error", "-v"]);
        assert_eq!(
            simple_test(config.to_builder()).without_timestamps(),
            r#"
ERROR foo
WARN woo
INFO bar
"#
            .trim_start(),
        );
    }
}

//! Entrypoint of the siphon binary
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
missing_debug_implementations,
clippy::explicit_iter_loop,
clippy::use_self,
clippy::clone_on_ref_ptr,
clippy::future_not_send
)]

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use dotenvy::dotenv;
use tokio::runtime::Runtime;
use trogging::{TroggingGuard, cli::LoggingConfigBuilderExt};

mod commands {
    pub(crate) mod serve;
}

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
name = "siphon",
version,
about = "Kafka to InfluxDB metrics ingestion server",
long_about = r#"Kafka to InfluxDB metrics ingestion server

Examples:
    # Consume raw metrics, resolving destinations through a routing service
    siphon serve --routing-service-url http://tenant-routes:8080/v1.0/routes

    # Consume raw and rolled-up metrics, writing everything to a fixed InfluxDB
    siphon serve --routing-mode static --static-influx-url http://localhost:8086 \
        --kafka-rollup-topic 5m=metrics.rollup.5m,60m=metrics.rollup.60m

    # Display all options short form
    siphon serve -h

    # Run with extra verbose logging
    siphon serve -v --routing-mode static --static-influx-url http://localhost:8086

    # Run with full debug logging specified with LOG_FILTER
    LOG_FILTER=debug siphon serve --routing-service-url http://tenant-routes:8080
"#
)]
struct Config {
    /// Maximum number of tokio runtime threads to use.
    ///
    /// Defaults to the number of logical cores on the system.
    #[clap(long = "num-threads", env = "SIPHON_NUM_THREADS", action)]
    num_threads: Option<NonZeroUsize>,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Run the siphon ingestion server
    Serve(commands::serve::Config),
}

fn main() -> Result<(), std::io::Error> {
    #[cfg(unix)]
    install_crash_handler(); // attempt to render a useful stacktrace to stderr

    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    let tokio_runtime = get_runtime(config.num_threads)?;

    tokio_runtime.block_on(async move {
        fn handle_init_logs(r: Result<TroggingGuard, trogging::Error>) -> TroggingGuard {
            match r {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("Initializing logs failed: {e}");
                    std::process::exit(ReturnCode::Failure as _);
                }
            }
        }

        match config.command {
            None => println!("command required, -h/--help for help"),
            Some(Command::Serve(config)) => {
                let _tracing_guard = handle_init_logs(init_logs(&config.logging_config));
                if let Err(e) = commands::serve::command(config).await {
                    eprintln!("Serve command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
        }
    });

    Ok(())
}

fn init_logs(config: &trogging::cli::LoggingConfig) -> Result<TroggingGuard, trogging::Error> {
    trogging::Builder::new()
        .with_default_log_filter("info")
        .with_logging_config(config)
        .install_global()
}

/// Creates the tokio runtime the listeners run on.
fn get_runtime(num_threads: Option<NonZeroUsize>) -> Result<Runtime, std::io::Error> {
    // NOTE: no log macros will work here!
    //
    // That means use eprintln!() instead of error!() and so on. The log emitter
    // requires a running tokio runtime and is initialised after this function.

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_time();
    builder.enable_io();

    // set up proper thread names
    let thread_counter = Arc::new(AtomicUsize::new(1));
    builder.thread_name_fn(move || {
        format!("Siphon Tokio {}", thread_counter.fetch_add(1, Ordering::SeqCst))
    });

    // worker thread count
    let num_threads = match num_threads {
        None => std::thread::available_parallelism()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?,
        Some(n) => n,
    };
    builder.worker_threads(num_threads.get());

    builder.build()
}

/// Source the .env file before initialising the Config struct - this sets
/// any envs in the file, which the Config struct then uses.
///
/// Precedence is given to existing env variables.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // Ignore this - a missing env file is not an error, defaults will
            // be applied when initialising the Config struct.
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(1);
        }
    };
}

// Based on ideas from
// https://github.com/servo/servo/blob/f03ddf6c6c6e94e799ab2a3a89660aea4a01da6f/ports/servo/main.rs#L58-L79
#[cfg(unix)]
fn install_crash_handler() {
    unsafe {
        set_signal_handler(libc::SIGSEGV, signal_handler); // handle segfaults
        set_signal_handler(libc::SIGILL, signal_handler); // handle stack overflow and unsupported CPUs
        set_signal_handler(libc::SIGBUS, signal_handler); // handle invalid memory access
    }
}

#[cfg(unix)]
unsafe extern "C" fn signal_handler(sig: i32) {
    use backtrace::Backtrace;
    use std::process::abort;
    let name = std::thread::current()
        .name()
        .map(|n| format!(" for thread \"{n}\""))
        .unwrap_or_else(|| "".to_owned());
    eprintln!(
        "Signal {}, Stack trace{}\n{:?}",
        sig,
        name,
        Backtrace::new()
    );
    abort();
}

// based on https://github.com/adjivas/sig/blob/master/src/lib.rs#L34-L52
#[cfg(unix)]
unsafe fn set_signal_handler(signal: libc::c_int, handler: unsafe extern "C" fn(libc::c_int)) {
    use libc::{sigaction, sigfillset, sighandler_t};
    let mut sigset = std::mem::zeroed();

    // Block all signals during the handler. This is the expected behavior, but
    // it's not guaranteed by `signal()`.
    if sigfillset(&mut sigset) != -1 {
        // Done because sigaction has private members.
        // This is safe because sa_restorer and sa_handlers are pointers that
        // might be null (that is, zero).
        let mut action: sigaction = std::mem::zeroed();

        // action.sa_flags = 0;
        action.sa_mask = sigset;
        action.sa_sigaction = handler as sighandler_t;

        sigaction(signal, &action, std::ptr::null_mut());
    }
}

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Overrides the built-in filter, e.g. `PJLINK_LOG=pjlink_ctl::core::client=trace`.
pub const LOG_ENV: &str = "PJLINK_LOG";

/// Library and both binaries log at info (debug when verbose); dependencies only warn.
/// Verbose also turns on the raw SEND/RECV lines of the client.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "warn,pjlink_ctl=debug,pjlink_ctl::core::client=trace,pjlink=debug,pjlink_fleet=debug"
    } else {
        "warn,pjlink_ctl=info,pjlink=info,pjlink_fleet=info"
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)))
}

/// Human-readable lines for interactive use of `pjlink` and `pjlink-fleet`.
pub fn init_cli_logger(verbose: bool) {
    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(verbose)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// JSON lines on stderr, for fleet runs collected by a log shipper.
pub fn init_json_logger(verbose: bool) {
    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .json(),
        )
        .init();
}

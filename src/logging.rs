//! Tracing subscriber setup for the shjob binary
//!
//! Job output owns stdout, so all diagnostics go to stderr.

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default filter directives: `RUST_LOG` wins when set.
///
/// Per-job events stay quiet unless verbose; timeouts and launch failures
/// still show as warnings and errors.
#[must_use]
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "shjob=debug,shjob_runner=debug,shjob_config=debug,info"
    } else {
        "shjob=info,shjob_runner=warn,shjob_config=warn,warn"
    }
}

/// Initialize the tracing subscriber.
///
/// Verbose mode adds targets and span close events (with `job_id` and
/// timing) to the compact format.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(verbose)))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    if verbose {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_names(false)
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

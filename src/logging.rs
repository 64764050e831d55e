//! stderr logging. Filter priority: `ANISYNC_LOG`, then `RUST_LOG`, then the
//! `-v`/`-q` flags.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

const LOG_ENV: &str = "ANISYNC_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    pub(crate) fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    fn default_directive(self) -> String {
        match self {
            Self::Quiet => Level::ERROR.to_string(),
            Self::Normal => format!("{},anisync={}", Level::WARN, Level::INFO),
            Self::Verbose => format!("{},anisync={}", Level::WARN, Level::DEBUG),
        }
    }
}

pub(crate) fn init(verbosity: Verbosity) {
    let use_ansi = std::io::IsTerminal::is_terminal(&std::io::stderr());
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(use_ansi)
        .with_target(verbosity == Verbosity::Verbose);

    let registry = tracing_subscriber::registry().with(build_filter(verbosity));
    // A second init (tests, embedding) keeps the first subscriber.
    if verbosity == Verbosity::Verbose {
        let _ = registry
            .with(fmt_layer.with_timer(fmt::time::uptime()))
            .try_init();
    } else {
        let _ = registry.with(fmt_layer.without_time().compact()).try_init();
    }
}

fn build_filter(verbosity: Verbosity) -> EnvFilter {
    if let Ok(directives) = std::env::var(LOG_ENV)
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::try_new(verbosity.default_directive())
        .unwrap_or_else(|_| EnvFilter::new(Level::WARN.as_str()))
}

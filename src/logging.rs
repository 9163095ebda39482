//! Log output on stderr, so stdout stays machine-readable.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "warn,awx_cli=debug"
    } else {
        "warn"
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(verbose: bool, color: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let console = tracing_subscriber::fmt::layer()
        .with_ansi(color)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .with_filter(filter);

    let _ = tracing_subscriber::registry().with(console).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_raises_crate_level() {
        assert_eq!(default_directive(false), "warn");
        assert_eq!(default_directive(true), "warn,awx_cli=debug");
    }

    #[test]
    fn init_twice_does_not_panic() {
        init(false, false);
        init(true, false);
    }
}

//! Runner diagnostics on stderr.
//!
//! Tracing is for whoever maintains a curriculum or the runner itself. What the
//! learner reads (progress lines, failure banners) goes through `report` on
//! stdout and is never filtered by `RUST_LOG` or `-v`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset: `warn`, raised by each `-v`.
pub fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "koan_runner=info,koans=info,warn",
        _ => "koan_runner=debug,koans=debug,info",
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `verbose` when set:
/// ```bash
/// RUST_LOG=koan_runner::io::watch=debug koans run
/// ```
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_the_default_level() {
        assert_eq!(default_directive(0), "warn");
        assert!(default_directive(1).contains("koan_runner=info"));
        assert!(default_directive(2).contains("koan_runner=debug"));
        assert_eq!(default_directive(5), default_directive(2));
    }

    #[test]
    fn default_directives_parse() {
        for verbose in 0..3 {
            EnvFilter::try_new(default_directive(verbose)).expect("valid directive");
        }
    }
}

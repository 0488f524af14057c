//! Console logging setup using tracing.

use tracing_subscriber::EnvFilter;

/// Filter directive used when `RUST_LOG` is unset.
#[must_use]
pub const fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides the level chosen by `debug`. Timestamps are printed only when `ts` is
/// set. Calling this twice is a no-op.
pub fn init(ts: bool, debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let _ = if ts {
        builder.try_init()
    } else {
        builder.without_time().try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_selects_level() {
        assert_eq!(default_directive(false), "info");
        assert_eq!(default_directive(true), "debug");
    }

    #[test]
    fn init_twice_does_not_panic() {
        init(false, true);
        init(true, false);
    }
}

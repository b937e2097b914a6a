use tracing_subscriber::{fmt, EnvFilter};

/// Install the fmt subscriber for binaries. `RUST_LOG` overrides `default_directive`.
pub fn init(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

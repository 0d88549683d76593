use tidings_types::DEFAULT_LOG_LEVEL;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_directive`. `log` records from the library
/// crates are forwarded to the same subscriber.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|e| {
            eprintln!("Invalid log level '{}': {}", default_directive, e);
            EnvFilter::new(DEFAULT_LOG_LEVEL)
        });

    if let Err(e) = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init()
    {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

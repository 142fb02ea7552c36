use tracing_subscriber::EnvFilter;

/// install the fmt subscriber
///
/// `RUST_LOG` wins over `level`. calling this twice is harmless, which keeps
/// tests that each want logs from fighting over the global subscriber.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("scale_bridge={level},scale_monitor={level},tower_http=warn"))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

use env_logger::Env;

/// Install the process logger. `RUST_LOG` overrides the default `info`
/// filter. Safe to call more than once.
pub fn init() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

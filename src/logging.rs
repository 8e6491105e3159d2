//! Logger setup for hosts embedding the editor core.
//!
//! Library code only uses the `log` macros; nothing is printed until a host
//! installs a logger. `RUST_LOG` always wins over the default level.

/// Install the console logger. Safe to call more than once.
pub fn init(default_level: &str) {
    let env = env_logger::Env::default().default_filter_or(default_level);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}

/// Logger for unit tests: captured by the test harness, `warn` by default.
pub fn init_for_tests() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

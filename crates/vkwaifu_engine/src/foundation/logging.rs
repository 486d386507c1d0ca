//! Logging setup and re-exports of the `log` macros

pub use log::{debug, info, warn, error, trace};

/// Initialize the logging system
///
/// Verbosity follows `RUST_LOG`; without it only warnings and errors are shown.
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
}

/// Initialize logging for tests, ignoring repeated calls
pub fn init_for_tests() {
    let _ = env_logger::builder().is_test(true).try_init();
}

//! Tracing and logging (shared setup).

pub mod logging;

pub use logging::LogFormat;

/// Initialize process-wide logging from the environment (`RUST_LOG`,
/// `LOG_FORMAT`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    logging::init(LogFormat::from_env());
}

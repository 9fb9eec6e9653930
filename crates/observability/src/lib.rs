//! Process-wide logging setup shared by the binaries.

/// Subscriber construction and output formats.
pub mod tracing;

pub use self::tracing::{LogFormat, UnknownLogFormat};

/// Initialize logging, choosing the format from `LOG_FORMAT`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    let format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default();
    init_with(format);
}

pub fn init_with(format: LogFormat) {
    tracing::init(format);
}

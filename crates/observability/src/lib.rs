//! Process-wide logging setup shared by the binaries.

pub mod tracing;

pub use crate::tracing::{LogFormat, UnknownLogFormat, init_with};

/// Initialize tracing from the environment.
///
/// `RUST_LOG` selects the filter (default `info`), `LOG_FORMAT` the output
/// (`json` by default, `pretty` for local development). Safe to call more
/// than once; later calls are no-ops.
pub fn init() {
    let format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    init_with(format, "info");
}

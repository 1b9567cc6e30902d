/*!
 * Eager - spooling relay for named pipes
 *
 * Copies a byte stream from one input into one or more outputs without ever
 * stalling the producer:
 * - Non-blocking readiness probing of FIFO outputs
 * - Disk-backed spool decoupling input rate from output rate
 * - Per-output drain cursors with strict FIFO delivery
 * - Zero-copy transfers (splice, copy_file_range, sendfile) with buffered fallback
 */

pub mod config;
pub mod core;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::{LogLevel, RelayConfig};
pub use core::{
    catch_up, probe, CancelToken, OutputEndpoint, OutputState, Position, ProbeResult, Relay,
    RelayPhase, RelayReport, SpoolStore, TransferEngine, TransferOutcome, ZeroCopyCapabilities,
};
pub use error::{RelayError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Zero-copy capabilities of the running platform
pub fn get_zero_copy_capabilities() -> ZeroCopyCapabilities {
    ZeroCopyCapabilities::detect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}

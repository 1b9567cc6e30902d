/*!
 * Relay core: transfer engine, readiness probe, spool store, catch-up and
 * the orchestrating loop
 */

pub mod buffered;
pub mod drain;
pub mod output;
pub mod probe;
pub mod relay;
pub mod spool;
pub mod transfer;
pub mod zero_copy;

pub use drain::catch_up;
pub use output::{OutputEndpoint, OutputState};
pub use probe::{probe, ProbeResult};
pub use relay::{CancelToken, CycleReport, OutputReport, Relay, RelayPhase, RelayReport};
pub use spool::{DrainCursor, SpoolStore};
pub use transfer::{EngineStats, Position, TransferEngine, TransferOutcome};
pub use zero_copy::ZeroCopyCapabilities;

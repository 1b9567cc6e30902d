/*!
 * Catch-up: empty an output's undelivered spool region while it accepts data
 */

use tracing::debug;

use super::output::OutputEndpoint;
use super::spool::SpoolStore;
use super::transfer::TransferOutcome;
use crate::error::Result;

/// Deliver everything spooled as of this call to `output`.
///
/// Stops early when the output would block (it stays open and is retried
/// next cycle). Returns `true` only when the output's consumer is gone, in
/// which case the output is marked done.
pub fn catch_up(spool: &SpoolStore, output: &mut OutputEndpoint) -> Result<bool> {
    if output.is_done() {
        return Ok(true);
    }

    let target = spool.write_offset();
    while output.delivered() < target {
        let remaining = target - output.delivered();
        match spool.drain_to(output, remaining)? {
            TransferOutcome::Progress(_) => {}
            TransferOutcome::WouldBlock => {
                debug!(
                    "Output {} stalled at {} of {} bytes",
                    output.name(),
                    output.delivered(),
                    target
                );
                return Ok(false);
            }
            TransferOutcome::End => {
                output.mark_done();
                return Ok(true);
            }
        }
    }

    Ok(false)
}

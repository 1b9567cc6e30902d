/*!
 * Spool store: append-only file between input and outputs
 *
 * One write cursor (`write_offset`) moved only by ingestion, one drain cursor
 * per output moved only by draining to that output. Bytes are addressed by
 * absolute offset so the cursors never interfere; the backing file is an
 * anonymous temp file released when the store is dropped.
 */

use std::fs::File;

use tracing::{debug, warn};

use super::output::OutputEndpoint;
use super::transfer::{EngineStats, Position, TransferEngine, TransferOutcome};
use crate::config::RelayConfig;
use crate::error::{Operation, RelayError, Result, Role};

/// Delivery position of one output inside the spool
pub struct DrainCursor {
    offset: u64,
    engine: TransferEngine,
}

impl DrainCursor {
    pub fn new(output_name: &str, config: &RelayConfig) -> Self {
        Self {
            offset: 0,
            engine: TransferEngine::new(Role::Spool, Role::Output(output_name.to_string()), config),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }
}

pub struct SpoolStore {
    file: File,
    write_offset: u64,
    reclaimed: u64,
    reclaim_enabled: bool,
    ingest: TransferEngine,
}

impl SpoolStore {
    /// Create an anonymous spool file in the configured directory
    pub fn create(config: &RelayConfig) -> Result<Self> {
        let file = match config.spool_dir {
            Some(ref dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        }
        .map_err(|e| RelayError::io(Operation::Open, Role::Spool, e))?;

        Self::from_file(file, config)
    }

    /// Spool into a caller-provided file; existing contents are discarded
    pub fn from_file(file: File, config: &RelayConfig) -> Result<Self> {
        file.set_len(0)
            .map_err(|e| RelayError::io(Operation::Truncate, Role::Spool, e))?;

        Ok(Self {
            file,
            write_offset: 0,
            reclaimed: 0,
            reclaim_enabled: config.reclaim,
            ingest: TransferEngine::new(Role::Input, Role::Spool, config),
        })
    }

    /// Total bytes ingested so far
    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    /// Bytes already released back to the filesystem
    pub fn reclaimed(&self) -> u64 {
        self.reclaimed
    }

    pub fn ingest_stats(&self) -> EngineStats {
        self.ingest.stats()
    }

    /// Spooled bytes not yet delivered through `cursor`
    pub fn available_for(&self, cursor: &DrainCursor) -> u64 {
        self.write_offset.saturating_sub(cursor.offset)
    }

    /// Ingest up to `max_bytes` from `input`, advancing the write cursor
    pub fn append(&mut self, input: &File, max_bytes: u64) -> Result<TransferOutcome> {
        let outcome = self.ingest.transfer(
            input,
            Position::Stream,
            &self.file,
            Position::At(self.write_offset),
            max_bytes,
        )?;

        if let TransferOutcome::Progress(n) = outcome {
            self.write_offset += n;
        }
        Ok(outcome)
    }

    /// Deliver up to `max_bytes` of `output`'s undelivered bytes, in order
    pub fn drain_to(&self, output: &mut OutputEndpoint, max_bytes: u64) -> Result<TransferOutcome> {
        let available = self.available_for(&output.cursor);
        let Some(handle) = output.handle.as_ref() else {
            return Ok(TransferOutcome::WouldBlock);
        };
        if available == 0 {
            return Ok(TransferOutcome::WouldBlock);
        }

        let cursor = &mut output.cursor;
        let outcome = cursor.engine.transfer(
            &self.file,
            Position::At(cursor.offset),
            handle,
            Position::Stream,
            max_bytes.min(available),
        )?;

        if let TransferOutcome::Progress(n) = outcome {
            cursor.offset += n;
            debug_assert!(cursor.offset <= self.write_offset);
        }
        Ok(outcome)
    }

    /// Release storage below `up_to`, which every output has already consumed
    pub fn reclaim(&mut self, up_to: u64) -> Result<u64> {
        let up_to = up_to.min(self.write_offset);
        if !self.reclaim_enabled || up_to <= self.reclaimed {
            return Ok(0);
        }

        match punch_hole(&self.file, self.reclaimed, up_to - self.reclaimed) {
            Ok(()) => {
                let released = up_to - self.reclaimed;
                debug!("Reclaimed spool range {}..{}", self.reclaimed, up_to);
                self.reclaimed = up_to;
                Ok(released)
            }
            Err(e) if is_reclaim_unsupported(&e) => {
                warn!("Spool reclaim unsupported here, keeping full spool: {}", e);
                self.reclaim_enabled = false;
                Ok(0)
            }
            Err(e) => Err(RelayError::io(Operation::Reclaim, Role::Spool, e)),
        }
    }
}

fn is_reclaim_unsupported(err: &std::io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(code) if code == libc::EOPNOTSUPP || code == libc::ENOSYS
    )
}

#[cfg(target_os = "linux")]
fn punch_hole(file: &File, offset: u64, len: u64) -> std::io::Result<()> {
    use rustix::fs::{fallocate, FallocateFlags};

    fallocate(
        file,
        FallocateFlags::PUNCH_HOLE | FallocateFlags::KEEP_SIZE,
        offset,
        len,
    )
    .map_err(std::io::Error::from)
}

#[cfg(not(target_os = "linux"))]
fn punch_hole(_file: &File, _offset: u64, _len: u64) -> std::io::Result<()> {
    Err(std::io::Error::from_raw_os_error(libc::EOPNOTSUPP))
}

/*!
 * Transfer engine - dispatches one bounded copy to zero-copy or buffered
 *
 * Decision tree per call:
 * 1. Bytes carried over from an earlier short write go out first
 * 2. Zero-copy if enabled and a primitive fits the descriptor pair
 * 3. Buffered copy as fallback; an unsupported zero-copy result switches
 *    the engine to buffered for the rest of its life
 */

use std::fs::File;

use serde::Serialize;
use tracing::{debug, warn};

use super::buffered::{BufferedCopier, CopyStep, Side};
use super::zero_copy::{self, FdKind, ZeroCopyMethod, ZeroCopyResult};
use crate::config::RelayConfig;
use crate::error::{Operation, RelayError, Result, Role};

/// Where a transfer reads or writes on a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Use (and advance) the descriptor's own position; pipes and sockets
    Stream,
    /// Explicit file offset; the descriptor's position is left alone
    At(u64),
}

/// Result of one transfer engine invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// This many bytes (> 0) reached the destination
    Progress(u64),
    /// Nothing moved; source empty or destination full right now
    WouldBlock,
    /// Source exhausted or destination gone; terminal for this direction
    End,
}

impl TransferOutcome {
    pub fn bytes(&self) -> u64 {
        match self {
            TransferOutcome::Progress(n) => *n,
            _ => 0,
        }
    }
}

/// Counters kept by one engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub zero_copy_bytes: u64,
    pub buffered_bytes: u64,
    pub zero_copy_fallbacks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ZeroCopyState {
    /// Not chosen yet; decided on first use from the descriptor types
    Pending,
    Active(ZeroCopyMethod),
    Off,
}

/// Moves bytes in one direction (input to spool, or spool to one output)
pub struct TransferEngine {
    from: Role,
    to: Role,
    chunk_size: usize,
    zero_copy: ZeroCopyState,
    buffered: BufferedCopier,
    stats: EngineStats,
}

impl TransferEngine {
    pub fn new(from: Role, to: Role, config: &RelayConfig) -> Self {
        Self {
            from,
            to,
            chunk_size: config.chunk_size.max(1),
            zero_copy: if config.use_zero_copy {
                ZeroCopyState::Pending
            } else {
                ZeroCopyState::Off
            },
            buffered: BufferedCopier::new(config.chunk_size),
            stats: EngineStats::default(),
        }
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Zero-copy primitive in use, if one was selected
    pub fn method(&self) -> Option<ZeroCopyMethod> {
        match self.zero_copy {
            ZeroCopyState::Active(method) => Some(method),
            _ => None,
        }
    }

    /// Copy at most `max_bytes` (capped at one chunk) from `src` to `dst`
    pub fn transfer(
        &mut self,
        src: &File,
        src_pos: Position,
        dst: &File,
        dst_pos: Position,
        max_bytes: u64,
    ) -> Result<TransferOutcome> {
        let max = usize::try_from(max_bytes)
            .unwrap_or(usize::MAX)
            .min(self.chunk_size);
        if max == 0 {
            return Ok(TransferOutcome::WouldBlock);
        }

        if !self.buffered.has_carry() {
            if let Some(method) = self.resolve_method(src, dst)? {
                match zero_copy::try_zero_copy(method, src, src_pos, dst, dst_pos, max) {
                    ZeroCopyResult::Moved(0) => return Ok(TransferOutcome::End),
                    ZeroCopyResult::Moved(n) => {
                        self.stats.zero_copy_bytes += n;
                        return Ok(TransferOutcome::Progress(n));
                    }
                    ZeroCopyResult::WouldBlock => return Ok(TransferOutcome::WouldBlock),
                    ZeroCopyResult::Gone => return Ok(TransferOutcome::End),
                    ZeroCopyResult::Unsupported => {
                        warn!(
                            "{:?} unsupported from {} to {}, falling back to buffered copy",
                            method, self.from, self.to
                        );
                        self.zero_copy = ZeroCopyState::Off;
                        self.stats.zero_copy_fallbacks += 1;
                    }
                    ZeroCopyResult::Failed(e) => {
                        return Err(RelayError::transfer(
                            method.operation(),
                            self.from.clone(),
                            self.to.clone(),
                            e,
                        ));
                    }
                }
            }
        }

        match self.buffered.copy(src, src_pos, dst, dst_pos, max) {
            Ok(CopyStep::Moved(n)) => {
                self.stats.buffered_bytes += n;
                Ok(TransferOutcome::Progress(n))
            }
            Ok(CopyStep::WouldBlock) => Ok(TransferOutcome::WouldBlock),
            Ok(CopyStep::SourceEnd) | Ok(CopyStep::DestinationGone) => Ok(TransferOutcome::End),
            Err((Side::Source, e)) => Err(RelayError::io(Operation::Read, self.from.clone(), e)),
            Err((Side::Destination, e)) => {
                Err(RelayError::io(Operation::Write, self.to.clone(), e))
            }
        }
    }

    fn resolve_method(&mut self, src: &File, dst: &File) -> Result<Option<ZeroCopyMethod>> {
        match self.zero_copy {
            ZeroCopyState::Active(method) => Ok(Some(method)),
            ZeroCopyState::Off => Ok(None),
            ZeroCopyState::Pending => {
                let src_kind = FdKind::of(src)
                    .map_err(|e| RelayError::io(Operation::Stat, self.from.clone(), e))?;
                let dst_kind = FdKind::of(dst)
                    .map_err(|e| RelayError::io(Operation::Stat, self.to.clone(), e))?;

                let selected = zero_copy::select_method(src_kind, dst_kind);
                debug!(
                    "Transfer {} -> {}: {:?} -> {:?} using {:?}",
                    self.from, self.to, src_kind, dst_kind, selected
                );
                self.zero_copy = match selected {
                    Some(method) => ZeroCopyState::Active(method),
                    None => ZeroCopyState::Off,
                };
                Ok(selected)
            }
        }
    }
}

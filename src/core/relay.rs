/*!
 * Relay orchestrator
 *
 * One thread drives the loop: ingest what the input has right now, then
 * probe and catch up every output that is not done. Nothing in a cycle
 * blocks; between idle cycles the loop sleeps for the configured backoff.
 */

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info};

use super::drain::catch_up;
use super::output::{OutputEndpoint, OutputState};
use super::spool::SpoolStore;
use super::transfer::{EngineStats, TransferOutcome};
use crate::config::RelayConfig;
use crate::error::{Operation, RelayError, Result, Role};

/// Where the relay is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayPhase {
    Ingesting,
    Probing,
    Draining,
    Finished,
    Cancelled,
}

impl RelayPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayPhase::Finished | RelayPhase::Cancelled)
    }
}

/// Stop request checked between cycles
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The shared flag, for setting from a signal handler
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// What one loop iteration moved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub ingested: u64,
    pub delivered: u64,
    pub phase: RelayPhase,
}

impl CycleReport {
    pub fn made_progress(&self) -> bool {
        self.ingested > 0 || self.delivered > 0
    }
}

/// Per-output summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputReport {
    pub name: String,
    pub state: OutputState,
    pub delivered: u64,
    /// Spooled bytes this output never received
    pub discarded: u64,
    pub transfer: EngineStats,
}

/// Summary of a relay run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayReport {
    pub phase: RelayPhase,
    pub bytes_ingested: u64,
    pub bytes_reclaimed: u64,
    pub cycles: u64,
    pub duration_ms: u64,
    pub ingest: EngineStats,
    pub outputs: Vec<OutputReport>,
}

impl RelayReport {
    pub fn bytes_delivered(&self) -> u64 {
        self.outputs.iter().map(|o| o.delivered).sum()
    }

    pub fn bytes_discarded(&self) -> u64 {
        self.outputs.iter().map(|o| o.discarded).sum()
    }
}

pub struct Relay {
    input: Option<File>,
    spool: SpoolStore,
    outputs: Vec<OutputEndpoint>,
    phase: RelayPhase,
    config: RelayConfig,
    cycles: u64,
    started: Instant,
}

impl Relay {
    /// Relay `input` into every path in `outputs` through a fresh spool
    pub fn new(input: File, outputs: Vec<PathBuf>, config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let spool = SpoolStore::create(&config)?;
        Self::with_spool(input, outputs, spool, config)
    }

    /// Same as `new`, spooling into a caller-provided store
    pub fn with_spool(
        input: File,
        outputs: Vec<PathBuf>,
        spool: SpoolStore,
        config: RelayConfig,
    ) -> Result<Self> {
        config.validate()?;
        set_nonblocking(&input)?;

        let outputs = outputs
            .into_iter()
            .map(|path| OutputEndpoint::new(path, &config))
            .collect();

        Ok(Self {
            input: Some(input),
            spool,
            outputs,
            phase: RelayPhase::Ingesting,
            config,
            cycles: 0,
            started: Instant::now(),
        })
    }

    pub fn phase(&self) -> RelayPhase {
        self.phase
    }

    pub fn spool(&self) -> &SpoolStore {
        &self.spool
    }

    pub fn outputs(&self) -> &[OutputEndpoint] {
        &self.outputs
    }

    /// True once the input has reported end of data
    pub fn input_ended(&self) -> bool {
        self.input.is_none()
    }

    /// Run one loop iteration
    pub fn step(&mut self) -> Result<CycleReport> {
        if self.phase.is_terminal() {
            return Ok(CycleReport {
                ingested: 0,
                delivered: 0,
                phase: self.phase,
            });
        }
        self.cycles += 1;

        self.phase = RelayPhase::Ingesting;
        let ingested = self.ingest()?;

        let mut delivered = 0;
        for output in self.outputs.iter_mut().filter(|o| !o.is_done()) {
            self.phase = RelayPhase::Probing;
            if !output.poll_ready()? {
                continue;
            }

            self.phase = RelayPhase::Draining;
            let before = output.delivered();
            catch_up(&self.spool, output)?;
            delivered += output.delivered() - before;
        }

        if self.config.reclaim {
            self.reclaim()?;
        }

        if self.is_complete() {
            self.finish();
        } else {
            self.phase = RelayPhase::Ingesting;
        }

        Ok(CycleReport {
            ingested,
            delivered,
            phase: self.phase,
        })
    }

    /// Loop until finished, cancelled, or a fatal error
    pub fn run(&mut self, cancel: &CancelToken) -> Result<RelayReport> {
        let backoff = self.config.idle_backoff();

        while !self.phase.is_terminal() {
            if cancel.is_cancelled() {
                self.cancel();
                break;
            }

            let cycle = self.step().inspect_err(|e| {
                error!(
                    "Relay aborted after {} bytes ingested: {}",
                    self.spool.write_offset(),
                    e
                );
            })?;

            if !cycle.phase.is_terminal() && !cycle.made_progress() && !backoff.is_zero() {
                thread::sleep(backoff);
            }
        }

        Ok(self.report())
    }

    /// Stop now, releasing the input and every output handle
    pub fn cancel(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        info!(
            "Relay cancelled with {} bytes spooled",
            self.spool.write_offset()
        );
        self.input = None;
        for output in &mut self.outputs {
            output.close();
        }
        self.phase = RelayPhase::Cancelled;
    }

    pub fn report(&self) -> RelayReport {
        let write_offset = self.spool.write_offset();
        RelayReport {
            phase: self.phase,
            bytes_ingested: write_offset,
            bytes_reclaimed: self.spool.reclaimed(),
            cycles: self.cycles,
            duration_ms: self.started.elapsed().as_millis() as u64,
            ingest: self.spool.ingest_stats(),
            outputs: self
                .outputs
                .iter()
                .map(|o| OutputReport {
                    name: o.name().to_string(),
                    state: o.state(),
                    delivered: o.delivered(),
                    discarded: o.pending(write_offset),
                    transfer: o.cursor().stats(),
                })
                .collect(),
        }
    }

    /// Pull whatever the input has right now, up to the per-cycle budget
    fn ingest(&mut self) -> Result<u64> {
        let Some(input) = self.input.as_ref() else {
            return Ok(0);
        };

        let budget = self.config.ingest_budget;
        let mut ingested = 0u64;
        while ingested < budget {
            match self.spool.append(input, budget - ingested)? {
                TransferOutcome::Progress(n) => ingested += n,
                TransferOutcome::WouldBlock => break,
                TransferOutcome::End => {
                    debug!("Input ended after {} bytes", self.spool.write_offset());
                    self.input = None;
                    break;
                }
            }
        }
        Ok(ingested)
    }

    /// Outputs that are done never read again, so only live cursors hold data
    fn reclaim(&mut self) -> Result<()> {
        let low_water = self
            .outputs
            .iter()
            .filter(|o| !o.is_done())
            .map(|o| o.delivered())
            .min()
            .unwrap_or(self.spool.write_offset());
        self.spool.reclaim(low_water)?;
        Ok(())
    }

    /// Input exhausted and every output either done or fully caught up
    fn is_complete(&self) -> bool {
        let write_offset = self.spool.write_offset();
        self.input_ended()
            && self
                .outputs
                .iter()
                .all(|o| o.is_done() || o.delivered() == write_offset)
    }

    fn finish(&mut self) {
        for output in &mut self.outputs {
            output.close();
        }
        self.phase = RelayPhase::Finished;
        info!(
            "Relay finished: {} bytes ingested, {} output(s), {} cycles",
            self.spool.write_offset(),
            self.outputs.len(),
            self.cycles
        );
    }
}

/// Put the input descriptor into non-blocking mode
pub fn set_nonblocking(file: &File) -> Result<()> {
    use rustix::fs::{fcntl_getfl, fcntl_setfl, OFlags};

    let flags = fcntl_getfl(file)
        .map_err(|e| RelayError::io(Operation::Fcntl, Role::Input, e.into()))?;
    if !flags.contains(OFlags::NONBLOCK) {
        fcntl_setfl(file, flags | OFlags::NONBLOCK)
            .map_err(|e| RelayError::io(Operation::Fcntl, Role::Input, e.into()))?;
    }
    Ok(())
}

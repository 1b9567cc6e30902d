/*!
 * Output endpoint: one consumer-facing path and its delivery cursor
 */

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use super::probe::{probe, ProbeResult};
use super::spool::DrainCursor;
use crate::config::RelayConfig;
use crate::error::Result;

/// Lifecycle of one output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputState {
    /// No consumer attached; opening would block
    NotReady,
    /// Open for non-blocking writes
    Ready,
    /// Consumer finished reading; terminal
    Done,
}

pub struct OutputEndpoint {
    name: String,
    path: PathBuf,
    state: OutputState,
    probes: u64,
    pub(crate) cursor: DrainCursor,
    pub(crate) handle: Option<File>,
}

impl OutputEndpoint {
    pub fn new(path: impl Into<PathBuf>, config: &RelayConfig) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self {
            cursor: DrainCursor::new(&name, config),
            name,
            path,
            state: OutputState::NotReady,
            probes: 0,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> OutputState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == OutputState::Done
    }

    /// Spool bytes delivered to this output so far (its drain offset)
    pub fn delivered(&self) -> u64 {
        self.cursor.offset()
    }

    /// Spooled bytes not yet delivered
    pub fn pending(&self, write_offset: u64) -> u64 {
        write_offset.saturating_sub(self.delivered())
    }

    /// Readiness probes issued so far
    pub fn probes(&self) -> u64 {
        self.probes
    }

    pub fn cursor(&self) -> &DrainCursor {
        &self.cursor
    }

    /// Make sure a writable handle is open; false while no consumer is attached
    pub fn poll_ready(&mut self) -> Result<bool> {
        match self.state {
            OutputState::Done => return Ok(false),
            OutputState::Ready if self.handle.is_some() => return Ok(true),
            _ => {}
        }

        self.probes += 1;
        match probe(&self.path)? {
            ProbeResult::Ready(file) => {
                info!("Output {} ready after {} probe(s)", self.name, self.probes);
                self.handle = Some(file);
                self.state = OutputState::Ready;
                Ok(true)
            }
            ProbeResult::NotReady => {
                self.state = OutputState::NotReady;
                Ok(false)
            }
        }
    }

    /// The consumer went away; nothing more is written here
    pub fn mark_done(&mut self) {
        if self.state != OutputState::Done {
            info!(
                "Output {} done after {} bytes",
                self.name,
                self.cursor.offset()
            );
        }
        self.state = OutputState::Done;
        self.handle = None;
    }

    /// Release the handle so the consumer sees end of file
    pub fn close(&mut self) {
        if self.handle.take().is_some() {
            debug!("Closed output {}", self.name);
            if self.state == OutputState::Ready {
                self.state = OutputState::NotReady;
            }
        }
    }
}

/*!
 * Buffered transfer: read into a reusable buffer, write exactly what was read
 *
 * Used whenever zero-copy is disabled or unsupported for a descriptor pair.
 * A short write never drops bytes. With a positioned source the unwritten
 * tail is simply read again next time, since the caller only advances its
 * cursor by what was written. With a stream source the tail cannot be read
 * again, so it stays in the buffer as a carry and is written out before
 * anything new is read.
 */

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::fs::FileExt;

use super::transfer::Position;
use crate::error::{classify, IoClass};

/// Which side of a buffered copy failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Destination,
}

/// Outcome of one buffered step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStep {
    /// Bytes written through to the destination
    Moved(u64),
    WouldBlock,
    SourceEnd,
    DestinationGone,
}

pub struct BufferedCopier {
    buffer: Vec<u8>,
    carry_start: usize,
    carry_end: usize,
}

impl BufferedCopier {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            buffer: vec![0u8; chunk_size.max(1)],
            carry_start: 0,
            carry_end: 0,
        }
    }

    /// Bytes taken from a stream source but not yet accepted downstream
    pub fn carry_len(&self) -> usize {
        self.carry_end - self.carry_start
    }

    pub fn has_carry(&self) -> bool {
        self.carry_len() > 0
    }

    /// One bounded copy of at most `max` bytes
    pub fn copy(
        &mut self,
        src: &File,
        src_pos: Position,
        dst: &File,
        dst_pos: Position,
        max: usize,
    ) -> Result<CopyStep, (Side, io::Error)> {
        if max == 0 {
            return Ok(CopyStep::WouldBlock);
        }
        if self.has_carry() {
            return self.flush_carry(dst, dst_pos, max);
        }

        let want = max.min(self.buffer.len());
        let read = match read_once(src, src_pos, &mut self.buffer[..want]) {
            Ok(0) => return Ok(CopyStep::SourceEnd),
            Ok(n) => n,
            Err(e) => {
                return match classify(&e) {
                    IoClass::Unready => Ok(CopyStep::WouldBlock),
                    _ => Err((Side::Source, e)),
                }
            }
        };

        let (written, stop) = write_some(dst, dst_pos, &self.buffer[..read]);
        if let Some(err) = stop.error {
            return Err((Side::Destination, err));
        }

        if written < read && src_pos == Position::Stream {
            self.carry_start = written;
            self.carry_end = read;
        }

        if written > 0 {
            Ok(CopyStep::Moved(written as u64))
        } else if stop.gone {
            Ok(CopyStep::DestinationGone)
        } else {
            Ok(CopyStep::WouldBlock)
        }
    }

    fn flush_carry(
        &mut self,
        dst: &File,
        dst_pos: Position,
        max: usize,
    ) -> Result<CopyStep, (Side, io::Error)> {
        let end = self.carry_end.min(self.carry_start + max);
        let (written, stop) = write_some(dst, dst_pos, &self.buffer[self.carry_start..end]);
        if let Some(err) = stop.error {
            return Err((Side::Destination, err));
        }

        self.carry_start += written;
        if self.carry_start == self.carry_end {
            self.carry_start = 0;
            self.carry_end = 0;
        }

        if written > 0 {
            Ok(CopyStep::Moved(written as u64))
        } else if stop.gone {
            Ok(CopyStep::DestinationGone)
        } else {
            Ok(CopyStep::WouldBlock)
        }
    }
}

fn read_once(src: &File, pos: Position, buf: &mut [u8]) -> io::Result<usize> {
    match pos {
        Position::At(offset) => src.read_at(buf, offset),
        Position::Stream => {
            let mut reader = src;
            reader.read(buf)
        }
    }
}

#[derive(Default)]
struct WriteStop {
    gone: bool,
    error: Option<io::Error>,
}

/// Write as much of `data` as the destination accepts right now
fn write_some(dst: &File, pos: Position, data: &[u8]) -> (usize, WriteStop) {
    let mut written = 0usize;
    let mut stop = WriteStop::default();

    while written < data.len() {
        let result = match pos {
            Position::At(offset) => dst.write_at(&data[written..], offset + written as u64),
            Position::Stream => {
                let mut writer = dst;
                writer.write(&data[written..])
            }
        };

        match result {
            // Nothing accepted without an error; try again next cycle
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) => {
                match classify(&e) {
                    IoClass::Unready => {}
                    IoClass::Gone => stop.gone = true,
                    IoClass::Fatal => stop.error = Some(e),
                }
                break;
            }
        }
    }

    (written, stop)
}

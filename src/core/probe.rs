/*!
 * Output readiness probe
 *
 * Opening a FIFO for writing with O_NONBLOCK fails with ENXIO while nobody
 * has it open for reading. That is the "no consumer yet" signal: the relay
 * keeps spooling and asks again on a later cycle.
 */

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::error::{Operation, RelayError, Result, Role};

/// Outcome of one readiness probe
#[derive(Debug)]
pub enum ProbeResult {
    /// Writable handle, already in non-blocking mode
    Ready(File),
    /// No consumer attached yet
    NotReady,
}

impl ProbeResult {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeResult::Ready(_))
    }
}

/// Try to open `path` for non-blocking writes without waiting for a reader
pub fn probe(path: &Path) -> Result<ProbeResult> {
    match OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
    {
        Ok(file) => Ok(ProbeResult::Ready(file)),
        Err(e) if e.raw_os_error() == Some(libc::ENXIO) => Ok(ProbeResult::NotReady),
        Err(e) => Err(RelayError::io(
            Operation::Open,
            Role::Output(path.display().to_string()),
            e,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use tempfile::tempdir;

    fn mkfifo(path: &Path) {
        let c_path = CString::new(path.as_os_str().as_bytes()).unwrap();
        let ret = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
        assert_eq!(ret, 0, "mkfifo failed");
    }

    #[test]
    fn test_fifo_without_reader_is_not_ready() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.fifo");
        mkfifo(&path);

        for _ in 0..100 {
            assert!(!probe(&path).unwrap().is_ready());
        }
    }

    #[test]
    fn test_fifo_with_reader_is_ready() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.fifo");
        mkfifo(&path);

        let _reader = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .unwrap();

        assert!(probe(&path).unwrap().is_ready());
    }

    #[test]
    fn test_regular_file_is_ready() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"").unwrap();

        assert!(probe(&path).unwrap().is_ready());
    }

    #[test]
    fn test_missing_path_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing");

        let err = probe(&path).unwrap_err();
        assert_eq!(err.operation(), Some(Operation::Open));
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }
}

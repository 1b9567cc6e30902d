/*!
 * Zero-copy transfer using platform-specific system calls
 *
 * Moves bytes between two descriptors inside the kernel: splice (Linux, one
 * side must be a pipe), copy_file_range (Linux, file to file) and sendfile
 * (Linux, regular file into anything). Every call is a single bounded move;
 * file offsets are passed explicitly so shared file cursors are never touched.
 */

use std::fs::File;
use std::io;

use super::transfer::Position;
use crate::error::{classify, IoClass, Operation};

/// Result of attempting one zero-copy move
#[derive(Debug)]
pub enum ZeroCopyResult {
    /// Moved this many bytes (0 = the source has no more data)
    Moved(u64),
    /// The method does not work for these descriptors; use the buffered path
    Unsupported,
    /// Source empty or destination full right now
    WouldBlock,
    /// The destination's reader has gone away
    Gone,
    /// Any other failure
    Failed(io::Error),
}

/// Kernel-assisted copy primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroCopyMethod {
    Splice,
    CopyFileRange,
    SendFile,
}

impl ZeroCopyMethod {
    pub fn operation(&self) -> Operation {
        match self {
            ZeroCopyMethod::Splice => Operation::Splice,
            ZeroCopyMethod::CopyFileRange => Operation::CopyFileRange,
            ZeroCopyMethod::SendFile => Operation::SendFile,
        }
    }
}

/// Coarse descriptor type, enough to pick a copy primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdKind {
    Fifo,
    Regular,
    Socket,
    CharDevice,
    Other,
}

impl FdKind {
    pub fn of(file: &File) -> io::Result<Self> {
        use std::os::unix::fs::FileTypeExt;

        let file_type = file.metadata()?.file_type();
        Ok(if file_type.is_fifo() {
            FdKind::Fifo
        } else if file_type.is_file() {
            FdKind::Regular
        } else if file_type.is_socket() {
            FdKind::Socket
        } else if file_type.is_char_device() {
            FdKind::CharDevice
        } else {
            FdKind::Other
        })
    }
}

/// Capabilities for zero-copy operations on this platform
#[derive(Debug, Clone)]
pub struct ZeroCopyCapabilities {
    pub available: bool,
    pub methods: &'static [&'static str],
}

impl ZeroCopyCapabilities {
    /// Detect available zero-copy capabilities
    pub fn detect() -> Self {
        #[cfg(all(target_os = "linux", feature = "zero-copy"))]
        {
            Self {
                available: true,
                methods: &["splice", "copy_file_range", "sendfile"],
            }
        }

        #[cfg(not(all(target_os = "linux", feature = "zero-copy")))]
        {
            Self {
                available: false,
                methods: &[],
            }
        }
    }
}

/// Pick the kernel primitive for a (source, destination) pair, if any
pub fn select_method(src: FdKind, dst: FdKind) -> Option<ZeroCopyMethod> {
    if !ZeroCopyCapabilities::detect().available {
        return None;
    }

    match (src, dst) {
        (FdKind::Fifo, _) | (_, FdKind::Fifo) => Some(ZeroCopyMethod::Splice),
        (FdKind::Regular, FdKind::Regular) => Some(ZeroCopyMethod::CopyFileRange),
        (FdKind::Regular, _) => Some(ZeroCopyMethod::SendFile),
        _ => None,
    }
}

/// Errors meaning "this primitive cannot handle these descriptors"
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn is_unsupported(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(code) if code == libc::ENOSYS
            || code == libc::EINVAL
            || code == libc::EXDEV
            || code == libc::EOPNOTSUPP
            || code == libc::ESPIPE
    )
}

/// Attempt one bounded zero-copy move of at most `len` bytes
pub fn try_zero_copy(
    method: ZeroCopyMethod,
    src: &File,
    src_pos: Position,
    dst: &File,
    dst_pos: Position,
    len: usize,
) -> ZeroCopyResult {
    if len == 0 {
        return ZeroCopyResult::Moved(0);
    }

    #[cfg(target_os = "linux")]
    {
        from_raw(linux::transfer_once(method, src, src_pos, dst, dst_pos, len))
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = (method, src, src_pos, dst, dst_pos);
        ZeroCopyResult::Unsupported
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn from_raw(raw: io::Result<usize>) -> ZeroCopyResult {
    match raw {
        Ok(n) => ZeroCopyResult::Moved(n as u64),
        Err(err) if is_unsupported(&err) => ZeroCopyResult::Unsupported,
        Err(err) => match classify(&err) {
            IoClass::Unready => ZeroCopyResult::WouldBlock,
            IoClass::Gone => ZeroCopyResult::Gone,
            IoClass::Fatal => ZeroCopyResult::Failed(err),
        },
    }
}

// ============================================================================
// Linux implementation
// ============================================================================

#[cfg(target_os = "linux")]
mod linux {
    use super::{Position, ZeroCopyMethod};
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    /// Flag for splice: move pages instead of copying (advisory).
    const SPLICE_F_MOVE: libc::c_uint = 0x01;

    /// Flag for splice: do not block on the pipe side.
    const SPLICE_F_NONBLOCK: libc::c_uint = 0x02;

    fn offset_of(pos: Position) -> Option<i64> {
        match pos {
            Position::Stream => None,
            Position::At(offset) => Some(offset as i64),
        }
    }

    fn as_ptr(offset: &mut Option<i64>) -> *mut i64 {
        match offset {
            Some(value) => value as *mut i64,
            None => std::ptr::null_mut(),
        }
    }

    pub fn transfer_once(
        method: ZeroCopyMethod,
        src: &File,
        src_pos: Position,
        dst: &File,
        dst_pos: Position,
        len: usize,
    ) -> io::Result<usize> {
        let mut src_off = offset_of(src_pos);
        let mut dst_off = offset_of(dst_pos);

        let ret = match method {
            // SAFETY: both descriptors are owned by live `File`s; offset pointers are
            // either null or point at locals that outlive the call.
            ZeroCopyMethod::Splice => unsafe {
                libc::splice(
                    src.as_raw_fd(),
                    as_ptr(&mut src_off),
                    dst.as_raw_fd(),
                    as_ptr(&mut dst_off),
                    len,
                    SPLICE_F_MOVE | SPLICE_F_NONBLOCK,
                )
            },
            // SAFETY: as above.
            ZeroCopyMethod::CopyFileRange => unsafe {
                libc::syscall(
                    libc::SYS_copy_file_range,
                    src.as_raw_fd(),
                    as_ptr(&mut src_off),
                    dst.as_raw_fd(),
                    as_ptr(&mut dst_off),
                    len,
                    0u32, // flags
                ) as isize
            },
            ZeroCopyMethod::SendFile => {
                // sendfile always writes at the destination's own file position
                if dst_off.is_some() {
                    return Err(io::Error::from_raw_os_error(libc::EINVAL));
                }
                let mut off: Option<libc::off_t> = src_off.map(|o| o as libc::off_t);
                let off_ptr = match off.as_mut() {
                    Some(value) => value as *mut libc::off_t,
                    None => std::ptr::null_mut(),
                };
                // SAFETY: as above.
                unsafe { libc::sendfile(dst.as_raw_fd(), src.as_raw_fd(), off_ptr, len) }
            }
        };

        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ret as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_capabilities_detection() {
        let caps = ZeroCopyCapabilities::detect();

        #[cfg(all(target_os = "linux", feature = "zero-copy"))]
        assert!(caps.available);

        #[cfg(not(all(target_os = "linux", feature = "zero-copy")))]
        assert!(!caps.available);
    }

    #[test]
    fn test_fd_kind_regular_file() {
        let temp = NamedTempFile::new().unwrap();
        assert_eq!(FdKind::of(temp.as_file()).unwrap(), FdKind::Regular);
    }

    #[cfg(all(target_os = "linux", feature = "zero-copy"))]
    #[test]
    fn test_method_selection() {
        assert_eq!(
            select_method(FdKind::Fifo, FdKind::Regular),
            Some(ZeroCopyMethod::Splice)
        );
        assert_eq!(
            select_method(FdKind::Regular, FdKind::Fifo),
            Some(ZeroCopyMethod::Splice)
        );
        assert_eq!(
            select_method(FdKind::Regular, FdKind::Regular),
            Some(ZeroCopyMethod::CopyFileRange)
        );
        assert_eq!(
            select_method(FdKind::Regular, FdKind::Socket),
            Some(ZeroCopyMethod::SendFile)
        );
        assert_eq!(select_method(FdKind::CharDevice, FdKind::Socket), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_copy_file_range_at_offsets() {
        use std::io::Write;
        use std::os::unix::fs::FileExt;

        let mut source = NamedTempFile::new().unwrap();
        let dest = NamedTempFile::new().unwrap();
        source.write_all(b"Hello, zero-copy world!").unwrap();
        source.flush().unwrap();

        let result = try_zero_copy(
            ZeroCopyMethod::CopyFileRange,
            source.as_file(),
            Position::At(7),
            dest.as_file(),
            Position::At(0),
            9,
        );

        match result {
            ZeroCopyResult::Moved(n) => {
                assert_eq!(n, 9);
                let mut buffer = [0u8; 9];
                dest.as_file().read_exact_at(&mut buffer, 0).unwrap();
                assert_eq!(&buffer, b"zero-copy");
            }
            ZeroCopyResult::Unsupported => {
                // Acceptable on older kernels
                println!("copy_file_range not supported on this system");
            }
            other => panic!("unexpected zero-copy result: {:?}", other),
        }
    }

    #[test]
    fn test_zero_length_is_noop() {
        let source = NamedTempFile::new().unwrap();
        let dest = NamedTempFile::new().unwrap();
        let result = try_zero_copy(
            ZeroCopyMethod::Splice,
            source.as_file(),
            Position::At(0),
            dest.as_file(),
            Position::At(0),
            0,
        );
        assert!(matches!(result, ZeroCopyResult::Moved(0)));
    }
}

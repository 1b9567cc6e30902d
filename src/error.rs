/*!
 * Error types for the spooling relay
 *
 * Only fatal conditions are errors. "Not ready yet" and "end of stream" are
 * ordinary relay states and travel as data (`TransferOutcome`, `ProbeResult`).
 */

use std::fmt;
use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_CONFIG: i32 = 3;
pub const EXIT_CANCELLED: i32 = 130;

/// Which descriptor an operation was working on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// The producer-facing input handle
    Input,
    /// The intermediate spool file
    Spool,
    /// A consumer-facing output, identified by name
    Output(String),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Input => write!(f, "input"),
            Role::Spool => write!(f, "spool"),
            Role::Output(name) => write!(f, "output '{}'", name),
        }
    }
}

/// The system-level operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Open,
    Read,
    Write,
    Splice,
    CopyFileRange,
    SendFile,
    Fcntl,
    Stat,
    Truncate,
    Reclaim,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Open => "open",
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Splice => "splice",
            Operation::CopyFileRange => "copy_file_range",
            Operation::SendFile => "sendfile",
            Operation::Fcntl => "fcntl",
            Operation::Stat => "fstat",
            Operation::Truncate => "truncate",
            Operation::Reclaim => "fallocate",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    /// An OS-level failure on a single descriptor
    #[error("{op} on {role} failed: {source}")]
    Io {
        op: Operation,
        role: Role,
        #[source]
        source: io::Error,
    },

    /// A kernel-assisted copy between two descriptors failed
    #[error("{op} from {from} to {to} failed: {source}")]
    Transfer {
        op: Operation,
        from: Role,
        to: Role,
        #[source]
        source: io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    pub fn io(op: Operation, role: Role, source: io::Error) -> Self {
        RelayError::Io { op, role, source }
    }

    pub fn transfer(op: Operation, from: Role, to: Role, source: io::Error) -> Self {
        RelayError::Transfer {
            op,
            from,
            to,
            source,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RelayError::Config(_) => EXIT_CONFIG,
            RelayError::Io { .. } | RelayError::Transfer { .. } => EXIT_FATAL,
        }
    }

    /// The failing operation, if this error came from a system call
    pub fn operation(&self) -> Option<Operation> {
        match self {
            RelayError::Io { op, .. } | RelayError::Transfer { op, .. } => Some(*op),
            RelayError::Config(_) => None,
        }
    }

    /// Raw OS error code of the underlying failure
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            RelayError::Io { source, .. } | RelayError::Transfer { source, .. } => {
                source.raw_os_error()
            }
            RelayError::Config(_) => None,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::Io { .. } | RelayError::Transfer { .. } => ErrorCategory::IoError,
            RelayError::Config(_) => ErrorCategory::Configuration,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// I/O operation errors
    IoError,
    /// Configuration errors
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Configuration => write!(f, "configuration"),
        }
    }
}

/// How the relay treats a failed non-blocking I/O call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoClass {
    /// Not ready right now; retry on a later cycle
    Unready,
    /// The peer is gone (reader closed its end); terminal for that direction
    Gone,
    /// Anything else; aborts the relay
    Fatal,
}

/// Classify an I/O error raised by a read, write or kernel copy
pub fn classify(err: &io::Error) -> IoClass {
    if let Some(code) = err.raw_os_error() {
        if code == libc::EAGAIN || code == libc::EWOULDBLOCK || code == libc::EINTR {
            return IoClass::Unready;
        }
        if code == libc::EPIPE || code == libc::ECONNRESET {
            return IoClass::Gone;
        }
        return IoClass::Fatal;
    }

    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => IoClass::Unready,
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => IoClass::Gone,
        _ => IoClass::Fatal,
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        RelayError::Config(format!("TOML parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eagain_is_unready() {
        let err = io::Error::from_raw_os_error(libc::EAGAIN);
        assert_eq!(classify(&err), IoClass::Unready);

        let err = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(classify(&err), IoClass::Unready);
    }

    #[test]
    fn test_epipe_is_gone() {
        let err = io::Error::from_raw_os_error(libc::EPIPE);
        assert_eq!(classify(&err), IoClass::Gone);
    }

    #[test]
    fn test_other_errors_are_fatal() {
        assert_eq!(
            classify(&io::Error::from_raw_os_error(libc::ENOSPC)),
            IoClass::Fatal
        );
        assert_eq!(
            classify(&io::Error::from_raw_os_error(libc::EBADF)),
            IoClass::Fatal
        );
        assert_eq!(classify(&io::Error::other("boom")), IoClass::Fatal);
    }

    #[test]
    fn test_error_display_names_operation_and_role() {
        let err = RelayError::io(
            Operation::Write,
            Role::Output("/tmp/out".to_string()),
            io::Error::from_raw_os_error(libc::ENOSPC),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("write on output '/tmp/out' failed"));

        let err = RelayError::transfer(
            Operation::Splice,
            Role::Input,
            Role::Spool,
            io::Error::from_raw_os_error(libc::EIO),
        );
        assert!(err.to_string().starts_with("splice from input to spool failed"));
        assert_eq!(err.raw_os_error(), Some(libc::EIO));
    }

    #[test]
    fn test_exit_codes() {
        let io_err = RelayError::io(Operation::Read, Role::Input, io::Error::other("x"));
        assert_eq!(io_err.exit_code(), EXIT_FATAL);
        assert_eq!(io_err.category(), ErrorCategory::IoError);
        assert_eq!(io_err.operation(), Some(Operation::Read));

        let cfg_err = RelayError::Config("bad".to_string());
        assert_eq!(cfg_err.exit_code(), EXIT_CONFIG);
        assert_eq!(cfg_err.category(), ErrorCategory::Configuration);
        assert_eq!(cfg_err.to_string(), "Configuration error: bad");
    }
}

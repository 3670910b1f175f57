use std::error;
use std::fmt;
use std::io;

/// Which device-side flag caused an instruction to be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    /// The device parser did not recognise a command byte or instruction tag.
    Parse,

    /// The device dispatcher could not execute a parsed instruction,
    /// e.g. the scanline FIFO drained mid-exposure.
    Dispatch,
}

impl fmt::Display for RejectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectKind::Parse => write!(f, "parse"),
            RejectKind::Dispatch => write!(f, "dispatch"),
        }
    }
}

/// Represents errors that can occur while driving the scanner controller.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred on the underlying bus driver.
    Io(io::Error),

    /// A field does not fit its wire representation (tick count, coefficient,
    /// half-step period or data word count). Contains a description of the field.
    EncodeOverflow { description: String },

    /// A frame sequence does not form a valid instruction according to the
    /// wire layout. Contains a description of the mismatch.
    Protocol { description: String },

    /// A re-originated coefficient does not fit the device coefficient width.
    SegmentOverflow,

    /// A segment would demand more than one motor step per two ticks.
    SegmentNyquist,

    /// The scan window is not an exact multiple of the laser half-step period.
    ScanWindowUnaligned,

    /// More bits were supplied than fit in one scanline.
    ScanOverLong,

    /// The prism did not synchronize to the photodiode within the stable window.
    ScanSyncTimeout,

    /// The device refused an instruction frame. Contains the offending flag.
    DeviceRejected { kind: RejectKind },

    /// The device kept reporting a full instruction memory after the
    /// configured number of retries.
    BackpressureExhausted,

    /// The operation was cancelled between frames.
    Cancelled,

    /// A configuration value is outside its permitted range.
    InvalidParameter { description: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::EncodeOverflow { description } => {
                write!(f, "encode overflow: {}", description)
            }
            Error::Protocol { description } => write!(f, "protocol error: {}", description),
            Error::SegmentOverflow => write!(f, "segment coefficient overflow"),
            Error::SegmentNyquist => {
                write!(f, "segment violates the Nyquist step-rate limit")
            }
            Error::ScanWindowUnaligned => {
                write!(f, "scan window is not a multiple of the half-step period")
            }
            Error::ScanOverLong => write!(f, "scanline holds more bits than bits_per_line"),
            Error::ScanSyncTimeout => write!(f, "prism failed to synchronize in time"),
            Error::DeviceRejected { kind } => {
                write!(f, "device rejected instruction: {} error", kind)
            }
            Error::BackpressureExhausted => {
                write!(f, "instruction memory stayed full past the retry budget")
            }
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::InvalidParameter { description } => {
                write!(f, "invalid parameter: {}", description)
            }
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// A specialized `Result` type for scanner controller operations.
pub type Result<T> = std::result::Result<T, Error>;

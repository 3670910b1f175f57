use byteorder::{BigEndian, ByteOrder};

/// Length of the command byte prefix of a frame.
pub const COMMAND_BYTES: usize = 1;

/// Length of the data word of a frame.
pub const WORD_BYTES: usize = 8;

/// Total length of one frame on the wire.
pub const FRAME_BYTES: usize = COMMAND_BYTES + WORD_BYTES;

/// Represents one host-to-device frame: a command byte and a 64-bit word.
///
/// Every bus transaction moves exactly one `Frame` out and one [`Reply`] in,
/// at the same clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// The command code for the frame.
    pub cmd: u8,

    /// The data word carried by the frame.
    pub word: u64,
}

impl Frame {
    /// Creates a new frame with a command code and a data word.
    #[inline]
    pub fn new(cmd: u8, word: u64) -> Frame {
        Frame { cmd, word }
    }

    /// Serializes the frame in transmission order: command byte first,
    /// then the word most-significant byte first.
    pub fn to_wire_bytes(&self) -> [u8; FRAME_BYTES] {
        let mut bytes = [0u8; FRAME_BYTES];
        bytes[0] = self.cmd;
        BigEndian::write_u64(&mut bytes[COMMAND_BYTES..], self.word);
        bytes
    }
}

/// Represents one device-to-host frame: a status byte and a 64-bit word.
///
/// The word is meaningful only for read-style commands; for writes the
/// status byte alone carries the back-pressure and error flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    /// The status flags published by the device during this exchange.
    pub status: Status,

    /// The reply word, most-significant byte received first.
    pub word: u64,
}

impl Reply {
    /// Deserializes a reply from capture order: status byte first,
    /// then the word most-significant byte first.
    pub fn from_wire_bytes(bytes: &[u8; FRAME_BYTES]) -> Reply {
        Reply {
            status: Status::from_byte(bytes[0]),
            word: BigEndian::read_u64(&bytes[COMMAND_BYTES..]),
        }
    }
}

/// The bit-packed status byte returned with every exchange.
///
/// Layout, most significant bit first:
/// `[version:4][executing:1][memory_full:1][parse_error:1][dispatch_error:1]`.
/// A value of zero means normal, memory has room, not executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status(u8);

impl Status {
    const DISPATCH_ERROR_BIT: u8 = 0;
    const PARSE_ERROR_BIT: u8 = 1;
    const MEMORY_FULL_BIT: u8 = 2;
    const EXECUTING_BIT: u8 = 3;
    const VERSION_SHIFT: u8 = 4;

    /// Wraps a raw status byte.
    #[inline]
    pub fn from_byte(byte: u8) -> Status {
        Status(byte)
    }

    /// Returns the raw status byte.
    #[inline]
    pub fn to_byte(self) -> u8 {
        self.0
    }

    fn bit(self, index: u8) -> bool {
        (self.0 >> index) & 1 == 1
    }

    /// True if the device dispatcher refused the last parsed instruction.
    pub fn dispatch_error(self) -> bool {
        self.bit(Self::DISPATCH_ERROR_BIT)
    }

    /// True if the device parser met an unknown command byte or tag.
    pub fn parse_error(self) -> bool {
        self.bit(Self::PARSE_ERROR_BIT)
    }

    /// True if the instruction memory cannot accept another `WRITE`.
    pub fn memory_full(self) -> bool {
        self.bit(Self::MEMORY_FULL_BIT)
    }

    /// True while the device is executing instructions from its memory.
    pub fn executing(self) -> bool {
        self.bit(Self::EXECUTING_BIT)
    }

    /// Gateware revision reported by the device.
    pub fn version(self) -> u8 {
        self.0 >> Self::VERSION_SHIFT
    }

    /// Returns the rejection flag raised by the device, if any.
    /// A parse error takes precedence over a dispatch error.
    pub fn reject_kind(self) -> Option<crate::base::error::RejectKind> {
        use crate::base::error::RejectKind;
        if self.parse_error() {
            Some(RejectKind::Parse)
        } else if self.dispatch_error() {
            Some(RejectKind::Dispatch)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::error::RejectKind;

    #[test]
    fn frame_wire_order() {
        let frame = Frame::new(0x04, 0x0102_0304_0506_0708);
        assert_eq!(
            frame.to_wire_bytes(),
            [0x04, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]
        );
    }

    #[test]
    fn reply_wire_order() {
        let reply = Reply::from_wire_bytes(&[0x0C, 0, 0, 0, 0, 0, 0, 0, 0x2A]);
        assert_eq!(reply.word, 0x2A);
        assert!(reply.status.memory_full());
        assert!(reply.status.executing());
        assert!(!reply.status.parse_error());
    }

    #[test]
    fn status_bit_layout() {
        let status = Status::from_byte(0b1010_0110);
        assert!(!status.dispatch_error());
        assert!(status.parse_error());
        assert!(status.memory_full());
        assert!(!status.executing());
        assert_eq!(status.version(), 0b1010);
        assert_eq!(status.reject_kind(), Some(RejectKind::Parse));

        assert_eq!(Status::from_byte(0).reject_kind(), None);
        assert_eq!(
            Status::from_byte(1).reject_kind(),
            Some(RejectKind::Dispatch)
        );
    }
}

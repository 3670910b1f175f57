use crate::base::Status;
use crate::cmds;
use crate::scan::LaserLine;
use crate::segment::MoveSegment;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Desired state of the device output pins, written with a PIN instruction.
///
/// The device applies the whole vector at once, in FIFO order relative to
/// surrounding move and scanline instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pins {
    /// Drive the polygon motor.
    pub polygon: bool,

    /// Drive laser channel 0.
    pub laser0: bool,

    /// Drive laser channel 1.
    pub laser1: bool,

    /// Track the prism with the photodiode.
    pub synchronize: bool,

    /// Expose only one facet per rotation.
    pub single_facet: bool,
}

impl Pins {
    /// Creates a pin vector with every output off.
    pub fn all_off() -> Pins {
        Pins::default()
    }

    /// Packs the pins into the wire byte.
    pub fn vector(self) -> u8 {
        let mut vector = 0;
        if self.polygon {
            vector |= cmds::PIN_POLYGON;
        }
        if self.laser0 {
            vector |= cmds::PIN_LASER0;
        }
        if self.laser1 {
            vector |= cmds::PIN_LASER1;
        }
        if self.synchronize {
            vector |= cmds::PIN_SYNCHRONIZE;
        }
        if self.single_facet {
            vector |= cmds::PIN_SINGLE_FACET;
        }
        vector
    }

    /// Unpacks the wire byte; reserved bits are ignored.
    pub fn from_vector(vector: u8) -> Pins {
        Pins {
            polygon: vector & cmds::PIN_POLYGON != 0,
            laser0: vector & cmds::PIN_LASER0 != 0,
            laser1: vector & cmds::PIN_LASER1 != 0,
            synchronize: vector & cmds::PIN_SYNCHRONIZE != 0,
            single_facet: vector & cmds::PIN_SINGLE_FACET != 0,
        }
    }
}

/// Scan direction of the laser across the substrate.
///
/// The direction selects the bit order of the scanline data words and is
/// visible to the gateware: `Forward` reads each word LSB-first, `Backward`
/// MSB-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Backward,
}

impl ScanDirection {
    /// The direction bit of the laserline header word.
    #[inline]
    pub fn bit(self) -> u64 {
        match self {
            ScanDirection::Forward => 0,
            ScanDirection::Backward => 1,
        }
    }

    /// Decodes the direction bit of a laserline header word.
    #[inline]
    pub fn from_bit(bit: u64) -> ScanDirection {
        if bit & 1 == 0 {
            ScanDirection::Forward
        } else {
            ScanDirection::Backward
        }
    }
}

/// Snapshot returned by a `READ` exchange: the status byte plus the
/// auxiliary pin inputs carried in the reply word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    /// Status flags of the exchange that produced this snapshot.
    pub status: Status,

    /// Limit-switch input per motor, in motor index order.
    pub limit_switches: Vec<bool>,

    /// True if the photodiode fired during the last prism rotation.
    pub photodiode_trigger: bool,

    /// True while the prism is tracked by the photodiode.
    pub synchronized: bool,
}

impl DeviceState {
    /// Decodes the low byte of a `READ` reply word.
    ///
    /// Bits `[0, motors)` are the limit switches, bit `motors` the
    /// photodiode trigger, bit `motors + 1` the synchronized flag.
    pub fn decode(status: Status, word: u64, motors: usize) -> DeviceState {
        let pin_byte = word as u8;
        let limit_switches = (0..motors).map(|i| (pin_byte >> i) & 1 == 1).collect();
        DeviceState {
            status,
            limit_switches,
            photodiode_trigger: (pin_byte >> motors) & 1 == 1,
            synchronized: (pin_byte >> (motors + 1)) & 1 == 1,
        }
    }
}

/// A logical operation for the device, transmitted as a fixed sequence of
/// `WRITE` frames whose count is determined by the tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// One bounded polynomial trajectory piece.
    Move(MoveSegment),

    /// A pin vector update.
    Pin(Pins),

    /// One scanline of laser modulation data.
    LaserLine(LaserLine),
}

/// Cooperative cancellation flag shared between a session and its caller.
///
/// Setting the flag makes an in-flight instruction abort after the frame
/// currently on the wire completes; no partial frame is ever transmitted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, unsignalled token.
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// Requests cancellation of the session operations polling this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clears the flag so the session can be used again.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// True once `cancel` has been called and not yet cleared.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// Command bytes

/// Command code to read back one motor position per exchange.
/// The reply word is the signed step count of the next motor in index order.
pub const COMMAND_POSITION: u8 = 0x01;

/// Command code to read the status byte together with the auxiliary pin
/// snapshot (limit switches, photodiode trigger, synchronized flag).
pub const COMMAND_READ: u8 = 0x02;

/// Command code to start executing instructions from the device memory.
pub const COMMAND_START: u8 = 0x03;

/// Command code to push one instruction word into the device memory.
/// Discarded by the device while its memory is full.
pub const COMMAND_WRITE: u8 = 0x04;

/// Command code to stop executing instructions.
pub const COMMAND_STOP: u8 = 0x05;

// Instruction tags, carried in the highest byte of the first WRITE word.
// The tag determines how many WRITE frames the instruction spans.

/// Tag of a polynomial move segment: 7-byte tick count in the first word,
/// then three signed 64-bit coefficients per motor, one frame each.
pub const INSTRUCTION_MOVE: u8 = 0x01;

/// Tag of a pin update: the low byte of the first word is the pin vector.
pub const INSTRUCTION_PIN: u8 = 0x02;

/// Tag of a scanline: direction bit and 55-bit half-step period in the
/// first word, then `words_per_line` data words, one frame each.
pub const INSTRUCTION_LASERLINE: u8 = 0x03;

// Pin vector bits (low byte of a PIN instruction word)

/// Enables the polygon motor.
pub const PIN_POLYGON: u8 = 1 << 0;

/// Enables laser channel 0.
pub const PIN_LASER0: u8 = 1 << 1;

/// Enables laser channel 1.
pub const PIN_LASER1: u8 = 1 << 2;

/// Enables photodiode synchronization of the prism.
pub const PIN_SYNCHRONIZE: u8 = 1 << 3;

/// Gates exposure to a single facet per rotation.
pub const PIN_SINGLE_FACET: u8 = 1 << 4;

// Wire limits

/// Width of the tick-count field of a MOVE instruction, in bytes.
pub const TICK_FIELD_BYTES: u32 = 7;

/// Width of the half-step period field of a LASERLINE instruction, in bits.
pub const HALF_STEP_FIELD_BITS: u32 = 55;

/// Largest tick count that fits the 7-byte field.
pub const MAX_TICK_FIELD: u64 = (1 << (TICK_FIELD_BYTES * 8)) - 1;

/// Largest half-step period that fits next to the direction bit.
pub const MAX_HALF_STEP_FIELD: u64 = (1 << HALF_STEP_FIELD_BITS) - 1;

// Defaults of the parameter model

/// Default motor sample clock in Hz.
pub const DEFAULT_MOTOR_HZ: u64 = 1_000_000;

/// Default maximum length of one move segment, in motor ticks.
pub const DEFAULT_MOVE_TICKS: u64 = 10_000;

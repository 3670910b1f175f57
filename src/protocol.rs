use crate::base::{Error, Frame, Reply, Result, FRAME_BYTES};
use crate::cmds;
use crate::params::ParameterModel;
use crate::scan::LaserLine;
use crate::segment::MoveSegment;
use crate::types::{Instruction, Pins, ScanDirection};
use log::trace;

fn overflow(description: &str) -> Error {
    Error::EncodeOverflow {
        description: description.to_owned(),
    }
}

fn malformed(description: String) -> Error {
    Error::Protocol { description }
}

/// Serializes one command frame in transmission order: command byte first,
/// then the word most-significant byte first.
pub fn encode_command(cmd: u8, word: u64) -> [u8; FRAME_BYTES] {
    Frame::new(cmd, word).to_wire_bytes()
}

/// Deserializes one reply frame: status byte first, then the word
/// most-significant byte first.
pub fn decode_reply(bytes: &[u8; FRAME_BYTES]) -> Reply {
    Reply::from_wire_bytes(bytes)
}

/// Encodes a move segment as the frame sequence the device parser consumes:
/// tag and 7-byte tick count, then `motors × 3` coefficient frames.
pub fn encode_move(model: &ParameterModel, segment: &MoveSegment) -> Result<Vec<Frame>> {
    if segment.ticks > model.ticks_move() {
        return Err(overflow("tick count exceeds the move segment limit"));
    }
    if segment.coefficients.len() != model.motors() {
        return Err(overflow("coefficient rows do not match the motor count"));
    }

    let mut frames = Vec::with_capacity(1 + 3 * model.motors());
    let header = (cmds::INSTRUCTION_MOVE as u64) << 56 | segment.ticks;
    frames.push(Frame::new(cmds::COMMAND_WRITE, header));
    for coefs in &segment.coefficients {
        for &coef in coefs {
            frames.push(Frame::new(cmds::COMMAND_WRITE, coef as u64));
        }
    }
    Ok(frames)
}

/// Encodes a pin update. A single frame: tag in the high byte, the pin
/// vector in the low byte of the 7-byte remainder.
pub fn encode_pin(pins: Pins) -> Frame {
    let word = (cmds::INSTRUCTION_PIN as u64) << 56 | pins.vector() as u64;
    Frame::new(cmds::COMMAND_WRITE, word)
}

/// Encodes a scanline: tag, direction bit and 55-bit half-step period in the
/// header word, then exactly `words_per_line` data frames.
pub fn encode_laserline(model: &ParameterModel, line: &LaserLine) -> Result<Vec<Frame>> {
    if line.ticks_per_half_step > cmds::MAX_HALF_STEP_FIELD {
        return Err(overflow("half-step period does not fit 55 bits"));
    }
    if line.words.len() != model.words_per_line() {
        return Err(overflow("data word count does not match words_per_line"));
    }

    let mut frames = Vec::with_capacity(1 + line.words.len());
    let header = (cmds::INSTRUCTION_LASERLINE as u64) << 56
        | line.direction.bit() << cmds::HALF_STEP_FIELD_BITS
        | line.ticks_per_half_step;
    frames.push(Frame::new(cmds::COMMAND_WRITE, header));
    for &word in &line.words {
        frames.push(Frame::new(cmds::COMMAND_WRITE, word));
    }
    Ok(frames)
}

/// Encodes any instruction into the exact frame sequence for the device.
pub fn encode_instruction(model: &ParameterModel, instruction: &Instruction) -> Result<Vec<Frame>> {
    let frames = match instruction {
        Instruction::Move(segment) => encode_move(model, segment)?,
        Instruction::Pin(pins) => vec![encode_pin(*pins)],
        Instruction::LaserLine(line) => encode_laserline(model, line)?,
    };
    trace!("encoded instruction into {} frames", frames.len());
    Ok(frames)
}

/// Decodes a frame sequence back into the instruction it encodes.
///
/// The inverse of [`encode_instruction`]; every frame must be a `WRITE` and
/// the frame count must match what the tag demands.
pub fn decode_instruction(model: &ParameterModel, frames: &[Frame]) -> Result<Instruction> {
    let header = frames
        .first()
        .ok_or_else(|| malformed("empty frame sequence".to_owned()))?;
    for frame in frames {
        if frame.cmd != cmds::COMMAND_WRITE {
            return Err(malformed(format!(
                "instruction frame carries command {:02X}, expected WRITE",
                frame.cmd
            )));
        }
    }

    let tag = (header.word >> 56) as u8;
    match tag {
        cmds::INSTRUCTION_MOVE => {
            let expected = 1 + 3 * model.motors();
            if frames.len() != expected {
                return Err(malformed(format!(
                    "move instruction needs {} frames, got {}",
                    expected,
                    frames.len()
                )));
            }
            let ticks = header.word & cmds::MAX_TICK_FIELD;
            let coefficients = frames[1..]
                .chunks(3)
                .map(|chunk| [chunk[0].word as i64, chunk[1].word as i64, chunk[2].word as i64])
                .collect();
            Ok(Instruction::Move(MoveSegment {
                ticks,
                coefficients,
            }))
        }
        cmds::INSTRUCTION_PIN => {
            if frames.len() != 1 {
                return Err(malformed(format!(
                    "pin instruction is a single frame, got {}",
                    frames.len()
                )));
            }
            Ok(Instruction::Pin(Pins::from_vector(header.word as u8)))
        }
        cmds::INSTRUCTION_LASERLINE => {
            let expected = 1 + model.words_per_line();
            if frames.len() != expected {
                return Err(malformed(format!(
                    "laserline instruction needs {} frames, got {}",
                    expected,
                    frames.len()
                )));
            }
            Ok(Instruction::LaserLine(LaserLine {
                direction: ScanDirection::from_bit(
                    header.word >> cmds::HALF_STEP_FIELD_BITS,
                ),
                ticks_per_half_step: header.word & cmds::MAX_HALF_STEP_FIELD,
                words: frames[1..].iter().map(|f| f.word).collect(),
            }))
        }
        _ => Err(malformed(format!("unknown instruction tag {:02X}", tag))),
    }
}

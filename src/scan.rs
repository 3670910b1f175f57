use crate::base::{Error, Result};
use crate::params::ParameterModel;
use crate::types::ScanDirection;
use log::trace;

/// One scanline of laser modulation data, ready for framing.
///
/// The device clocks one bit out per half-step period while the facet sweeps
/// the laser window; `words` holds exactly `words_per_line` 64-bit words in
/// the bit order selected by `direction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaserLine {
    /// Scan direction, fixing the in-word bit order.
    pub direction: ScanDirection,

    /// Motor ticks per scanline bit.
    pub ticks_per_half_step: u64,

    /// Packed laser on/off data, `words_per_line` words.
    pub words: Vec<u64>,
}

/// Packs laser on/off bits into the data words of one scanline.
///
/// `Forward` fills each word LSB-first, `Backward` MSB-first; the gateware
/// reads the words in the matching order while sweeping the facet. A short
/// `bits` slice is padded with zeros (laser off) at the tail of the bit
/// order; more than `bits_per_line` bits is `Error::ScanOverLong`.
pub fn pack_bits(model: &ParameterModel, bits: &[bool]) -> Result<Vec<u64>> {
    if bits.len() > model.bits_per_line() {
        return Err(Error::ScanOverLong);
    }

    let mut words = vec![0u64; model.words_per_line()];
    for (index, &on) in bits.iter().enumerate() {
        if !on {
            continue;
        }
        let position = match model.direction() {
            ScanDirection::Forward => index % 64,
            ScanDirection::Backward => 63 - index % 64,
        };
        words[index / 64] |= 1 << position;
    }
    trace!(
        "packed {} bits into {} words ({} padded)",
        bits.len(),
        words.len(),
        model.bits_per_line() - bits.len()
    );
    Ok(words)
}

/// Builds a complete laserline payload from a bit pattern, using the
/// direction and half-step period of the parameter model.
pub fn laserline(model: &ParameterModel, bits: &[bool]) -> Result<LaserLine> {
    Ok(LaserLine {
        direction: model.direction(),
        ticks_per_half_step: model.ticks_per_half_step(),
        words: pack_bits(model, bits)?,
    })
}

use crate::base::{Error, Result};
use crate::params::ParameterModel;
use log::trace;

/// One bounded piece of a polynomial trajectory.
///
/// The device evaluates `c0·t + c1·t² + c2·t³` per motor for
/// `0 ≤ t < ticks` and accumulates the resulting steps, so concatenated
/// segments reproduce the original trajectory exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveSegment {
    /// Duration of the segment in motor ticks.
    pub ticks: u64,

    /// `[c0, c1, c2]` per motor, in motor index order.
    pub coefficients: Vec<[i64; 3]>,
}

/// Splits a trajectory of `total_ticks` ticks into segments no longer than
/// the model's `ticks_move`.
///
/// Every full segment spans `ticks_move` ticks; a final remainder segment
/// covers what is left. Each segment's coefficients are re-originated to its
/// own start so the device can evaluate from a zeroed counter:
///
/// `c0' = c0 + 2·c1·τ + 3·c2·τ²`, `c1' = c1 + 3·c2·τ`, `c2' = c2`
///
/// at cumulative offset `τ`. All arithmetic is exact signed-integer; a
/// coefficient that no longer fits the 64-bit device width is
/// `Error::SegmentOverflow`. Each segment is also checked against the
/// Nyquist step-rate limit before anything is returned, so a rejected
/// trajectory never reaches the wire.
pub fn segmentize(
    model: &ParameterModel,
    total_ticks: u64,
    coefficients: &[[i64; 3]],
) -> Result<Vec<MoveSegment>> {
    if coefficients.len() != model.motors() {
        return Err(Error::InvalidParameter {
            description: format!(
                "expected coefficients for {} motors, got {}",
                model.motors(),
                coefficients.len()
            ),
        });
    }

    let limit = model.ticks_move();
    let threshold = (model.f_motor() / 2) as i128;
    let mut segments = Vec::with_capacity((total_ticks / limit) as usize + 1);
    let mut offset: u64 = 0;

    while offset < total_ticks {
        let ticks = (total_ticks - offset).min(limit);
        let mut shifted = Vec::with_capacity(coefficients.len());
        for coefs in coefficients {
            let shifted_coefs = reoriginate(coefs, offset)?;
            check_nyquist(&shifted_coefs, ticks, threshold)?;
            shifted.push(shifted_coefs);
        }
        segments.push(MoveSegment {
            ticks,
            coefficients: shifted,
        });
        offset += ticks;
    }

    trace!(
        "segmentized {} ticks into {} segments",
        total_ticks,
        segments.len()
    );
    Ok(segments)
}

/// Shifts the origin of a cubic to offset `tau`.
fn reoriginate(coefs: &[i64; 3], tau: u64) -> Result<[i64; 3]> {
    let [c0, c1, c2] = [coefs[0] as i128, coefs[1] as i128, coefs[2] as i128];
    let tau = tau as i128;

    let shift = |value: Option<i128>| -> Result<i64> {
        value
            .and_then(|v| i64::try_from(v).ok())
            .ok_or(Error::SegmentOverflow)
    };

    // c0' = c0 + 2·c1·τ + 3·c2·τ²
    let c0_shifted = shift(
        (2 * c1)
            .checked_mul(tau)
            .and_then(|v| v.checked_add(c0))
            .and_then(|v| {
                (3 * c2)
                    .checked_mul(tau)
                    .and_then(|w| w.checked_mul(tau))
                    .and_then(|w| v.checked_add(w))
            }),
    )?;
    // c1' = c1 + 3·c2·τ
    let c1_shifted = shift((3 * c2).checked_mul(tau).and_then(|v| v.checked_add(c1)))?;

    Ok([c0_shifted, c1_shifted, coefs[2]])
}

/// Step rate `v(t) = c0 + 2·c1·t + 3·c2·t²`.
///
/// `None` means the value left the 128-bit range, which can only happen far
/// beyond any admissible rate.
fn step_rate(coefs: &[i64; 3], t: i128) -> Option<i128> {
    let [c0, c1, c2] = [coefs[0] as i128, coefs[1] as i128, coefs[2] as i128];
    (2 * c1)
        .checked_mul(t)
        .and_then(|v| v.checked_add(c0))
        .and_then(|v| {
            (3 * c2)
                .checked_mul(t)
                .and_then(|w| w.checked_mul(t))
                .and_then(|w| v.checked_add(w))
        })
}

/// Bounds |v(t)| analytically over the integer ticks `0 ≤ t < ticks` and
/// rejects the segment if the bound exceeds `f_motor / 2`.
///
/// The maximum of a quadratic over an interval sits at an endpoint or at the
/// interior stationary point `t* = -c1 / (3·c2)`; the stationary value is
/// compared exactly as the rational `(3·c2·c0 − c1²) / (3·c2)`.
fn check_nyquist(coefs: &[i64; 3], ticks: u64, threshold: i128) -> Result<()> {
    let last = (ticks - 1) as i128;

    for t in [0, last] {
        let rate = step_rate(coefs, t).ok_or(Error::SegmentNyquist)?;
        if rate.abs() > threshold {
            return Err(Error::SegmentNyquist);
        }
    }

    let [c0, c1, c2] = [coefs[0] as i128, coefs[1] as i128, coefs[2] as i128];
    if c2 != 0 {
        // t* = numerator / denominator, interior iff 0 < t* < last.
        let numerator = -c1;
        let denominator = 3 * c2;
        let interior = numerator != 0
            && (numerator > 0) == (denominator > 0)
            && numerator.abs() < last.checked_mul(denominator.abs()).unwrap_or(i128::MAX);
        if interior {
            // v(t*) = (3·c2·c0 − c1²) / (3·c2), compared without division.
            let stationary = denominator
                .checked_mul(c0)
                .and_then(|v| c1.checked_mul(c1).and_then(|w| v.checked_sub(w)))
                .ok_or(Error::SegmentNyquist)?;
            let bound = threshold
                .checked_mul(denominator.abs())
                .ok_or(Error::SegmentNyquist)?;
            if stationary.abs() > bound {
                return Err(Error::SegmentNyquist);
            }
        }
    }

    Ok(())
}

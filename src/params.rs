use crate::base::{Error, Result};
use crate::cmds;
use crate::types::ScanDirection;
use log::trace;

/// Operational parameters of one scanner session.
///
/// Plain input values; validation and the derived scan geometry live in
/// [`ParameterModel`]. The defaults carry the production values of the
/// reference head: a 2400 rpm four-facet prism, a 200 kHz laser clock and a
/// 1 MHz motor clock.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    /// Polygon rotation speed in revolutions per minute.
    pub rpm: f64,

    /// Fraction of the facet sweep at which the laser window opens.
    pub start_frac: f64,

    /// Fraction of the facet sweep at which the laser window closes.
    pub end_frac: f64,

    /// Seconds to wait for the polygon motor to spin up.
    pub spinup_s: f64,

    /// Seconds the photodiode may take to report a stable prism.
    pub stable_s: f64,

    /// Number of reflective facets on the polygon.
    pub facets: u32,

    /// Scan direction, fixing the bit order of scanline words.
    pub direction: ScanDirection,

    /// Repeat one fixed pattern instead of streaming fresh lines.
    pub single_line: bool,

    /// Expose only one facet per rotation.
    pub single_facet: bool,

    /// Motor sample clock in Hz.
    pub f_motor: u64,

    /// Laser modulation clock in Hz; fixes the ticks per half step.
    pub laser_hz: f64,

    /// Maximum length of one move segment in motor ticks.
    pub ticks_move: u64,

    /// Number of stepper motors driven by the device.
    pub motors: usize,
}

impl Default for Parameters {
    fn default() -> Parameters {
        Parameters {
            rpm: 2400.0,
            start_frac: 0.35,
            end_frac: 0.85,
            spinup_s: 1.5,
            stable_s: 1.125,
            facets: 4,
            direction: ScanDirection::Forward,
            single_line: false,
            single_facet: false,
            f_motor: cmds::DEFAULT_MOTOR_HZ,
            laser_hz: 200_000.0,
            ticks_move: cmds::DEFAULT_MOVE_TICKS,
            motors: 3,
        }
    }
}

/// Validated, immutable snapshot of the session parameters with the derived
/// scan geometry cached.
///
/// Built once per session; every other component reads it and none mutates
/// it. Construction fails with `Error::InvalidParameter` for out-of-range
/// values and `Error::ScanWindowUnaligned` when the laser window does not
/// divide into whole half-step periods.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterModel {
    params: Parameters,
    ticks_per_facet: u64,
    window_ticks: u64,
    ticks_per_half_step: u64,
    bits_per_line: usize,
    words_per_line: usize,
}

fn invalid(description: &str) -> Error {
    Error::InvalidParameter {
        description: description.to_owned(),
    }
}

impl ParameterModel {
    /// Validates the parameters and caches the derived geometry.
    pub fn new(params: Parameters) -> Result<ParameterModel> {
        if !(params.rpm.is_finite() && params.rpm > 0.0) {
            return Err(invalid("rpm must be positive"));
        }
        if !(params.start_frac.is_finite() && params.end_frac.is_finite()) {
            return Err(invalid("window fractions must be finite"));
        }
        if !(0.0 < params.start_frac
            && params.start_frac < params.end_frac
            && params.end_frac < 1.0)
        {
            return Err(invalid("window fractions must satisfy 0 < start < end < 1"));
        }
        if !(params.spinup_s.is_finite() && params.spinup_s >= 0.0) {
            return Err(invalid("spinup_s must be non-negative"));
        }
        if !(params.stable_s.is_finite() && params.stable_s >= 0.0) {
            return Err(invalid("stable_s must be non-negative"));
        }
        if params.facets < 1 {
            return Err(invalid("at least one facet is required"));
        }
        if params.motors < 1 {
            return Err(invalid("at least one motor is required"));
        }
        // The pin snapshot byte must hold the switches plus two flags.
        if params.motors > 6 {
            return Err(invalid("at most six motors fit the pin snapshot"));
        }
        if params.f_motor == 0 {
            return Err(invalid("f_motor must be positive"));
        }
        if !(params.laser_hz.is_finite() && params.laser_hz > 0.0) {
            return Err(invalid("laser_hz must be positive"));
        }
        if params.ticks_move == 0 || params.ticks_move > cmds::MAX_TICK_FIELD {
            return Err(invalid("ticks_move must fit the 7-byte tick field"));
        }

        let ticks_per_facet = (params.f_motor as f64 * 60.0
            / (params.rpm * params.facets as f64))
            .round() as u64;
        if ticks_per_facet == 0 {
            return Err(invalid("rotor outruns the motor clock"));
        }

        let ticks_per_half_step = (params.f_motor as f64 / params.laser_hz) as u64;
        if ticks_per_half_step == 0 {
            return Err(invalid("laser_hz exceeds the motor clock"));
        }
        if ticks_per_half_step > cmds::MAX_HALF_STEP_FIELD {
            return Err(invalid("half-step period does not fit 55 bits"));
        }

        let window_ticks = ((params.end_frac - params.start_frac) * ticks_per_facet as f64)
            .round() as u64;
        if window_ticks == 0 {
            return Err(invalid("laser window spans no ticks"));
        }
        if window_ticks % ticks_per_half_step != 0 {
            return Err(Error::ScanWindowUnaligned);
        }
        let bits_per_line = (window_ticks / ticks_per_half_step) as usize;
        let words_per_line = bits_per_line.div_ceil(64);

        trace!(
            "derived geometry: ticks_per_facet={}, window_ticks={}, \
             ticks_per_half_step={}, bits_per_line={}, words_per_line={}",
            ticks_per_facet,
            window_ticks,
            ticks_per_half_step,
            bits_per_line,
            words_per_line
        );

        Ok(ParameterModel {
            params,
            ticks_per_facet,
            window_ticks,
            ticks_per_half_step,
            bits_per_line,
            words_per_line,
        })
    }

    /// The raw parameters this model was built from.
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Motor sample clock in Hz.
    pub fn f_motor(&self) -> u64 {
        self.params.f_motor
    }

    /// Maximum length of one move segment in motor ticks.
    pub fn ticks_move(&self) -> u64 {
        self.params.ticks_move
    }

    /// Number of stepper motors.
    pub fn motors(&self) -> usize {
        self.params.motors
    }

    /// Scan direction.
    pub fn direction(&self) -> ScanDirection {
        self.params.direction
    }

    /// True when one fixed pattern is repeated by the device.
    pub fn single_line(&self) -> bool {
        self.params.single_line
    }

    /// True when exposure is gated to a single facet.
    pub fn single_facet(&self) -> bool {
        self.params.single_facet
    }

    /// Seconds to wait for the polygon motor to spin up.
    pub fn spinup_s(&self) -> f64 {
        self.params.spinup_s
    }

    /// Seconds the photodiode may take to report a stable prism.
    pub fn stable_s(&self) -> f64 {
        self.params.stable_s
    }

    /// Motor ticks per facet sweep.
    pub fn ticks_per_facet(&self) -> u64 {
        self.ticks_per_facet
    }

    /// Motor ticks inside the laser-on window of one facet.
    pub fn window_ticks(&self) -> u64 {
        self.window_ticks
    }

    /// Motor ticks per scanline bit.
    pub fn ticks_per_half_step(&self) -> u64 {
        self.ticks_per_half_step
    }

    /// Laser bits exposed per scanline.
    pub fn bits_per_line(&self) -> usize {
        self.bits_per_line
    }

    /// 64-bit data words per laserline instruction.
    pub fn words_per_line(&self) -> usize {
        self.words_per_line
    }
}

//! # Orientation Estimation Module
//!
//! Fuses IMU samples into roll and pitch using one Kalman filter per axis, and derives the compass
//! heading from the magnetometer.
//!
//! Tilt is measured from the accelerometer's gravity vector and is only valid while the platform
//! is near static.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod compass;
pub mod kalman;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use serde::{Serialize, Deserialize};

use util::{maths::is_finite_positive, module::State};

use crate::sens_driver::SensorSample;
pub use compass::Heading;
pub use kalman::{KalmanFilter, KalmanTunings};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct OrientEst {
    roll_filter: KalmanFilter,
    pitch_filter: KalmanFilter,
}

/// Parameters of the estimator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub roll: KalmanTunings,
    pub pitch: KalmanTunings,
}

#[derive(Debug, Clone, Copy)]
pub struct InputData {
    pub sample: SensorSample,

    /// Time since the previous update in seconds
    pub dt_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Orientation {
    pub roll_deg: f64,
    pub pitch_deg: f64,

    /// `None` if the magnetometer gave no usable data this cycle
    pub heading: Option<Heading>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatusReport {
    /// The sample had magnetometer data
    pub mag_present: bool,

    /// The magnetometer data gave a heading
    pub heading_valid: bool,

    /// The pitch estimate was beyond 90 degrees so the roll rate was inverted
    pub roll_rate_inverted: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum OrientEstError {
    #[error("Magnetometer sample is zero in both horizontal axes, heading is undefined")]
    InvalidSample,

    #[error("Invalid time step: {0} s")]
    InvalidTimeStep(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl State for OrientEst {
    type InitData = Params;
    type InitError = OrientEstError;

    type InputData = InputData;
    type OutputData = Orientation;
    type StatusReport = StatusReport;
    type ProcError = OrientEstError;

    fn init(&mut self, init_data: Self::InitData) -> Result<(), Self::InitError> {
        self.roll_filter = KalmanFilter::new(init_data.roll);
        self.pitch_filter = KalmanFilter::new(init_data.pitch);

        Ok(())
    }

    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    {
        let dt = input_data.dt_s;
        if !is_finite_positive(dt) {
            return Err(OrientEstError::InvalidTimeStep(dt))
        }

        let mut report = StatusReport::default();
        let sample = &input_data.sample;

        let (roll, pitch) = accel_tilt_deg(sample);

        // Rates in rad/s, the filters' rate unit
        let mut roll_rate = sample.gyro_dps.x.to_radians();
        let pitch_rate = sample.gyro_dps.y.to_radians();

        if !self.pitch_filter.is_initialised() {
            self.pitch_filter.set_angle(pitch);
        }
        if !self.roll_filter.is_initialised() {
            self.roll_filter.set_angle(roll);
        }

        // Accelerometer tilt is only single valued within +/- 90 deg, invert the roll rate to
        // match the restricted measurement
        let kal_pitch = self.pitch_filter.get_angle(pitch, pitch_rate, dt);
        if kal_pitch.abs() > 90.0 {
            roll_rate = -roll_rate;
            report.roll_rate_inverted = true;
        }
        let kal_roll = self.roll_filter.get_angle(roll, roll_rate, dt);

        let heading = match sample.mag_ut {
            Some(mag) => {
                report.mag_present = true;
                match compass::heading(mag.x, mag.y) {
                    Ok(h) => {
                        report.heading_valid = true;
                        Some(h)
                    },
                    Err(e) => {
                        trace!("No heading this cycle: {}", e);
                        None
                    }
                }
            },
            None => None
        };

        trace!(
            "OrientEst: accel roll {:.3}, pitch {:.3}, kalman roll {:.3}, pitch {:.3}",
            roll, pitch, kal_roll, kal_pitch
        );

        Ok((
            Orientation {
                roll_deg: kal_roll,
                pitch_deg: kal_pitch,
                heading,
            },
            report
        ))
    }
}

impl OrientEst {
    pub fn roll_filter(&self) -> &KalmanFilter {
        &self.roll_filter
    }

    pub fn pitch_filter(&self) -> &KalmanFilter {
        &self.pitch_filter
    }

    pub fn roll_filter_mut(&mut self) -> &mut KalmanFilter {
        &mut self.roll_filter
    }

    pub fn pitch_filter_mut(&mut self) -> &mut KalmanFilter {
        &mut self.pitch_filter
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Roll and pitch in degrees from the accelerometer's gravity vector.
pub fn accel_tilt_deg(sample: &SensorSample) -> (f64, f64) {
    let a = &sample.accel_g;

    let roll = (a.y / (a.x * a.x + a.z * a.z).sqrt()).atan().to_degrees();
    let pitch = (-a.x).atan2(a.z).to_degrees();

    (roll, pitch)
}

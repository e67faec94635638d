//! # Two state angle Kalman filter
//!
//! Fuses a rate measurement with an absolute angle measurement. The state is `[angle, bias]`
//! where `bias` is the rate sensor's drift. The state transition over `dt` is
//!
//! ```text
//! angle' = angle + dt * (rate - bias)
//! bias'  = bias
//! ```
//!
//! and only the angle is measured.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Matrix1x2, Matrix2, RowVector2, Vector2};
use serde::{Serialize, Deserialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Noise tunings of the filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KalmanTunings {
    /// Process noise variance of the angle
    pub q_angle: f64,

    /// Process noise variance of the bias
    pub q_bias: f64,

    /// Measurement noise variance
    pub r_measure: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KalmanFilter {
    tunings: KalmanTunings,

    /// State, `[angle, bias]`
    x: Vector2<f64>,

    /// Error covariance
    p: Matrix2<f64>,

    /// Unbiased rate computed in the last predict
    rate: f64,

    /// True once the filter has an angle, either seeded or from an update
    initialised: bool,

    /// Set by `set_angle`, the next update skips the predict step
    seeded: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for KalmanTunings {
    fn default() -> Self {
        Self {
            q_angle: 0.001,
            q_bias: 0.003,
            r_measure: 0.03,
        }
    }
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new(KalmanTunings::default())
    }
}

impl KalmanFilter {
    pub fn new(tunings: KalmanTunings) -> Self {
        Self {
            tunings,
            x: Vector2::zeros(),
            p: Matrix2::zeros(),
            rate: 0.0,
            initialised: false,
            seeded: false,
        }
    }

    /// Run one predict/correct cycle and return the new angle estimate.
    ///
    /// # Inputs
    /// - `new_angle`: the measured angle
    /// - `new_rate`: the measured rate
    /// - `dt`: time since the last update
    pub fn get_angle(&mut self, new_angle: f64, new_rate: f64, dt: f64) -> f64 {
        if self.seeded {
            self.seeded = false;
            self.rate = new_rate - self.x[1];
        }
        else {
            self.predict(new_rate, dt);
        }

        self.correct(new_angle);
        self.initialised = true;

        self.x[0]
    }

    /// Seed the filter with an angle. The following update corrects from this angle without
    /// first integrating the rate.
    pub fn set_angle(&mut self, angle: f64) {
        self.x[0] = angle;
        self.initialised = true;
        self.seeded = true;
    }

    /// True once the filter holds an angle estimate.
    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    pub fn angle(&self) -> f64 {
        self.x[0]
    }

    pub fn bias(&self) -> f64 {
        self.x[1]
    }

    /// Unbiased rate used in the last update.
    pub fn get_rate(&self) -> f64 {
        self.rate
    }

    pub fn covariance(&self) -> &Matrix2<f64> {
        &self.p
    }

    pub fn get_q_angle(&self) -> f64 {
        self.tunings.q_angle
    }

    pub fn get_q_bias(&self) -> f64 {
        self.tunings.q_bias
    }

    pub fn get_r_measure(&self) -> f64 {
        self.tunings.r_measure
    }

    pub fn set_q_angle(&mut self, value: f64) {
        self.tunings.q_angle = value;
    }

    pub fn set_q_bias(&mut self, value: f64) {
        self.tunings.q_bias = value;
    }

    pub fn set_r_measure(&mut self, value: f64) {
        self.tunings.r_measure = value;
    }

    pub fn tunings(&self) -> KalmanTunings {
        self.tunings
    }

    fn predict(&mut self, new_rate: f64, dt: f64) {
        self.rate = new_rate - self.x[1];
        self.x[0] += dt * self.rate;

        let f = Matrix2::new(
            1.0, -dt,
            0.0, 1.0
        );
        let q = Matrix2::new(
            self.tunings.q_angle * dt, 0.0,
            0.0, self.tunings.q_bias * dt
        );

        self.p = f * self.p * f.transpose() + q;
    }

    fn correct(&mut self, new_angle: f64) {
        let h: Matrix1x2<f64> = RowVector2::new(1.0, 0.0);

        // Innovation and its variance
        let y = new_angle - self.x[0];
        let s = self.p[(0, 0)] + self.tunings.r_measure;

        let k = self.p * h.transpose() / s;

        self.x += k * y;
        self.p -= k * h * self.p;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tunings() {
        let mut kf = KalmanFilter::default();
        assert_eq!(kf.get_q_angle(), 0.001);
        assert_eq!(kf.get_q_bias(), 0.003);
        assert_eq!(kf.get_r_measure(), 0.03);

        kf.set_q_angle(0.01);
        kf.set_q_bias(0.02);
        kf.set_r_measure(0.5);
        assert_eq!(kf.tunings(), KalmanTunings { q_angle: 0.01, q_bias: 0.02, r_measure: 0.5 });
    }

    #[test]
    fn test_convergence() {
        let mut kf = KalmanFilter::default();
        let truth = 30.0;

        let mut angle = 0.0;
        let mut iters = None;
        for i in 0..2000 {
            angle = kf.get_angle(truth, 0.0, 0.01);

            // The bias state allows some overshoot but never divergence
            assert!(angle.abs() <= 2.0 * truth, "diverged to {} at {}", angle, i);
            if iters.is_none() && (angle - truth).abs() < 0.01 {
                iters = Some(i);
            }
        }

        assert!(iters.map(|i| i < 1000).unwrap_or(false));
        assert!((angle - truth).abs() < 1e-3);
        assert!(kf.bias().abs() < 1e-3);
    }

    #[test]
    fn test_matches_scalar_form() {
        // Reference scalar implementation of the same filter
        let (qa, qb, r) = (0.001, 0.003, 0.03);
        let mut angle = 0.0;
        let mut bias = 0.0;
        let mut p = [[0.0f64; 2]; 2];

        let mut kf = KalmanFilter::default();

        let inputs = [(5.0, 1.0, 0.1), (6.0, 0.5, 0.1), (4.0, -2.0, 0.05), (4.5, 0.0, 0.2)];
        for (meas, rate_in, dt) in inputs.iter() {
            let rate = rate_in - bias;
            angle += dt * rate;
            p[0][0] += dt * (dt * p[1][1] - p[0][1] - p[1][0] + qa);
            p[0][1] -= dt * p[1][1];
            p[1][0] -= dt * p[1][1];
            p[1][1] += qb * dt;
            let s = p[0][0] + r;
            let k = [p[0][0] / s, p[1][0] / s];
            let y = meas - angle;
            angle += k[0] * y;
            bias += k[1] * y;
            let (p00, p01) = (p[0][0], p[0][1]);
            p[0][0] -= k[0] * p00;
            p[0][1] -= k[0] * p01;
            p[1][0] -= k[1] * p00;
            p[1][1] -= k[1] * p01;

            let est = kf.get_angle(*meas, *rate_in, *dt);
            assert!((est - angle).abs() < 1e-12);
            assert!((kf.bias() - bias).abs() < 1e-12);
            assert!((kf.get_rate() - rate).abs() < 1e-12);
        }
    }

    #[test]
    fn test_seeded_skips_predict() {
        let mut kf = KalmanFilter::default();
        assert!(!kf.is_initialised());

        kf.set_angle(10.0);
        assert!(kf.is_initialised());

        // A large rate must not move the angle on the first update
        let angle = kf.get_angle(10.0, 100.0, 1.0);
        assert_eq!(angle, 10.0);
        assert_eq!(kf.get_rate(), 100.0);

        // But does on the next one
        let angle = kf.get_angle(10.0, 100.0, 1.0);
        assert!(angle > 10.0);
    }
}

//! # Sampler
//!
//! Fixed period loop which reads the sensors, runs orientation estimation and collects host
//! statistics, forwarding the results to the hub as telemetry. Runs on its own thread as the
//! drivers block on the bus.
//!
//! A sensor that fails is skipped for that cycle, the last published value stays in the state.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc
};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use util::{module::State, time::seconds_to_period_or};

use crate::{
    host_stats::HostStats,
    hub::{HubHandle, TelemetryUpdate},
    orient_est::{self, OrientEst},
    sens_driver::{Imu, PowerMonitor, SensorError}
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const MIN_SAMPLE_PERIOD: Duration = Duration::from_millis(1);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Sampler {
    power: Option<Box<dyn PowerMonitor + Send>>,
    imu: Option<Box<dyn Imu + Send>>,
    orient_est: OrientEst,
    host_stats: Box<dyn HostStats + Send>,

    period: Duration,
    cycles_per_second: u64,
    num_cycles: u64,

    /// Time of the last IMU sample passed to the estimator
    last_imu_instant: Option<Instant>,

    /// Time step given to the estimator on the last IMU update
    last_imu_dt_s: Option<f64>,

    power_fault: bool,
    imu_fault: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Sampler {
    /// Create a new sampler. Sensors which failed to start are passed as `None`.
    pub fn new(
        power: Option<Box<dyn PowerMonitor + Send>>,
        imu: Option<Box<dyn Imu + Send>>,
        orient_est: OrientEst,
        host_stats: Box<dyn HostStats + Send>,
        sample_period_s: f64
    ) -> Self {
        let period = seconds_to_period_or(sample_period_s, MIN_SAMPLE_PERIOD);
        let cycles_per_second = (1.0 / period.as_secs_f64()).round().max(1.0) as u64;

        Self {
            power,
            imu,
            orient_est,
            host_stats,
            period,
            cycles_per_second,
            num_cycles: 0,
            last_imu_instant: None,
            last_imu_dt_s: None,
            power_fault: false,
            imu_fault: false,
        }
    }

    /// Run until `stop` is set or the hub closes.
    pub fn run(mut self, hub: HubHandle, stop: Arc<AtomicBool>) {
        info!(
            "Sampler running every {:?}, power monitor: {}, IMU: {}",
            self.period,
            self.power.is_some(),
            self.imu.is_some()
        );

        while !stop.load(Ordering::Relaxed) {

            // Get cycle start time
            let cycle_start_instant = Instant::now();

            for update in self.tick(cycle_start_instant) {
                if hub.blocking_telemetry(update).is_err() {
                    info!("StateHub closed, stopping the sampler");
                    return
                }
            }

            // ---- CYCLE MANAGEMENT ----

            let cycle_dur = Instant::now() - cycle_start_instant;

            match self.period.checked_sub(cycle_dur) {
                Some(d) => thread::sleep(d),
                None => warn!(
                    "Sampler cycle overran by {:.06} s",
                    cycle_dur.as_secs_f64() - self.period.as_secs_f64()
                )
            }
        }

        info!("Sampler stopped after {} cycles", self.num_cycles);
    }

    /// Run one sampling cycle starting at `now`, returning the telemetry it produced.
    pub fn tick(&mut self, now: Instant) -> Vec<TelemetryUpdate> {
        let mut updates = Vec::new();
        let is_1_hz_cycle = self.num_cycles % self.cycles_per_second == 0;

        if let Some(u) = self.sample_power() {
            updates.push(u);
        }

        if let Some(u) = self.sample_imu(now) {
            updates.push(u);
        }

        if is_1_hz_cycle {
            updates.push(TelemetryUpdate::Platform(self.host_stats.snapshot()));
        }

        self.num_cycles += 1;

        updates
    }

    pub fn num_cycles(&self) -> u64 {
        self.num_cycles
    }

    /// Time step of the last IMU update given to the estimator.
    pub fn last_imu_dt_s(&self) -> Option<f64> {
        self.last_imu_dt_s
    }

    fn sample_power(&mut self) -> Option<TelemetryUpdate> {
        let power = self.power.as_mut()?;

        let voltage = power.bus_voltage_v();
        let current = power.current();

        match (&voltage, &current) {
            (Ok(_), Ok(_)) => {
                if self.power_fault {
                    info!("Power monitor recovered");
                    self.power_fault = false;
                }
            },
            (Err(e), _) | (_, Err(e)) => {
                if !self.power_fault {
                    warn!("Power monitor read failed: {}", e);
                    self.power_fault = true;
                }
                else {
                    trace!("Power monitor read failed: {}", e);
                }
            }
        }

        match (voltage.ok(), current.ok()) {
            (None, None) => None,
            (voltage, current) => Some(TelemetryUpdate::Power { voltage, current })
        }
    }

    fn sample_imu(&mut self, now: Instant) -> Option<TelemetryUpdate> {
        let imu = self.imu.as_mut()?;

        let sample = match imu.get_data() {
            Ok(s) => {
                if self.imu_fault {
                    info!("IMU recovered");
                    self.imu_fault = false;
                }
                s
            },
            Err(SensorError::DataNotReady) => {
                trace!("IMU data not ready");
                return None
            },
            Err(e) => {
                if !self.imu_fault {
                    warn!("IMU read failed: {}", e);
                    self.imu_fault = true;
                }
                return None
            }
        };

        let dt_s = match self.last_imu_instant {
            Some(last) => (now - last).as_secs_f64(),
            None => self.period.as_secs_f64()
        };
        self.last_imu_instant = Some(now);
        self.last_imu_dt_s = Some(dt_s);

        match self.orient_est.proc(&orient_est::InputData { sample, dt_s }) {
            Ok((orientation, report)) => {
                if report.mag_present && !report.heading_valid {
                    debug!("Magnetometer gave no heading this cycle");
                }
                Some(TelemetryUpdate::Orientation(orientation))
            },
            Err(e) => {
                warn!("Error during OrientEst processing: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use comms_if::tm::{MowerState, PlatformState};
    use nalgebra::Vector3;

    use crate::{
        host_stats::test::FakeHostStats,
        hub::{HubEvent, HubParams, StateHub},
        sens_driver::{BusError, SensorSample}
    };

    struct FakePower {
        voltage: Result<f64, BusError>,
        current: Result<f64, BusError>,
    }

    impl PowerMonitor for FakePower {
        fn bus_voltage_v(&mut self) -> Result<f64, BusError> {
            self.voltage.clone()
        }

        fn current(&mut self) -> Result<f64, BusError> {
            self.current.clone()
        }
    }

    /// IMU returning queued results, then `DataNotReady`.
    struct FakeImu(Arc<Mutex<VecDeque<Result<SensorSample, SensorError>>>>);

    impl Imu for FakeImu {
        fn get_data(&mut self) -> Result<SensorSample, SensorError> {
            self.0.lock().unwrap().pop_front().unwrap_or(Err(SensorError::DataNotReady))
        }
    }

    fn level_sample() -> SensorSample {
        SensorSample {
            gyro_dps: Vector3::zeros(),
            accel_g: Vector3::new(0.0, 0.0, 1.0),
            mag_ut: Some(Vector3::new(10.0, 0.0, -40.0)),
            temp_c: 21.0,
        }
    }

    fn bus_err() -> BusError {
        BusError::Read { reg: 0x02, msg: "nack".into() }
    }

    fn orient_est() -> OrientEst {
        let mut oe = OrientEst::default();
        oe.init(orient_est::Params::default()).unwrap();
        oe
    }

    fn sampler(
        power: Option<FakePower>,
        imu: Option<FakeImu>
    ) -> Sampler {
        Sampler::new(
            power.map(|p| Box::new(p) as Box<dyn PowerMonitor + Send>),
            imu.map(|i| Box::new(i) as Box<dyn Imu + Send>),
            orient_est(),
            Box::new(FakeHostStats(PlatformState {
                hostname: "mower".into(),
                ..Default::default()
            })),
            0.125
        )
    }

    #[test]
    fn test_platform_on_1_hz_cycles() {
        let mut s = sampler(None, None);
        let start = Instant::now();

        let platform_cycles: Vec<u64> = (0..17)
            .filter(|i| {
                let updates = s.tick(start + Duration::from_millis(125 * i));
                updates.iter().any(|u| matches!(u, TelemetryUpdate::Platform(_)))
            })
            .collect();

        assert_eq!(platform_cycles, vec![0, 8, 16]);
        assert_eq!(s.num_cycles(), 17);
    }

    #[test]
    fn test_power() {
        let mut s = sampler(Some(FakePower { voltage: Ok(24.1), current: Ok(1.5) }), None);
        let updates = s.tick(Instant::now());
        assert_eq!(
            updates[0],
            TelemetryUpdate::Power { voltage: Some(24.1), current: Some(1.5) }
        );

        // Partial failure still reports the good value
        let mut s = sampler(Some(FakePower { voltage: Ok(24.1), current: Err(bus_err()) }), None);
        assert_eq!(
            s.tick(Instant::now())[0],
            TelemetryUpdate::Power { voltage: Some(24.1), current: None }
        );

        // Total failure reports nothing
        let mut s = sampler(
            Some(FakePower { voltage: Err(bus_err()), current: Err(bus_err()) }),
            None
        );
        let updates = s.tick(Instant::now());
        assert!(!updates.iter().any(|u| matches!(u, TelemetryUpdate::Power { .. })));
    }

    #[test]
    fn test_imu_data_not_ready() {
        let queue = Arc::new(Mutex::new(VecDeque::from(vec![
            Ok(level_sample()),
            Err(SensorError::DataNotReady),
            Err(SensorError::Bus(bus_err())),
            Ok(level_sample()),
        ])));
        let mut s = sampler(None, Some(FakeImu(queue)));
        let start = Instant::now();
        let step = Duration::from_millis(125);

        let is_orientation = |u: &TelemetryUpdate| matches!(u, TelemetryUpdate::Orientation(_));

        // First sample uses the nominal period
        let updates = s.tick(start);
        match updates.iter().find(|u| is_orientation(u)) {
            Some(TelemetryUpdate::Orientation(o)) => {
                let h = o.heading.unwrap();
                assert!((h.degrees - 90.0).abs() < 1e-9);
                assert_eq!(h.bearing, "E");
            },
            _ => panic!("Expected an orientation update")
        }
        assert_eq!(s.last_imu_dt_s(), Some(0.125));

        // Not ready and bus error produce no orientation
        assert!(!s.tick(start + step).iter().any(is_orientation));
        assert!(!s.tick(start + step * 2).iter().any(is_orientation));

        // Time step spans the skipped cycles
        assert!(s.tick(start + step * 3).iter().any(is_orientation));
        assert!((s.last_imu_dt_s().unwrap() - 0.375).abs() < 1e-9);
    }

    #[test]
    fn test_skipped_imu_cycles_keep_hub_orientation() {
        let queue = Arc::new(Mutex::new(VecDeque::from(vec![
            Ok(level_sample()),
            Err(SensorError::DataNotReady),
            Err(SensorError::Bus(bus_err())),
        ])));
        let mut s = sampler(
            Some(FakePower { voltage: Ok(24.0), current: Ok(0.4) }),
            Some(FakeImu(queue))
        );
        let (mut hub, _handle) = StateHub::new(
            MowerState::new(24.3, 23.0),
            &HubParams { publish_period_s: 1.0, event_queue_len: 4 }
        );
        let start = Instant::now();
        let step = Duration::from_millis(125);

        for u in s.tick(start) {
            hub.handle_event(HubEvent::Telemetry(u));
        }
        let orientation = hub.state().orientation.clone();
        assert_eq!(orientation.bearing, "E");
        assert!((orientation.heading - 90.0).abs() < 1e-9);

        // Not ready then a bus error, the power telemetry still flows
        for i in 1..3 {
            for u in s.tick(start + step * i) {
                hub.handle_event(HubEvent::Telemetry(u));
            }
            assert_eq!(hub.state().orientation, orientation);
        }
        assert_eq!(hub.state().battery.voltage, 24.0);
    }

    #[test]
    fn test_run_stops_when_hub_closes() {
        let (hub, handle) = StateHub::new(
            MowerState::new(24.3, 23.0),
            &HubParams { publish_period_s: 1.0, event_queue_len: 4 }
        );
        drop(hub);

        let s = sampler(Some(FakePower { voltage: Ok(24.0), current: Ok(0.2) }), None);
        s.run(handle, Arc::new(AtomicBool::new(false)));
    }

    #[test]
    fn test_run_stops_on_flag() {
        let (_hub, handle) = StateHub::new(
            MowerState::new(24.3, 23.0),
            &HubParams { publish_period_s: 1.0, event_queue_len: 4 }
        );

        let s = sampler(None, None);
        s.run(handle, Arc::new(AtomicBool::new(true)));
    }
}

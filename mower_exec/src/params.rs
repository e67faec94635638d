//! # Mower Executable Parameters
//!
//! This module provide parameters for the mower executable, loaded from `mower_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Serialize, Deserialize};
use thiserror::Error;

use util::time::{seconds_to_period, PeriodError};

use crate::{
    hub::{client::ClientParams, HubParams},
    orient_est,
    sens_driver::{mpu9250::Mpu9250Config, DeviceConfig}
};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A loaded parameter which the executable cannot run with.
#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("Invalid period {name}: {source}")]
    InvalidPeriod {
        name: &'static str,
        source: PeriodError
    },

    #[error("{0} must be at least 1")]
    ZeroLength(&'static str),

    #[error("client.ping_period_s ({ping_s} s) must be less than client.pong_wait_s ({pong_s} s)")]
    PingNotBeforePong {
        ping_s: f64,
        pong_s: f64
    },
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MowerExecParams {

    pub api_server: ApiServerParams,

    pub mower: MowerParams,

    pub sensors: SensorParams,

    pub battery: BatteryParams,

    pub hub: HubParams,

    pub client: ClientParams,

    pub orient_est: orient_est::Params,

    /// Maximum time to wait for tasks to finish on shutdown
    pub shutdown_grace_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiServerParams {
    /// Address the websocket endpoint listens on, e.g. `0.0.0.0:8088`
    pub listen_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MowerParams {
    /// Human readable name of the mower
    pub name: String,

    /// Camera device used by the video stream
    pub camera_device_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorParams {
    /// Period of the sampling loop
    pub sample_period_s: f64,

    /// Power monitor location, `None` if not fitted
    pub ina219: Option<Ina219Params>,

    /// IMU location, `None` if not fitted
    pub mpu9250: Option<Mpu9250Params>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ina219Params {
    pub device: DeviceConfig,
    pub calibration: u16,
    pub shunt_resistance_ohm: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mpu9250Params {
    pub device: DeviceConfig,

    #[serde(flatten)]
    pub config: Mpu9250Config,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatteryParams {
    pub voltage_nominal: f64,

    /// Below this voltage the battery status is reported as low
    pub voltage_warn: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MowerExecParams {
    /// Check the values which deserialisation alone can't, periods and queue lengths in
    /// particular.
    pub fn validate(&self) -> Result<(), ParamsError> {
        check_period("sensors.sample_period_s", self.sensors.sample_period_s)?;
        check_period("hub.publish_period_s", self.hub.publish_period_s)?;
        check_period("client.write_wait_s", self.client.write_wait_s)?;
        check_period("client.pong_wait_s", self.client.pong_wait_s)?;
        check_period("client.ping_period_s", self.client.ping_period_s)?;

        // A zero grace is allowed, shutdown then doesn't wait
        if self.shutdown_grace_s != 0.0 {
            check_period("shutdown_grace_s", self.shutdown_grace_s)?;
        }

        if self.hub.event_queue_len == 0 {
            return Err(ParamsError::ZeroLength("hub.event_queue_len"))
        }
        if self.client.send_queue_len == 0 {
            return Err(ParamsError::ZeroLength("client.send_queue_len"))
        }
        if self.client.max_message_size == 0 {
            return Err(ParamsError::ZeroLength("client.max_message_size"))
        }

        if self.client.ping_period_s >= self.client.pong_wait_s {
            return Err(ParamsError::PingNotBeforePong {
                ping_s: self.client.ping_period_s,
                pong_s: self.client.pong_wait_s
            })
        }

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn check_period(name: &'static str, seconds: f64) -> Result<(), ParamsError> {
    seconds_to_period(seconds)
        .map(|_| ())
        .map_err(|source| ParamsError::InvalidPeriod { name, source })
}

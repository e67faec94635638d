//! # Mower library.
//!
//! This library allows the executable, benches and other crates in the workspace to access items
//! defined inside the mower crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Sensor drivers - INA219 power monitor and MPU9250 IMU over I2C
pub mod sens_driver;

/// Orientation estimation - Kalman filtered tilt and magnetometer heading
pub mod orient_est;

/// State hub - owns the mower state and publishes it to connected clients
pub mod hub;

/// Telecommand processor - applies operator commands to the mower state
pub mod tc_processor;

/// Host statistics - CPU, memory and disk usage of the mower's computer
pub mod host_stats;

/// Sampler - periodic sensor acquisition loop
pub mod sampler;

/// Telemetry server - websocket endpoint for clients
pub mod tm_server;

/// Parameters for the mower executable
pub mod params;

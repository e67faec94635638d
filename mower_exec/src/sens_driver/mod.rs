//! # Sensor Driver Module
//!
//! Bus-level drivers for the mower's sensors. Each driver owns a
//! [`RegisterTransport`], which abstracts over the real I2C bus and the
//! register-map mock used in tests.
//!
//! ## Byte order
//!
//! [`RegisterTransport::read_word`] returns the two bytes at `reg` and
//! `reg + 1` exactly as they came off the bus, packed with the byte at `reg`
//! in the low half (the SMBus word convention). Devices disagree on how to
//! interpret that pair, so drivers must decode every word with one of
//! [`decode_be_u16`], [`decode_be_i16`] or [`decode_le_i16`] matching the
//! source register:
//!
//! - INA219 registers are big-endian.
//! - MPU9250 accel, gyro and temperature registers are big-endian.
//! - AK8963 magnetometer registers (relayed into the MPU9250's external
//!   sensor data registers) are little-endian.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Current and bus voltage monitor
pub mod ina219;

/// 9-axis inertial measurement unit
pub mod mpu9250;

#[cfg(test)]
pub(crate) mod mock;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt::Debug;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use embedded_hal::blocking::i2c::{Write, WriteRead};
use nalgebra::Vector3;
use serde::{Serialize, Deserialize};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Register level access to a single device on a bus.
pub trait RegisterTransport {

    /// Read a single register.
    fn read_byte(&mut self, reg: u8) -> Result<u8, BusError>;

    /// Read two sequential registers, see the module documentation for the byte order.
    fn read_word(&mut self, reg: u8) -> Result<u16, BusError>;

    /// Write a single register.
    fn write_byte(&mut self, reg: u8, value: u8) -> Result<(), BusError>;

    /// Write a block of bytes starting at the given register.
    fn write_block(&mut self, reg: u8, bytes: &[u8]) -> Result<(), BusError>;
}

/// A device which measures the voltage and current of the battery bus.
pub trait PowerMonitor {

    /// Bus voltage in volts.
    fn bus_voltage_v(&mut self) -> Result<f64, BusError>;

    /// Current through the shunt, in the units of the device's shunt voltage over its shunt
    /// resistance.
    fn current(&mut self) -> Result<f64, BusError>;
}

/// An inertial measurement unit.
pub trait Imu {

    /// Acquire one sample in physical units.
    fn get_data(&mut self) -> Result<SensorSample, SensorError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Location of a device on the hardware buses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Bus number, e.g. `1` for `/dev/i2c-1`
    pub bus: u8,

    /// 7-bit device address
    pub address: u8,
}

/// One IMU sample in physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    /// Angular rate in degrees/second
    pub gyro_dps: Vector3<f64>,

    /// Acceleration in g
    pub accel_g: Vector3<f64>,

    /// Magnetic field in micro Tesla, `None` if the magnetometer had no valid data this sample
    pub mag_ut: Option<Vector3<f64>>,

    /// Die temperature in degrees Celsius
    pub temp_c: f64,
}

/// [`RegisterTransport`] over any blocking `embedded-hal` I2C bus.
pub struct I2cTransport<I2C> {
    i2c: I2C,
    address: u8,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BusError {
    #[error("Could not read register {reg:#04x}: {msg}")]
    Read {
        reg: u8,
        msg: String
    },

    #[error("Could not write register {reg:#04x}: {msg}")]
    Write {
        reg: u8,
        msg: String
    },

    #[error("Could not open I2C bus {bus}: {msg}")]
    Open {
        bus: u8,
        msg: String
    }
}

/// Errors which can occur while acquiring a sample.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Sensor data is not ready")]
    DataNotReady
}

/// Errors which can occur while starting a device.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InitError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("{device} reported identity {found:#04x}, expected one of {expected:02x?}")]
    DeviceIdMismatch {
        device: &'static str,
        expected: &'static [u8],
        found: u8
    }
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<I2C, E> I2cTransport<I2C>
where
    I2C: Write<Error = E> + WriteRead<Error = E>,
    E: Debug
{
    /// Bind an already opened bus to a single device address.
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }
}

#[cfg(all(target_os = "linux", any(target_arch = "arm", target_arch = "aarch64")))]
impl I2cTransport<rppal::i2c::I2c> {
    /// Open the Raspberry Pi I2C bus described by the config.
    pub fn open(config: &DeviceConfig) -> Result<Self, BusError> {
        let i2c = rppal::i2c::I2c::with_bus(config.bus)
            .map_err(|e| BusError::Open {
                bus: config.bus,
                msg: e.to_string()
            })?;

        Ok(Self::new(i2c, config.address))
    }
}

impl<I2C, E> RegisterTransport for I2cTransport<I2C>
where
    I2C: Write<Error = E> + WriteRead<Error = E>,
    E: Debug
{
    fn read_byte(&mut self, reg: u8) -> Result<u8, BusError> {
        let mut buf = [0u8; 1];
        self.i2c.write_read(self.address, &[reg], &mut buf)
            .map_err(|e| BusError::Read { reg, msg: format!("{:?}", e) })?;
        Ok(buf[0])
    }

    fn read_word(&mut self, reg: u8) -> Result<u16, BusError> {
        let mut buf = [0u8; 2];
        self.i2c.write_read(self.address, &[reg], &mut buf)
            .map_err(|e| BusError::Read { reg, msg: format!("{:?}", e) })?;
        Ok(u16::from_le_bytes(buf))
    }

    fn write_byte(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        self.i2c.write(self.address, &[reg, value])
            .map_err(|e| BusError::Write { reg, msg: format!("{:?}", e) })
    }

    fn write_block(&mut self, reg: u8, bytes: &[u8]) -> Result<(), BusError> {
        let mut buf = Vec::with_capacity(bytes.len() + 1);
        buf.push(reg);
        buf.extend_from_slice(bytes);

        self.i2c.write(self.address, &buf)
            .map_err(|e| BusError::Write { reg, msg: format!("{:?}", e) })
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Decode a word read from a big-endian register pair as unsigned.
pub fn decode_be_u16(word: u16) -> u16 {
    BigEndian::read_u16(&word.to_le_bytes())
}

/// Decode a word read from a big-endian register pair as two's complement.
pub fn decode_be_i16(word: u16) -> i16 {
    BigEndian::read_i16(&word.to_le_bytes())
}

/// Decode a word read from a little-endian register pair as two's complement.
pub fn decode_le_i16(word: u16) -> i16 {
    LittleEndian::read_i16(&word.to_le_bytes())
}

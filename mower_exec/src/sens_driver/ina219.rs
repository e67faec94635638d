//! INA219 current and bus voltage monitor driver.
//!
//! All INA219 registers are 16 bits wide and big-endian.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;

use super::{decode_be_i16, decode_be_u16, BusError, InitError, PowerMonitor, RegisterTransport};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default device address (A0 and A1 tied to ground)
pub const DEFAULT_ADDRESS: u8 = 0x40;

/// Default calibration value, for a 0.1 Ohm shunt
pub const DEFAULT_CALIBRATION: u16 = 4027;

/// Default shunt resistance in Ohms
pub const DEFAULT_SHUNT_RESISTANCE_OHM: f64 = 0.1;

const REG_CONFIG: u8 = 0x00;
const REG_SHUNT_VOLTAGE: u8 = 0x01;
const REG_BUS_VOLTAGE: u8 = 0x02;
const REG_CALIBRATION: u8 = 0x05;

const CONFIG_BUS_RANGE_32V: u16 = 0x2000;
const CONFIG_GAIN_8_320MV: u16 = 0x1800;
const CONFIG_BADC_12BIT: u16 = 0x0400;
const CONFIG_SADC_12BIT_1S: u16 = 0x0018;
const CONFIG_MODE_SHUNT_BUS_CONTINUOUS: u16 = 0x0007;

/// Configuration word written at start, evaluates to `0x3C1F`.
pub const CONFIG_VALUE: u16 = CONFIG_BUS_RANGE_32V
    | CONFIG_GAIN_8_320MV
    | CONFIG_BADC_12BIT
    | CONFIG_SADC_12BIT_1S
    | CONFIG_MODE_SHUNT_BUS_CONTINUOUS;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Ina219<T> {
    transport: T,
    calibration: u16,
    shunt_resistance_ohm: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<T> Ina219<T>
where
    T: RegisterTransport
{
    /// Create a new driver with the default calibration for a 0.1 Ohm shunt.
    pub fn new(transport: T) -> Self {
        Self::with_calibration(transport, DEFAULT_CALIBRATION, DEFAULT_SHUNT_RESISTANCE_OHM)
    }

    pub fn with_calibration(transport: T, calibration: u16, shunt_resistance_ohm: f64) -> Self {
        Self {
            transport,
            calibration,
            shunt_resistance_ohm,
        }
    }

    /// Configure the device for 32 V bus range, 320 mV shunt range, 12 bit conversions and
    /// continuous bus and shunt sampling, then load the calibration register.
    pub fn start(&mut self) -> Result<(), InitError> {
        self.transport.write_block(REG_CONFIG, &CONFIG_VALUE.to_be_bytes())?;
        self.transport.write_block(REG_CALIBRATION, &self.calibration.to_be_bytes())?;

        debug!(
            "INA219 started (config {:#06x}, calibration {})",
            CONFIG_VALUE, self.calibration
        );

        Ok(())
    }

    /// Bus voltage in volts.
    pub fn get_bus_voltage(&mut self) -> Result<f64, BusError> {
        let raw = decode_be_u16(self.transport.read_word(REG_BUS_VOLTAGE)?);

        Ok(((raw >> 3) * 4) as f64 * 0.001)
    }

    /// Shunt voltage.
    ///
    /// The 10 uV LSB is applied as `raw * 0.00001`, i.e. the result is in volts. Current is derived
    /// from this value so the scale must not change.
    pub fn get_shunt_voltage(&mut self) -> Result<f64, BusError> {
        let raw = decode_be_i16(self.transport.read_word(REG_SHUNT_VOLTAGE)?);

        Ok(raw as f64 * 0.00001)
    }

    /// Shunt voltage divided by the shunt resistance.
    pub fn get_current(&mut self) -> Result<f64, BusError> {
        Ok(self.get_shunt_voltage()? / self.shunt_resistance_ohm)
    }

    /// Voltage on the load side of the shunt.
    pub fn get_load_voltage(&mut self) -> Result<f64, BusError> {
        let bus = self.get_bus_voltage()?;
        let shunt = self.get_shunt_voltage()?;

        Ok(bus + shunt / 1000.0)
    }
}

impl<T> PowerMonitor for Ina219<T>
where
    T: RegisterTransport
{
    fn bus_voltage_v(&mut self) -> Result<f64, BusError> {
        self.get_bus_voltage()
    }

    fn current(&mut self) -> Result<f64, BusError> {
        self.get_current()
    }
}

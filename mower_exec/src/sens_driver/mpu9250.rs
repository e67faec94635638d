//! MPU9250 inertial measurement unit driver.
//!
//! The accelerometer, gyroscope and temperature registers are read directly and are big-endian.
//! The AK8963 magnetometer inside the package is reached through the MPU9250's auxiliary I2C
//! master: slave 0 is configured to continuously copy the AK8963's ST1..ST2 registers into the
//! external sensor data registers, where the little-endian magnetometer words can be read without
//! any further bus configuration.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use embedded_hal::blocking::delay::DelayMs;
use log::{debug, info};
use nalgebra::Vector3;
use serde::{Serialize, Deserialize};

use super::{
    decode_be_i16, decode_le_i16, BusError, Imu, InitError, RegisterTransport, SensorError,
    SensorSample
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default device address (AD0 low)
pub const DEFAULT_ADDRESS: u8 = 0x68;

/// Accepted WHO_AM_I values, MPU9250 and MPU9255
pub const DEVICE_IDS: [u8; 2] = [0x71, 0x73];

/// AK8963 WIA register value
pub const AK8963_DEVICE_ID: u8 = 0x48;

const AK8963_ADDRESS: u8 = 0x0C;

/// Magnetometer resolution in 16 bit output mode, uT/LSB
const MAG_RESOLUTION_16BIT: f64 = 4912.0 / 32760.0;

const TEMP_SENSITIVITY: f64 = 333.87;
const TEMP_OFFSET_C: f64 = 21.0;

// MPU9250 registers
const XG_OFFSET_H: u8 = 0x13;
const YG_OFFSET_H: u8 = 0x15;
const ZG_OFFSET_H: u8 = 0x17;
const SMPLRT_DIV: u8 = 0x19;
const CONFIG: u8 = 0x1A;
const GYRO_CONFIG: u8 = 0x1B;
const ACCEL_CONFIG: u8 = 0x1C;
const ACCEL_CONFIG_2: u8 = 0x1D;
const I2C_MST_CTRL: u8 = 0x24;
const I2C_SLV0_ADDR: u8 = 0x25;
const I2C_SLV0_REG: u8 = 0x26;
const I2C_SLV0_CTRL: u8 = 0x27;
const INT_PIN_CFG: u8 = 0x37;
const INT_ENABLE: u8 = 0x38;
const INT_STATUS: u8 = 0x3A;
const ACCEL_XOUT_H: u8 = 0x3B;
const ACCEL_YOUT_H: u8 = 0x3D;
const ACCEL_ZOUT_H: u8 = 0x3F;
const TEMP_OUT_H: u8 = 0x41;
const GYRO_XOUT_H: u8 = 0x43;
const GYRO_YOUT_H: u8 = 0x45;
const GYRO_ZOUT_H: u8 = 0x47;
const EXT_SENS_DATA_00: u8 = 0x49;
const I2C_SLV0_DO: u8 = 0x63;
const USER_CTRL: u8 = 0x6A;
const PWR_MGMT_1: u8 = 0x6B;
const PWR_MGMT_2: u8 = 0x6C;
const BANK_SEL: u8 = 0x6D;
const MEM_R_W: u8 = 0x6F;
const WHO_AM_I: u8 = 0x75;
const XA_OFFSET_H: u8 = 0x77;
const YA_OFFSET_H: u8 = 0x7A;
const ZA_OFFSET_H: u8 = 0x7D;

// AK8963 registers
const AK8963_WIA: u8 = 0x00;
const AK8963_ST1: u8 = 0x02;
const AK8963_CNTL1: u8 = 0x0A;
const AK8963_CNTL2: u8 = 0x0B;
const AK8963_ASAX: u8 = 0x10;

// Register values
const PWR_RESET: u8 = 0x80;
const PWR_CLK_AUTO: u8 = 0x01;
const DLPF_41HZ: u8 = 0x03;
const SAMPLE_RATE_DIV_200HZ: u8 = 0x04;
const INT_PIN_LATCH_CLEAR_ON_READ: u8 = 0x30;
const INT_RAW_DATA_READY: u8 = 0x01;
const USER_CTRL_I2C_MST_EN: u8 = 0x20;
const I2C_MST_CLK_400KHZ: u8 = 0x0D;
const SLV_READ_FLAG: u8 = 0x80;
const SLV_EN: u8 = 0x80;
const AK8963_RESET: u8 = 0x01;
const AK8963_POWER_DOWN: u8 = 0x00;
const AK8963_FUSE_ROM: u8 = 0x0F;
const AK8963_16BIT: u8 = 0x01;
const AK8963_CONT_8HZ: u8 = 0x02;
const AK8963_ST1_DRDY: u8 = 0x01;
const AK8963_ST2_HOFL: u8 = 0x08;

/// Number of AK8963 bytes relayed each sample: ST1, six data bytes, ST2
const MAG_RELAY_LEN: u8 = 8;

/// DMP memory address of the gyro motion bias configuration
const CFG_MOTION_BIAS: [u8; 2] = [0x04, 0xB8];

/// DMP program fragment which disables automatic gyro bias compensation
const DISABLE_GYRO_AUTO_BIAS: [u8; 9] = [0xB8, 0xAA, 0xAA, 0xAA, 0xB0, 0x88, 0xC3, 0xC5, 0xC7];

const RESET_DELAY_MS: u16 = 100;
const WAKE_DELAY_MS: u16 = 200;
const AUX_DELAY_MS: u16 = 10;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Conversion of a raw register value into physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisCalibration {
    /// Offset in raw sample units
    pub bias: i32,

    /// Physical units per LSB
    pub scale: f64,
}

/// Measurement configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mpu9250Config {
    pub gyro_full_scale: GyroFullScale,
    pub accel_full_scale: AccelFullScale,
}

pub struct Mpu9250<T, D> {
    transport: T,
    delay: D,
    config: Mpu9250Config,

    gyro_cal: [AxisCalibration; 3],
    accel_cal: [AxisCalibration; 3],

    /// Fuse ROM sensitivity adjustment of each magnetometer axis
    mag_coef: Vector3<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GyroFullScale {
    Dps250,
    Dps500,
    Dps1000,
    Dps2000,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccelFullScale {
    G2,
    G4,
    G8,
    G16,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AxisCalibration {
    /// Calibration which leaves raw values unchanged.
    pub const IDENTITY: Self = Self { bias: 0, scale: 1.0 };

    /// Convert a raw value: `(raw - bias) * scale`.
    pub fn convert(&self, raw: i16) -> f64 {
        (raw as i32 - self.bias) as f64 * self.scale
    }
}

impl GyroFullScale {
    fn bits(self) -> u8 {
        match self {
            GyroFullScale::Dps250 => 0,
            GyroFullScale::Dps500 => 1,
            GyroFullScale::Dps1000 => 2,
            GyroFullScale::Dps2000 => 3,
        }
    }

    /// Degrees/second per LSB
    pub fn resolution(self) -> f64 {
        (250u32 << self.bits()) as f64 / 32768.0
    }
}

impl AccelFullScale {
    fn bits(self) -> u8 {
        match self {
            AccelFullScale::G2 => 0,
            AccelFullScale::G4 => 1,
            AccelFullScale::G8 => 2,
            AccelFullScale::G16 => 3,
        }
    }

    /// g per LSB
    pub fn resolution(self) -> f64 {
        (2u32 << self.bits()) as f64 / 32768.0
    }
}

impl Default for Mpu9250Config {
    fn default() -> Self {
        Self {
            gyro_full_scale: GyroFullScale::Dps250,
            accel_full_scale: AccelFullScale::G2,
        }
    }
}

impl<T, D> Mpu9250<T, D>
where
    T: RegisterTransport,
    D: DelayMs<u16>
{
    pub fn new(transport: T, delay: D, config: Mpu9250Config) -> Self {
        let gyro = AxisCalibration { bias: 0, scale: config.gyro_full_scale.resolution() };
        let accel = AxisCalibration { bias: 0, scale: config.accel_full_scale.resolution() };

        Self {
            transport,
            delay,
            config,
            gyro_cal: [gyro; 3],
            accel_cal: [accel; 3],
            mag_coef: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    /// Reset and configure the device, read back calibration data and start the magnetometer.
    pub fn start(&mut self) -> Result<(), InitError> {
        // ---- RESET AND WAKE ----

        let id = self.transport.read_byte(WHO_AM_I)?;
        if !DEVICE_IDS.contains(&id) {
            return Err(InitError::DeviceIdMismatch {
                device: "MPU9250",
                expected: &DEVICE_IDS,
                found: id
            })
        }

        self.transport.write_byte(PWR_MGMT_1, PWR_RESET)?;
        self.delay.delay_ms(RESET_DELAY_MS);
        self.transport.write_byte(PWR_MGMT_1, PWR_CLK_AUTO)?;
        self.transport.write_byte(PWR_MGMT_2, 0x00)?;
        self.delay.delay_ms(WAKE_DELAY_MS);

        // ---- ACCEL AND GYRO CONFIGURATION ----

        let gfs = self.config.gyro_full_scale.bits();
        let afs = self.config.accel_full_scale.bits();

        self.transport.write_byte(CONFIG, DLPF_41HZ)?;
        self.transport.write_byte(SMPLRT_DIV, SAMPLE_RATE_DIV_200HZ)?;
        self.transport.write_byte(GYRO_CONFIG, gfs << 3)?;
        self.transport.write_byte(ACCEL_CONFIG, afs << 3)?;
        self.transport.write_byte(ACCEL_CONFIG_2, DLPF_41HZ)?;

        // ---- FACTORY BIAS ----

        // Gyro offsets are in 1000 dps LSBs (4x the 250 dps LSB)
        for (cal, reg) in self.gyro_cal.iter_mut().zip(&[XG_OFFSET_H, YG_OFFSET_H, ZG_OFFSET_H]) {
            let offset = decode_be_i16(self.transport.read_word(*reg)?) as i32;
            cal.bias = (offset << 2) >> gfs;
        }

        // Accel offsets are 15 bit values (bit 0 reserved) in 16 g / 16384 LSBs
        for (cal, reg) in self.accel_cal.iter_mut().zip(&[XA_OFFSET_H, YA_OFFSET_H, ZA_OFFSET_H]) {
            let offset = decode_be_i16(self.transport.read_word(*reg)?) as i32;
            cal.bias = (offset >> 1) << (4 - afs);
        }

        debug!(
            "MPU9250 factory bias: gyro {:?}, accel {:?}",
            self.gyro_cal.iter().map(|c| c.bias).collect::<Vec<_>>(),
            self.accel_cal.iter().map(|c| c.bias).collect::<Vec<_>>()
        );

        // ---- AUXILIARY BUS AND MAGNETOMETER ----

        self.transport.write_byte(INT_PIN_CFG, INT_PIN_LATCH_CLEAR_ON_READ)?;
        self.transport.write_byte(INT_ENABLE, INT_RAW_DATA_READY)?;
        self.transport.write_byte(USER_CTRL, USER_CTRL_I2C_MST_EN)?;
        self.transport.write_byte(I2C_MST_CTRL, I2C_MST_CLK_400KHZ)?;

        let wia = self.ak_read(AK8963_WIA, 1)?[0];
        if wia != AK8963_DEVICE_ID {
            return Err(InitError::DeviceIdMismatch {
                device: "AK8963",
                expected: &[AK8963_DEVICE_ID],
                found: wia
            })
        }

        self.ak_write(AK8963_CNTL2, AK8963_RESET)?;
        self.ak_write(AK8963_CNTL1, AK8963_POWER_DOWN)?;
        self.ak_write(AK8963_CNTL1, AK8963_FUSE_ROM)?;

        let asa = self.ak_read(AK8963_ASAX, 3)?;
        self.mag_coef = Vector3::from_iterator(
            asa.iter().map(|a| (*a as f64 - 128.0) / 256.0 + 1.0)
        );

        // ---- CONTINUOUS MAGNETOMETER OUTPUT ----

        self.ak_write(AK8963_CNTL1, AK8963_POWER_DOWN)?;
        self.ak_write(AK8963_CNTL1, (AK8963_16BIT << 4) | AK8963_CONT_8HZ)?;

        self.transport.write_byte(I2C_SLV0_ADDR, AK8963_ADDRESS | SLV_READ_FLAG)?;
        self.transport.write_byte(I2C_SLV0_REG, AK8963_ST1)?;
        self.transport.write_byte(I2C_SLV0_CTRL, SLV_EN | MAG_RELAY_LEN)?;
        self.delay.delay_ms(AUX_DELAY_MS);

        // ---- DISABLE GYRO AUTO BIAS ----

        self.transport.write_block(BANK_SEL, &CFG_MOTION_BIAS)?;
        self.transport.write_block(MEM_R_W, &DISABLE_GYRO_AUTO_BIAS)?;

        info!(
            "MPU9250 started (id {:#04x}, mag coefficients [{:.4}, {:.4}, {:.4}])",
            id, self.mag_coef.x, self.mag_coef.y, self.mag_coef.z
        );

        Ok(())
    }

    /// Read one sample.
    ///
    /// Returns `DataNotReady` if the raw data ready interrupt is not set. The magnetometer part of
    /// the sample is `None` when the AK8963 has no new data or reported a magnetic overflow.
    pub fn get_data(&mut self) -> Result<SensorSample, SensorError> {
        let status = self.transport.read_byte(INT_STATUS)?;
        if status & INT_RAW_DATA_READY == 0 {
            return Err(SensorError::DataNotReady)
        }

        let accel = self.read_be_vector([ACCEL_XOUT_H, ACCEL_YOUT_H, ACCEL_ZOUT_H])?;
        let temp_raw = decode_be_i16(self.transport.read_word(TEMP_OUT_H)?);
        let gyro = self.read_be_vector([GYRO_XOUT_H, GYRO_YOUT_H, GYRO_ZOUT_H])?;

        let st1 = self.transport.read_byte(EXT_SENS_DATA_00)?;
        let mut mag_raw = [0i16; 3];
        for (i, m) in mag_raw.iter_mut().enumerate() {
            *m = decode_le_i16(self.transport.read_word(EXT_SENS_DATA_00 + 1 + 2 * i as u8)?);
        }
        let st2 = self.transport.read_byte(EXT_SENS_DATA_00 + MAG_RELAY_LEN - 1)?;

        let mag_ut = if st1 & AK8963_ST1_DRDY != 0 && st2 & AK8963_ST2_HOFL == 0 {
            Some(Vector3::new(
                mag_raw[0] as f64 * self.mag_coef.x * MAG_RESOLUTION_16BIT,
                mag_raw[1] as f64 * self.mag_coef.y * MAG_RESOLUTION_16BIT,
                mag_raw[2] as f64 * self.mag_coef.z * MAG_RESOLUTION_16BIT,
            ))
        }
        else {
            None
        };

        Ok(SensorSample {
            gyro_dps: Vector3::new(
                self.gyro_cal[0].convert(gyro[0]),
                self.gyro_cal[1].convert(gyro[1]),
                self.gyro_cal[2].convert(gyro[2]),
            ),
            accel_g: Vector3::new(
                self.accel_cal[0].convert(accel[0]),
                self.accel_cal[1].convert(accel[1]),
                self.accel_cal[2].convert(accel[2]),
            ),
            mag_ut,
            temp_c: temp_raw as f64 / TEMP_SENSITIVITY + TEMP_OFFSET_C,
        })
    }

    /// Per-axis gyro calibration.
    pub fn gyro_calibration(&self) -> &[AxisCalibration; 3] {
        &self.gyro_cal
    }

    /// Per-axis accelerometer calibration.
    pub fn accel_calibration(&self) -> &[AxisCalibration; 3] {
        &self.accel_cal
    }

    /// Magnetometer sensitivity adjustment coefficients.
    pub fn mag_coefficients(&self) -> Vector3<f64> {
        self.mag_coef
    }

    fn read_be_vector(&mut self, regs: [u8; 3]) -> Result<[i16; 3], BusError> {
        let mut out = [0i16; 3];
        for (o, reg) in out.iter_mut().zip(&regs) {
            *o = decode_be_i16(self.transport.read_word(*reg)?);
        }
        Ok(out)
    }

    /// Write one AK8963 register through auxiliary slave 0.
    fn ak_write(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        self.transport.write_byte(I2C_SLV0_ADDR, AK8963_ADDRESS)?;
        self.transport.write_byte(I2C_SLV0_REG, reg)?;
        self.transport.write_byte(I2C_SLV0_DO, value)?;
        self.transport.write_byte(I2C_SLV0_CTRL, SLV_EN | 1)?;
        self.delay.delay_ms(AUX_DELAY_MS);
        Ok(())
    }

    /// Read `len` AK8963 registers through auxiliary slave 0.
    fn ak_read(&mut self, reg: u8, len: u8) -> Result<Vec<u8>, BusError> {
        self.transport.write_byte(I2C_SLV0_ADDR, AK8963_ADDRESS | SLV_READ_FLAG)?;
        self.transport.write_byte(I2C_SLV0_REG, reg)?;
        self.transport.write_byte(I2C_SLV0_CTRL, SLV_EN | len)?;
        self.delay.delay_ms(AUX_DELAY_MS);

        (0..len)
            .map(|i| self.transport.read_byte(EXT_SENS_DATA_00 + i))
            .collect()
    }
}

impl<T, D> Imu for Mpu9250<T, D>
where
    T: RegisterTransport,
    D: DelayMs<u16>
{
    fn get_data(&mut self) -> Result<SensorSample, SensorError> {
        Mpu9250::get_data(self)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sens_driver::mock::{MockTransport, Transaction};

    struct NoopDelay;

    impl DelayMs<u16> for NoopDelay {
        fn delay_ms(&mut self, _ms: u16) {}
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    /// A mock which answers the identity checks and the fuse ROM read.
    fn device() -> MockTransport {
        let mut mock = MockTransport::new();
        mock.set(WHO_AM_I, 0x71);
        // WIA read, then the three ASA bytes
        mock.queue_read(EXT_SENS_DATA_00, AK8963_DEVICE_ID);
        mock.queue_read(EXT_SENS_DATA_00, 128);
        mock.queue_read(EXT_SENS_DATA_00 + 1, 192);
        mock.queue_read(EXT_SENS_DATA_00 + 2, 64);
        mock
    }

    fn started(mock: MockTransport) -> Mpu9250<MockTransport, NoopDelay> {
        let mut mpu = Mpu9250::new(mock, NoopDelay, Mpu9250Config::default());
        mpu.start().unwrap();
        mpu
    }

    #[test]
    fn test_start_sequence() {
        let mpu = started(device());
        let w = &mpu.transport.writes;

        let pos = |t: Transaction| {
            mpu.transport.position(&t).unwrap_or_else(|| panic!("{:?} not written", t))
        };

        // Reset before configuration, configuration before the aux bus is enabled
        let reset = pos(Transaction::WriteByte(PWR_MGMT_1, PWR_RESET));
        let clk = pos(Transaction::WriteByte(PWR_MGMT_1, PWR_CLK_AUTO));
        let gyro_cfg = pos(Transaction::WriteByte(GYRO_CONFIG, 0x00));
        let mst_en = pos(Transaction::WriteByte(USER_CTRL, USER_CTRL_I2C_MST_EN));
        let fuse = pos(Transaction::WriteByte(I2C_SLV0_DO, AK8963_FUSE_ROM));
        let cont = pos(Transaction::WriteByte(I2C_SLV0_DO, 0x12));
        let relay = pos(Transaction::WriteByte(I2C_SLV0_CTRL, 0x88));
        assert!(reset < clk && clk < gyro_cfg && gyro_cfg < mst_en);
        assert!(mst_en < fuse && fuse < cont && cont < relay);

        pos(Transaction::WriteByte(INT_ENABLE, INT_RAW_DATA_READY));
        pos(Transaction::WriteByte(I2C_SLV0_REG, AK8963_ST1));

        // Auto bias disabled last
        let n = w.len();
        assert_eq!(w[n - 2], Transaction::WriteBlock(BANK_SEL, vec![0x04, 0xB8]));
        assert_eq!(w[n - 1], Transaction::WriteBlock(MEM_R_W, DISABLE_GYRO_AUTO_BIAS.to_vec()));

        assert_close(mpu.mag_coefficients().x, 1.0);
        assert_close(mpu.mag_coefficients().y, 1.25);
        assert_close(mpu.mag_coefficients().z, 0.75);
    }

    #[test]
    fn test_identity_mismatch() {
        let mut mock = device();
        mock.set(WHO_AM_I, 0x12);
        let mut mpu = Mpu9250::new(mock, NoopDelay, Mpu9250Config::default());
        assert!(matches!(
            mpu.start(),
            Err(InitError::DeviceIdMismatch { device: "MPU9250", found: 0x12, .. })
        ));

        let mut mock = MockTransport::new();
        mock.set(WHO_AM_I, 0x73);
        mock.queue_read(EXT_SENS_DATA_00, 0x00);
        let mut mpu = Mpu9250::new(mock, NoopDelay, Mpu9250Config::default());
        assert!(matches!(
            mpu.start(),
            Err(InitError::DeviceIdMismatch { device: "AK8963", found: 0x00, .. })
        ));
    }

    #[test]
    fn test_start_bus_error() {
        let mut mock = device();
        mock.fail(PWR_MGMT_1);
        let mut mpu = Mpu9250::new(mock, NoopDelay, Mpu9250Config::default());
        assert!(matches!(mpu.start(), Err(InitError::Bus(_))));
    }

    #[test]
    fn test_factory_bias() {
        let mut mock = device();
        // Gyro X offset 10 (1000 dps LSBs) is 40 LSBs at 250 dps
        mock.set_pair(XG_OFFSET_H, 0x00, 0x0A);
        // Gyro Y offset -3
        mock.set_pair(YG_OFFSET_H, 0xFF, 0xFD);
        // Accel X offset register 0x0010 (8 in 0.98 mg LSBs) is 128 LSBs at 2 g
        mock.set_pair(XA_OFFSET_H, 0x00, 0x10);

        let mpu = started(mock);
        assert_eq!(mpu.gyro_calibration()[0].bias, 40);
        assert_eq!(mpu.gyro_calibration()[1].bias, -12);
        assert_eq!(mpu.gyro_calibration()[2].bias, 0);
        assert_eq!(mpu.accel_calibration()[0].bias, 128);

        let mut mock = device();
        mock.set_pair(XG_OFFSET_H, 0x00, 0x0A);
        let mut mpu = Mpu9250::new(mock, NoopDelay, Mpu9250Config {
            gyro_full_scale: GyroFullScale::Dps2000,
            accel_full_scale: AccelFullScale::G16,
        });
        mpu.start().unwrap();
        assert_eq!(mpu.gyro_calibration()[0].bias, 5);
        assert_close(mpu.gyro_calibration()[0].scale, 2000.0 / 32768.0);
        assert_close(mpu.accel_calibration()[0].scale, 16.0 / 32768.0);
    }

    #[test]
    fn test_axis_calibration() {
        for raw in &[i16::MIN, -1234, 0, 1, 32767] {
            assert_eq!(AxisCalibration::IDENTITY.convert(*raw), *raw as f64);
        }

        let cal = AxisCalibration { bias: 40, scale: 0.5 };
        assert_close(cal.convert(140), 50.0);
        assert_close(cal.convert(-60), -50.0);
    }

    #[test]
    fn test_get_data() {
        let mut mpu = started(device());
        let t = &mut mpu.transport;

        t.set(INT_STATUS, 0x01);
        // Accel z = 1 g
        t.set_pair(ACCEL_ZOUT_H, 0x40, 0x00);
        // Accel x = -0.5 g
        t.set_pair(ACCEL_XOUT_H, 0xE0, 0x00);
        // Gyro y = 131 LSB = ~1 dps
        t.set_pair(GYRO_YOUT_H, 0x00, 0x83);
        // Temp 3339 LSB
        t.set_pair(TEMP_OUT_H, 0x0D, 0x0B);
        // Mag: ST1 ready, x = 100 (little-endian), y = -100, ST2 clear
        t.set(EXT_SENS_DATA_00, AK8963_ST1_DRDY);
        t.set_pair(EXT_SENS_DATA_00 + 1, 0x64, 0x00);
        t.set_pair(EXT_SENS_DATA_00 + 3, 0x9C, 0xFF);
        t.set(EXT_SENS_DATA_00 + 7, AK8963_16BIT << 4);

        let s = mpu.get_data().unwrap();
        assert_close(s.accel_g.z, 1.0);
        assert_close(s.accel_g.x, -0.5);
        assert_close(s.gyro_dps.y, 131.0 * 250.0 / 32768.0);
        assert_close(s.temp_c, 3339.0 / 333.87 + 21.0);

        let mag = s.mag_ut.unwrap();
        assert_close(mag.x, 100.0 * 1.0 * MAG_RESOLUTION_16BIT);
        assert_close(mag.y, -100.0 * 1.25 * MAG_RESOLUTION_16BIT);
        assert_close(mag.z, 0.0);
    }

    #[test]
    fn test_get_data_mag_flags() {
        let mut mpu = started(device());
        mpu.transport.set(INT_STATUS, 0x01);
        mpu.transport.set_pair(EXT_SENS_DATA_00 + 1, 0x64, 0x00);

        // Not ready
        mpu.transport.set(EXT_SENS_DATA_00, 0x00);
        assert!(mpu.get_data().unwrap().mag_ut.is_none());

        // Overflow
        mpu.transport.set(EXT_SENS_DATA_00, AK8963_ST1_DRDY);
        mpu.transport.set(EXT_SENS_DATA_00 + 7, AK8963_ST2_HOFL);
        assert!(mpu.get_data().unwrap().mag_ut.is_none());

        mpu.transport.set(EXT_SENS_DATA_00 + 7, 0x00);
        assert!(mpu.get_data().unwrap().mag_ut.is_some());
    }

    #[test]
    fn test_get_data_errors() {
        let mut mpu = started(device());

        mpu.transport.set(INT_STATUS, 0x00);
        assert_eq!(mpu.get_data(), Err(SensorError::DataNotReady));

        mpu.transport.set(INT_STATUS, 0x01);
        mpu.transport.fail(GYRO_XOUT_H);
        assert!(matches!(mpu.get_data(), Err(SensorError::Bus(_))));

        mpu.transport.heal(GYRO_XOUT_H);
        assert!(mpu.get_data().is_ok());
    }
}

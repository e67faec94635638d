//! # Telemetry module
//!
//! The mower's state snapshot and the envelope it is published in. Field
//! names are the snake_case names existing operator clients expect.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Serialize, Deserialize};

// Internal
use crate::tc::Direction;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Namespace of every state message.
pub const STATE_NAMESPACE: &str = "mower";

/// Mutation name of every state message.
pub const STATE_MUTATION: &str = "setMowerState";

/// Status label used before a subsystem has reported.
pub const STATUS_UNKNOWN: &str = "Unknown";

/// Status label of a subsystem which is reporting nominally.
pub const STATUS_OK: &str = "OK";

/// Battery status label when the voltage is below the warning threshold.
pub const STATUS_LOW: &str = "Low";

/// Drive speed applied at startup.
pub const DEFAULT_DRIVE_SPEED: u8 = 100;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The single authoritative snapshot of the mower's telemetry and actuation
/// targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MowerState {
    pub platform: PlatformState,
    pub battery: BatteryState,

    /// Heading information, published as `compass`
    #[serde(rename = "compass")]
    pub orientation: OrientationState,

    pub gps: GpsState,
    pub drive: DriveState,
    pub cutter: CutterState,
}

/// Host platform information.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlatformState {
    pub hostname: String,
    pub operating_system: String,
    pub platform: String,
    pub cpu_load: CpuLoad,
    pub load_average: LoadAverage,
    pub memory_usage: MemoryUsage,
    pub disk_usage: DiskUsage,
}

/// CPU usage in percent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CpuLoad {
    /// Number of cores
    pub count: usize,

    /// Aggregate usage across all cores
    pub total: f64,

    /// Usage of each core
    pub cores: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct LoadAverage {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

/// Memory usage in bytes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryUsage {
    pub total: u64,
    pub available: u64,
}

/// Disk usage in bytes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct DiskUsage {
    pub total: u64,
    pub free: u64,
}

/// Battery state. Voltages in volts, current as reported by the power
/// monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatteryState {
    pub status: String,
    pub voltage_nominal: f64,
    pub voltage_warn: f64,
    pub voltage: f64,
    pub current: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrientationState {
    pub status: String,

    /// One of the sixteen compass point labels
    pub bearing: String,

    /// Heading in degrees, [0, 360)
    pub heading: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpsState {
    pub status: String,
    pub coordinates: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriveState {
    pub speed: u8,
    pub direction: Direction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CutterState {
    pub speed: u8,
}

/// The envelope a state snapshot is published in.
#[derive(Debug, Serialize)]
pub struct StateMessage<'a> {
    pub namespace: &'static str,
    pub mutation: &'static str,

    #[serde(flatten)]
    pub state: &'a MowerState,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MowerState {
    /// Create the startup state with the given battery thresholds.
    pub fn new(voltage_nominal: f64, voltage_warn: f64) -> Self {
        Self {
            platform: PlatformState::default(),
            battery: BatteryState {
                status: STATUS_UNKNOWN.into(),
                voltage_nominal,
                voltage_warn,
                voltage: 0.0,
                current: 0.0,
            },
            orientation: OrientationState {
                status: STATUS_UNKNOWN.into(),
                bearing: "N".into(),
                heading: 0.0,
            },
            gps: GpsState {
                status: STATUS_UNKNOWN.into(),
                coordinates: String::new(),
            },
            drive: DriveState {
                speed: DEFAULT_DRIVE_SPEED,
                direction: Direction::Stopped,
            },
            cutter: CutterState {
                speed: 0
            }
        }
    }

    /// Serialise the state into a state message.
    pub fn to_message_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&StateMessage::new(self))
    }
}

impl<'a> StateMessage<'a> {
    pub fn new(state: &'a MowerState) -> Self {
        Self {
            namespace: STATE_NAMESPACE,
            mutation: STATE_MUTATION,
            state
        }
    }
}

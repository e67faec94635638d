//! # Telecommand module
//!
//! This module provides telecommand functionality to the communications 
//! interface. Operator clients send commands as JSON text frames of the form
//! `{"method": "...", "value": "..."}`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Serialize, Deserialize};
use serde_json::{self, Value};
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Maximum accepted drive or cutter speed.
pub const MAX_SPEED: u8 = 100;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The raw command message as received from a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandMessage {
    /// Name of the method to invoke
    pub method: String,

    /// Argument of the method, usually a string. Absent for methods which
    /// take no argument.
    #[serde(default)]
    pub value: Value
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A telecommand, i.e. an instruction sent to the mower by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tc {
    /// Set the target drive speed
    SetDriveSpeed(u8),

    /// Set the target cutter speed
    SetCutterSpeed(u8),

    /// Start driving in the given direction
    DirectionStart(Direction),

    /// Stop driving
    DirectionStop
}

/// Drive direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Reverse,
    Stopped
}

/// Possible parsing errors.
#[derive(Debug, Error)]
pub enum TcParseError {
    #[error("TC contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("TC has an unknown method ({0})")]
    UnknownMethod(String),

    #[error("TC {method} has an invalid value ({value})")]
    InvalidValue {
        method: String,
        value: String
    },

    #[error("TC {method} speed {value} is outside the range 0 to {}", MAX_SPEED)]
    SpeedOutOfRange {
        method: String,
        value: i64
    }
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Tc {

    /// Parse a new TC from a JSON packet
    pub fn from_json(json_str: &str) -> Result<Self, TcParseError> {
        let msg: CommandMessage = serde_json::from_str(json_str)
            .map_err(TcParseError::InvalidJson)?;

        Self::from_message(&msg)
    }

    /// Interpret an already decoded command message
    pub fn from_message(msg: &CommandMessage) -> Result<Self, TcParseError> {
        match msg.method.as_str() {
            "setMowerDriveSpeed" => Ok(Tc::SetDriveSpeed(parse_speed(msg)?)),
            "setMowerCutterSpeed" => Ok(Tc::SetCutterSpeed(parse_speed(msg)?)),
            "requestDirectionStart" => {
                let dir = msg.value
                    .as_str()
                    .and_then(Direction::from_str)
                    .ok_or_else(|| invalid_value(msg))?;
                Ok(Tc::DirectionStart(dir))
            },
            "requestDirectionStop" => Ok(Tc::DirectionStop),
            m => Err(TcParseError::UnknownMethod(m.to_string()))
        }
    }
}

impl Direction {
    fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "forward" => Some(Direction::Forward),
            "reverse" => Some(Direction::Reverse),
            "stopped" => Some(Direction::Stopped),
            _ => None
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
            Direction::Stopped => "stopped"
        };
        write!(f, "{}", s)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Parse the speed argument of a message. Clients send the speed as a decimal
/// string, bare integers are also accepted.
fn parse_speed(msg: &CommandMessage) -> Result<u8, TcParseError> {
    let speed = match &msg.value {
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None
    }
    .ok_or_else(|| invalid_value(msg))?;

    if speed < 0 || speed > MAX_SPEED as i64 {
        return Err(TcParseError::SpeedOutOfRange {
            method: msg.method.clone(),
            value: speed
        })
    }

    Ok(speed as u8)
}

fn invalid_value(msg: &CommandMessage) -> TcParseError {
    TcParseError::InvalidValue {
        method: msg.method.clone(),
        value: msg.value.to_string()
    }
}

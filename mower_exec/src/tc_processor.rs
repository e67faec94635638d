//! # Telecommand processor module
//!
//! The telecommand processor applies operator commands to the mower state.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::debug;

// Internal
use comms_if::{
    tc::{Direction, Tc},
    tm::MowerState
};

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Execute a telecommand.
///
/// Mutates the mower state to reflect the new actuation targets.
pub fn exec(state: &mut MowerState, tc: &Tc) {

    // Handle different Tcs
    match tc {
        Tc::SetDriveSpeed(s) => {
            debug!("Recieved SetDriveSpeed({}) command", s);
            state.drive.speed = *s;
        },
        Tc::SetCutterSpeed(s) => {
            debug!("Recieved SetCutterSpeed({}) command", s);
            state.cutter.speed = *s;
        },
        Tc::DirectionStart(d) => {
            debug!("Recieved DirectionStart({}) command", d);
            state.drive.direction = *d;
        },
        Tc::DirectionStop => {
            debug!("Recieved DirectionStop command");
            state.drive.direction = Direction::Stopped;
        }
    }

}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_exec() {
        let mut state = MowerState::new(24.3, 23.0);

        exec(&mut state, &Tc::SetDriveSpeed(40));
        exec(&mut state, &Tc::DirectionStart(Direction::Forward));
        assert_eq!(state.drive.speed, 40);
        assert_eq!(state.drive.direction, Direction::Forward);

        exec(&mut state, &Tc::DirectionStart(Direction::Reverse));
        assert_eq!(state.drive.direction, Direction::Reverse);
    }

    #[test]
    fn test_cutter_speed_idempotent() {
        let mut once = MowerState::new(24.3, 23.0);
        exec(&mut once, &Tc::SetCutterSpeed(75));

        let mut twice = once.clone();
        exec(&mut twice, &Tc::SetCutterSpeed(75));

        assert_eq!(once, twice);
        assert_eq!(twice.cutter.speed, 75);
    }

    #[test]
    fn test_stop_always_stops() {
        for start in &[Direction::Forward, Direction::Reverse, Direction::Stopped] {
            let mut state = MowerState::new(24.3, 23.0);
            state.drive.direction = *start;
            exec(&mut state, &Tc::DirectionStop);
            assert_eq!(state.drive.direction, Direction::Stopped);
        }
    }
}

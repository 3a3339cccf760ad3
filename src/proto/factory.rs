// Typed constructors for every command the robot firmware understands.
//
// 16-bit numbers go out big-endian; optional direction bytes are appended
// only when the caller picks a direction.

use super::command::{
    Category, Command, CommandError, ResponsePolicy, action as action_id,
    configuration as configuration_id, general as general_id,
};
use crate::frame::split_u16;
use crate::radio::BROADCAST_ID;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Forward,
    Backward,
}

impl MoveDirection {
    pub fn reversed(self) -> Self {
        match self {
            MoveDirection::Forward => MoveDirection::Backward,
            MoveDirection::Backward => MoveDirection::Forward,
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            MoveDirection::Forward => 1,
            MoveDirection::Backward => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateDirection {
    Clockwise,
    CounterClockwise,
}

impl RotateDirection {
    fn as_byte(self) -> u8 {
        match self {
            RotateDirection::Clockwise => 1,
            RotateDirection::CounterClockwise => 0,
        }
    }
}

// Fixed-size parameter blocks can never overflow the payload.
fn fixed(category: Category, id: u8, params: Vec<u8>, policy: ResponsePolicy) -> Command {
    match Command::new(category, id, params, policy) {
        Ok(cmd) => cmd,
        Err(e) => unreachable!("fixed command layout rejected: {e}"),
    }
}

pub mod general {
    use super::*;

    pub fn reboot() -> Command {
        fixed(
            Category::General,
            general_id::REBOOT,
            vec![],
            ResponsePolicy::Single,
        )
    }

    /// Identity claim: the robot that owns `id` answers `Success`.
    pub fn set_id(id: u8) -> Result<Command, CommandError> {
        if id == BROADCAST_ID {
            return Err(CommandError::ReservedId(id));
        }
        Ok(fixed(
            Category::General,
            general_id::SET_ID,
            vec![id],
            ResponsePolicy::Single,
        ))
    }
}

pub mod action {
    use super::*;

    pub fn cancel_movement() -> Command {
        fixed(
            Category::Action,
            action_id::CANCEL_MOVEMENT,
            vec![],
            ResponsePolicy::Single,
        )
    }

    pub fn start_move_mm(mm: u16, direction: Option<MoveDirection>) -> Command {
        let mut params = split_u16(mm).to_vec();
        if let Some(d) = direction {
            params.push(d.as_byte());
        }
        fixed(
            Category::Action,
            action_id::START_MOVE_MM,
            params,
            ResponsePolicy::StartedThenDone,
        )
    }

    pub fn start_rotate_degrees(degrees: u16, direction: RotateDirection) -> Command {
        let [hi, lo] = split_u16(degrees);
        fixed(
            Category::Action,
            action_id::START_ROTATE_DEGREES,
            vec![hi, lo, direction.as_byte()],
            ResponsePolicy::StartedThenDone,
        )
    }

    pub fn set_speed(speed: u8) -> Command {
        fixed(
            Category::Action,
            action_id::SET_SPEED,
            vec![speed],
            ResponsePolicy::Single,
        )
    }
}

pub mod configuration {
    use super::*;

    pub fn set_value(config_id: u8, value: &[u8]) -> Result<Command, CommandError> {
        let mut params = Vec::with_capacity(value.len() + 1);
        params.push(config_id);
        params.extend_from_slice(value);
        Command::new(
            Category::Configuration,
            configuration_id::SET_VALUE,
            params,
            ResponsePolicy::Single,
        )
    }

    pub fn get_value(config_id: u8) -> Command {
        single(configuration_id::GET_VALUE, vec![config_id])
    }

    pub fn load() -> Command {
        single(configuration_id::LOAD, vec![])
    }

    pub fn store() -> Command {
        single(configuration_id::STORE, vec![])
    }

    pub fn print_all() -> Command {
        single(configuration_id::PRINT_ALL, vec![])
    }

    pub fn get_info(config_id: u8) -> Command {
        single(configuration_id::GET_INFO, vec![config_id])
    }

    pub fn get_configuration_count() -> Command {
        single(configuration_id::GET_CONFIGURATION_COUNT, vec![])
    }

    fn single(id: u8, params: Vec<u8>) -> Command {
        fixed(Category::Configuration, id, params, ResponsePolicy::Single)
    }
}

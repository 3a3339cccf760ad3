use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use super::response::ReturnCode;
use crate::frame::{HEADER_LEN, MAX_PAYLOAD};

/// Largest parameter block that still fits one radio payload.
pub const MAX_PARAMETERS: usize = MAX_PAYLOAD - HEADER_LEN;

/// Highest command id representable in the 5-bit header field.
pub const MAX_COMMAND_ID: u8 = 0x1F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Category {
    General = 0,
    Action = 1,
    Measurement = 2,
    Configuration = 3,
}

/// How many responses a command produces before its exchange is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePolicy {
    /// Exactly one response, whatever its code.
    Single,
    /// `ActionStarted` first, then exactly one terminal response.
    StartedThenDone,
}

impl ResponsePolicy {
    pub fn is_terminal(self, code: ReturnCode) -> bool {
        match self {
            ResponsePolicy::Single => true,
            ResponsePolicy::StartedThenDone => code != ReturnCode::ActionStarted,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("parameter {name}={value} does not fit in {bits} bits")]
    OutOfRange {
        name: &'static str,
        value: i64,
        bits: u32,
    },
    #[error("parameter block of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("robot id {0} is reserved for broadcast")]
    ReservedId(u8),
}

/// Outbound command. Built only through the factories in `proto::factory`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    category: Category,
    command_id: u8,
    parameters: Vec<u8>,
    policy: ResponsePolicy,
    message_id: Option<u8>,
}

impl Command {
    pub(super) fn new(
        category: Category,
        command_id: u8,
        parameters: Vec<u8>,
        policy: ResponsePolicy,
    ) -> Result<Self, CommandError> {
        if command_id > MAX_COMMAND_ID {
            return Err(CommandError::OutOfRange {
                name: "command_id",
                value: command_id as i64,
                bits: 5,
            });
        }
        if parameters.len() > MAX_PARAMETERS {
            return Err(CommandError::PayloadTooLarge {
                len: parameters.len(),
                max: MAX_PARAMETERS,
            });
        }
        Ok(Self {
            category,
            command_id,
            parameters,
            policy,
            message_id: None,
        })
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn command_id(&self) -> u8 {
        self.command_id
    }

    pub fn parameters(&self) -> &[u8] {
        &self.parameters
    }

    pub fn policy(&self) -> ResponsePolicy {
        self.policy
    }

    /// Message id this command went out with, once sent.
    pub fn message_id(&self) -> Option<u8> {
        self.message_id
    }

    pub(crate) fn assign_message_id(&mut self, message_id: u8) {
        self.message_id = Some(message_id);
    }

    pub fn name(&self) -> &'static str {
        command_name(self.category, self.command_id)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{} params={:?}", self.category, self.name(), self.parameters)
    }
}

/* ---------- registry ---------- */

pub mod general {
    pub const REBOOT: u8 = 0;
    pub const SET_ID: u8 = 1;
}

pub mod action {
    pub const CANCEL_MOVEMENT: u8 = 0;
    pub const START_MOVE_MM: u8 = 1;
    pub const START_ROTATE_DEGREES: u8 = 2;
    pub const SET_SPEED: u8 = 3;
}

pub mod configuration {
    pub const SET_VALUE: u8 = 0;
    pub const GET_VALUE: u8 = 1;
    pub const LOAD: u8 = 2;
    pub const STORE: u8 = 3;
    pub const PRINT_ALL: u8 = 4;
    pub const GET_INFO: u8 = 5;
    pub const GET_CONFIGURATION_COUNT: u8 = 6;
}

pub fn command_name(category: Category, command_id: u8) -> &'static str {
    match (category, command_id) {
        (Category::General, general::REBOOT) => "reboot",
        (Category::General, general::SET_ID) => "set_id",
        (Category::Action, action::CANCEL_MOVEMENT) => "cancel_movement",
        (Category::Action, action::START_MOVE_MM) => "start_move_mm",
        (Category::Action, action::START_ROTATE_DEGREES) => "start_rotate_degrees",
        (Category::Action, action::SET_SPEED) => "set_speed",
        (Category::Configuration, configuration::SET_VALUE) => "set_value",
        (Category::Configuration, configuration::GET_VALUE) => "get_value",
        (Category::Configuration, configuration::LOAD) => "load",
        (Category::Configuration, configuration::STORE) => "store",
        (Category::Configuration, configuration::PRINT_ALL) => "print_all",
        (Category::Configuration, configuration::GET_INFO) => "get_info",
        (Category::Configuration, configuration::GET_CONFIGURATION_COUNT) => {
            "get_configuration_count"
        }
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wide_command_id() {
        let err = Command::new(Category::General, 32, vec![], ResponsePolicy::Single).unwrap_err();
        assert!(matches!(err, CommandError::OutOfRange { bits: 5, .. }));
    }

    #[test]
    fn rejects_oversized_parameters() {
        let err = Command::new(
            Category::Configuration,
            configuration::SET_VALUE,
            vec![0; MAX_PARAMETERS + 1],
            ResponsePolicy::Single,
        )
        .unwrap_err();
        assert_eq!(
            err,
            CommandError::PayloadTooLarge {
                len: 31,
                max: 30
            }
        );
    }

    #[test]
    fn started_then_done_keeps_waiting_on_action_started() {
        let p = ResponsePolicy::StartedThenDone;
        assert!(!p.is_terminal(ReturnCode::ActionStarted));
        assert!(p.is_terminal(ReturnCode::Success));
        assert!(p.is_terminal(ReturnCode::RobotBusy));
        assert!(ResponsePolicy::Single.is_terminal(ReturnCode::ActionStarted));
    }

    #[test]
    fn display_names_command() {
        let cmd = Command::new(
            Category::Action,
            action::SET_SPEED,
            vec![40],
            ResponsePolicy::Single,
        )
        .unwrap();
        assert_eq!(cmd.to_string(), "Action/set_speed params=[40]");
        assert_eq!(cmd.message_id(), None);
    }
}

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ReturnCode {
    Success = 0,
    ActionStarted = 1,
    RobotBusy = 2,
    HardwareError = 3,
    NoSuchSensor = 4,
    BadParameters = 5,
    CommandParseError = 6,
    UnknownCommandCategory = 7,
    UnknownCommand = 8,
    /// Used by the robot firmware internally; never expected on the wire.
    NoResponse = 9,
    IdAlreadySet = 10,
}

impl ReturnCode {
    pub fn is_error(self) -> bool {
        !matches!(self, ReturnCode::Success | ReturnCode::ActionStarted)
    }
}

/// Inbound response. Only `frame::decode` creates these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    message_id: u8,
    return_code: ReturnCode,
    data: Vec<u8>,
}

impl Response {
    pub(crate) fn from_wire(message_id: u8, return_code: ReturnCode, data: Vec<u8>) -> Self {
        Self {
            message_id,
            return_code,
            data,
        }
    }

    pub fn message_id(&self) -> u8 {
        self.message_id
    }

    pub fn return_code(&self) -> ReturnCode {
        self.return_code
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

pub mod command;
pub mod factory;
pub mod response;

pub use command::{Command, CommandError};
pub use factory::{MoveDirection, RotateDirection};
pub use response::{Response, ReturnCode};

use anyhow::{Context, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::frame::MAX_PAYLOAD;
use crate::proto::{MoveDirection, RotateDirection};
use crate::radio::{PipeAddress, PipeAllocator, RadioSettings};
use crate::scenario::ScenarioKind;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "fleet-radio",
    about = "Radio link, fleet tracking and calibration for small warehouse robots"
)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Track markers, claim robots and keep the link serviced
    Run(RunOpts),
    /// Send one command to a robot whose id is already set
    Robot(RobotOpts),
    /// Run a calibration scenario on one robot
    Scenario(ScenarioOpts),
    /// Read (and optionally change) a robot's configuration
    Config(ConfigOpts),
    /// Print what every calibration scenario does
    Describe,
}

#[derive(Args, Debug, Clone)]
pub struct RadioOpts {
    /// Serial device of the radio bridge
    #[arg(long, default_value = "/dev/ttyACM0")]
    pub radio_dev: String,
    /// Baud rate of the radio bridge
    #[arg(long, default_value_t = 115_200)]
    pub radio_baud: u32,
    /// RF channel
    #[arg(long, default_value_t = 50)]
    pub channel: u8,
    /// Hardware retransmits per write
    #[arg(long, default_value_t = 15)]
    pub retries: u8,
    /// Broadcast address, 10 hex digits ending in FF
    #[arg(long, default_value = "E0E0F1F1FF")]
    pub broadcast_addr: PipeAddress,
}

impl RadioOpts {
    pub fn settings(&self) -> RadioSettings {
        RadioSettings {
            channel: self.channel,
            retries: self.retries,
            payload_size: MAX_PAYLOAD as u8,
        }
    }

    pub fn allocator(&self) -> anyhow::Result<PipeAllocator> {
        PipeAllocator::new(self.broadcast_addr)
            .map_err(|e| anyhow!(e))
            .context("invalid --broadcast-addr")
    }
}

#[derive(Args, Debug, Clone)]
pub struct VisionOpts {
    /// Serial device streaming marker poses
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub vision_dev: String,
    /// Baud rate of the pose stream
    #[arg(long, default_value_t = 115_200)]
    pub vision_baud: u32,
}

#[derive(Args, Debug, Clone)]
pub struct RunOpts {
    #[command(flatten)]
    pub radio: RadioOpts,
    #[command(flatten)]
    pub vision: VisionOpts,
    /// Marker ids on the area corners; never claimed as robots
    #[arg(long, value_delimiter = ',', default_value = "0,1,2,3")]
    pub corners: Vec<u32>,
    /// Control loop period in milliseconds
    #[arg(long, default_value_t = 10)]
    pub tick_ms: u64,
    /// Stats print interval in seconds
    #[arg(long, default_value_t = 5.0)]
    pub stats: f64,
}

#[derive(Args, Debug, Clone)]
pub struct RobotOpts {
    #[command(flatten)]
    pub radio: RadioOpts,
    /// Robot id
    #[arg(long)]
    pub id: u8,
    #[command(subcommand)]
    pub action: RobotAction,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heading {
    Forward,
    Backward,
}

impl From<Heading> for MoveDirection {
    fn from(h: Heading) -> Self {
        match h {
            Heading::Forward => MoveDirection::Forward,
            Heading::Backward => MoveDirection::Backward,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum RobotAction {
    /// Drive a distance in millimetres
    Move {
        mm: u16,
        /// Direction; the robot picks its default when omitted
        #[arg(long, value_enum)]
        direction: Option<Heading>,
    },
    /// Turn in place
    Rotate {
        degrees: u16,
        /// Turn counter-clockwise
        #[arg(long, default_value_t = false)]
        ccw: bool,
    },
    /// Set the drive speed
    Speed { speed: u8 },
    /// Stop the current movement
    Cancel,
    Reboot,
}

impl RobotAction {
    pub fn rotate_direction(ccw: bool) -> RotateDirection {
        if ccw {
            RotateDirection::CounterClockwise
        } else {
            RotateDirection::Clockwise
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ScenarioOpts {
    #[command(flatten)]
    pub radio: RadioOpts,
    #[command(flatten)]
    pub vision: VisionOpts,
    /// Robot id
    #[arg(long)]
    pub robot: u8,
    #[arg(long, value_enum)]
    pub kind: ScenarioKind,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigOpts {
    #[command(flatten)]
    pub radio: RadioOpts,
    /// Robot id
    #[arg(long)]
    pub robot: u8,
    /// Change one value, as id=value
    #[arg(long, value_parser = parse_assignment)]
    pub set: Option<(u8, String)>,
    /// Store the configuration and reboot the robot afterwards
    #[arg(long, default_value_t = false)]
    pub store: bool,
    /// Reload the stored configuration on the robot before reading it
    #[arg(long, default_value_t = false)]
    pub reload: bool,
    /// Have the robot print its configuration on its own console
    #[arg(long, default_value_t = false)]
    pub dump: bool,
}

fn parse_assignment(s: &str) -> Result<(u8, String), String> {
    let (id, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected id=value, got {s:?}"))?;
    let id = id
        .trim()
        .parse::<u8>()
        .map_err(|_| format!("config id must be 0..=255, got {id:?}"))?;
    Ok((id, value.to_string()))
}

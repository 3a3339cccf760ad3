use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub mod bridge;
pub mod bridge_proto;
#[cfg(test)]
pub mod mock;

/// Last address byte reserved for the broadcast pipe.
pub const BROADCAST_ID: u8 = 0xFF;
/// Hardware receive pipes; pipe 0 listens on the broadcast address.
pub const RX_PIPES: u8 = 6;
pub const BROADCAST_SLOT: u8 = 0;

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("serial i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("bridge protocol: {0}")]
    Protocol(#[from] bridge_proto::BridgeParseError),
    #[error("bridge sent unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("bridge did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("bridge reported: {0}")]
    Bridge(String),
}

/// 5-byte pipe address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeAddress(pub [u8; 5]);

impl PipeAddress {
    pub fn prefix(&self) -> [u8; 4] {
        [self.0[0], self.0[1], self.0[2], self.0[3]]
    }

    pub fn last(&self) -> u8 {
        self.0[4]
    }
}

impl fmt::Display for PipeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl FromStr for PipeAddress {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bridge_proto::hex_decode(s).map_err(|e| e.to_string())?;
        let arr: [u8; 5] = bytes
            .try_into()
            .map_err(|_| format!("address must be 5 bytes: {s}"))?;
        Ok(PipeAddress(arr))
    }
}

/// Derives one address per robot from the broadcast template `[a,b,c,d,0xFF]`.
#[derive(Debug, Clone, Copy)]
pub struct PipeAllocator {
    template: PipeAddress,
}

impl PipeAllocator {
    pub fn new(template: PipeAddress) -> Result<Self, String> {
        if template.last() != BROADCAST_ID {
            return Err(format!(
                "broadcast address {template} must end in {BROADCAST_ID:02X}"
            ));
        }
        Ok(Self { template })
    }

    pub fn broadcast(&self) -> PipeAddress {
        self.template
    }

    /// Write and read address for a robot; `None` for the broadcast id.
    pub fn address_for(&self, robot_id: u8) -> Option<PipeAddress> {
        if robot_id == BROADCAST_ID {
            return None;
        }
        let [a, b, c, d] = self.template.prefix();
        Some(PipeAddress([a, b, c, d, robot_id]))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RadioSettings {
    pub channel: u8,
    pub retries: u8,
    pub payload_size: u8,
}

/// Synchronous driver boundary of the packet radio.
pub trait Transceiver {
    fn configure(&mut self, settings: &RadioSettings) -> Result<(), RadioError>;
    fn power_up(&mut self) -> Result<(), RadioError>;
    fn open_write_pipe(&mut self, addr: PipeAddress) -> Result<(), RadioError>;
    fn open_read_pipe(&mut self, slot: u8, addr: PipeAddress) -> Result<(), RadioError>;
    fn set_ack_for_pipe(&mut self, slot: u8, enabled: bool) -> Result<(), RadioError>;
    /// `Ok(false)` when the link layer saw no acknowledgement.
    fn write(&mut self, payload: &[u8]) -> Result<bool, RadioError>;
    fn start_listening(&mut self) -> Result<(), RadioError>;
    fn stop_listening(&mut self) -> Result<(), RadioError>;
    /// Receive pipe holding a payload, if any.
    fn available(&mut self) -> Result<Option<u8>, RadioError>;
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, RadioError>;
}

use std::io::{Read, Write};
use std::time::Duration;

use tracing::{debug, trace};

use super::bridge_proto::{BridgeMsg, format_msg, parse_msg};
use super::{PipeAddress, RadioError, RadioSettings, Transceiver};
use crate::port::{LineBuffer, write_line};

/// How long one request may wait for the bridge's reply line.
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(250);

/// Transceiver attached to a serial bridge board.
pub struct SerialBridge<P> {
    port: P,
    lines: LineBuffer,
    reply_timeout: Duration,
}

impl<P: Read + Write> SerialBridge<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            lines: LineBuffer::new(),
            reply_timeout: REPLY_TIMEOUT,
        }
    }

    /// Send one request and wait for its reply.
    fn request(&mut self, msg: BridgeMsg) -> Result<BridgeMsg, RadioError> {
        let line = format_msg(&msg);
        trace!(line = line.trim_end(), "bridge <-");
        write_line(&mut self.port, &line)?;

        let Some(reply) = self.lines.read_line(&mut self.port, self.reply_timeout)? else {
            return Err(RadioError::Timeout(self.reply_timeout));
        };
        trace!(line = reply.as_str(), "bridge ->");
        match parse_msg(&reply)? {
            BridgeMsg::Fault { reason } => Err(RadioError::Bridge(reason)),
            other => Ok(other),
        }
    }

    fn expect_ack(&mut self, msg: BridgeMsg) -> Result<(), RadioError> {
        match self.request(msg)? {
            BridgeMsg::Ack => Ok(()),
            other => Err(RadioError::UnexpectedReply(format!("{other:?}"))),
        }
    }
}

impl<P: Read + Write> Transceiver for SerialBridge<P> {
    fn configure(&mut self, settings: &RadioSettings) -> Result<(), RadioError> {
        debug!(?settings, "configuring radio");
        self.expect_ack(BridgeMsg::Setup {
            channel: settings.channel,
            retries: settings.retries,
            payload: settings.payload_size,
        })
    }

    fn power_up(&mut self) -> Result<(), RadioError> {
        self.expect_ack(BridgeMsg::PowerUp)
    }

    fn open_write_pipe(&mut self, addr: PipeAddress) -> Result<(), RadioError> {
        self.expect_ack(BridgeMsg::OpenWrite { addr })
    }

    fn open_read_pipe(&mut self, slot: u8, addr: PipeAddress) -> Result<(), RadioError> {
        self.expect_ack(BridgeMsg::OpenRead { slot, addr })
    }

    fn set_ack_for_pipe(&mut self, slot: u8, enabled: bool) -> Result<(), RadioError> {
        self.expect_ack(BridgeMsg::AutoAck { slot, on: enabled })
    }

    fn write(&mut self, payload: &[u8]) -> Result<bool, RadioError> {
        match self.request(BridgeMsg::Write {
            pay: payload.to_vec(),
        })? {
            BridgeMsg::WriteDone { acked } => Ok(acked),
            other => Err(RadioError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    fn start_listening(&mut self) -> Result<(), RadioError> {
        self.expect_ack(BridgeMsg::ListenStart)
    }

    fn stop_listening(&mut self) -> Result<(), RadioError> {
        self.expect_ack(BridgeMsg::ListenStop)
    }

    fn available(&mut self) -> Result<Option<u8>, RadioError> {
        match self.request(BridgeMsg::Poll)? {
            BridgeMsg::Avail { slot } => Ok(slot),
            other => Err(RadioError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, RadioError> {
        let max = u8::try_from(max_len).unwrap_or(u8::MAX);
        match self.request(BridgeMsg::Read { max })? {
            BridgeMsg::Data { mut pay } => {
                pay.truncate(max_len);
                Ok(pay)
            }
            other => Err(RadioError::UnexpectedReply(format!("{other:?}"))),
        }
    }
}

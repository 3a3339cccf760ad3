use anyhow::Result;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// Per-read timeout; keeps every blocking read short so the control loop keeps ticking.
pub const READ_TIMEOUT: Duration = Duration::from_millis(10);

pub fn open_port(dev: &str, baud: u32) -> Result<Box<dyn SerialPort>> {
    let builder = serialport::new(dev, baud)
        .timeout(READ_TIMEOUT)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None);

    builder
        .open()
        .map_err(|e| anyhow::anyhow!("open {}: {}", dev, e))
}

pub fn write_line<W: Write + ?Sized>(port: &mut W, line: &str) -> io::Result<()> {
    port.write_all(line.as_bytes())?;
    port.flush()
}

/// Accumulates bytes across reads so a line split by a read timeout is not lost.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next complete CR/LF-terminated line, waiting at most `budget`.
    ///
    /// At least one read is attempted even with a zero budget. `Ok(None)` means
    /// no complete line arrived in time (or the stream ended).
    pub fn read_line<R: Read + ?Sized>(
        &mut self,
        port: &mut R,
        budget: Duration,
    ) -> io::Result<Option<String>> {
        let start = Instant::now();
        let mut chunk = [0u8; 64];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            match port.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e),
            }
            if start.elapsed() >= budget {
                return Ok(self.take_line());
            }
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.buf.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        Some(line)
    }
}

// In-memory transceiver for tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::{PipeAddress, RadioError, RadioSettings, Transceiver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Configure,
    PowerUp,
    OpenWrite(PipeAddress),
    OpenRead(u8, PipeAddress),
    SetAck(u8, bool),
    Write(Vec<u8>),
    StartListening,
    StopListening,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub calls: Vec<MockCall>,
    pub inbound: VecDeque<(u8, Vec<u8>)>,
    /// Writes that will report a missing acknowledgement.
    pub unacked_writes: usize,
    /// Writes that fail outright, as a bridge error.
    pub broken_writes: usize,
}

/// Cloneable handle; the test keeps one clone while the link owns another.
#[derive(Debug, Clone, Default)]
pub struct MockRadio {
    state: Rc<RefCell<MockState>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&self, slot: u8, payload: &[u8]) {
        self.state
            .borrow_mut()
            .inbound
            .push_back((slot, payload.to_vec()));
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.state.borrow_mut().unacked_writes = n;
    }

    pub fn break_next_writes(&self, n: usize) {
        self.state.borrow_mut().broken_writes = n;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.borrow().calls.clone()
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Write(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    fn record(&self, call: MockCall) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl Transceiver for MockRadio {
    fn configure(&mut self, _settings: &RadioSettings) -> Result<(), RadioError> {
        self.record(MockCall::Configure);
        Ok(())
    }

    fn power_up(&mut self) -> Result<(), RadioError> {
        self.record(MockCall::PowerUp);
        Ok(())
    }

    fn open_write_pipe(&mut self, addr: PipeAddress) -> Result<(), RadioError> {
        self.record(MockCall::OpenWrite(addr));
        Ok(())
    }

    fn open_read_pipe(&mut self, slot: u8, addr: PipeAddress) -> Result<(), RadioError> {
        self.record(MockCall::OpenRead(slot, addr));
        Ok(())
    }

    fn set_ack_for_pipe(&mut self, slot: u8, enabled: bool) -> Result<(), RadioError> {
        self.record(MockCall::SetAck(slot, enabled));
        Ok(())
    }

    fn write(&mut self, payload: &[u8]) -> Result<bool, RadioError> {
        self.record(MockCall::Write(payload.to_vec()));
        let mut st = self.state.borrow_mut();
        if st.broken_writes > 0 {
            st.broken_writes -= 1;
            return Err(RadioError::Bridge("spi glitch".into()));
        }
        if st.unacked_writes > 0 {
            st.unacked_writes -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    fn start_listening(&mut self) -> Result<(), RadioError> {
        self.record(MockCall::StartListening);
        Ok(())
    }

    fn stop_listening(&mut self) -> Result<(), RadioError> {
        self.record(MockCall::StopListening);
        Ok(())
    }

    fn available(&mut self) -> Result<Option<u8>, RadioError> {
        Ok(self.state.borrow().inbound.front().map(|(slot, _)| *slot))
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, RadioError> {
        let mut payload = self
            .state
            .borrow_mut()
            .inbound
            .pop_front()
            .map(|(_, p)| p)
            .unwrap_or_default();
        payload.truncate(max_len);
        Ok(payload)
    }
}

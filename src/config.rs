// Robot-side configuration table and the exchange that pulls it over the radio.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::link::{Link, LinkError};
use crate::proto::factory::{configuration, general};
use crate::proto::{Command, CommandError, Response, ReturnCode};
use crate::robot::Robot;

/// Attempts per step before the sync gives up.
pub const SYNC_ATTEMPTS: u8 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown value type tag {0:?}")]
    UnknownType(char),
    #[error("{name}: cannot use {text:?} as {ty:?}")]
    BadValue {
        name: String,
        text: String,
        ty: ConfigType,
    },
    #[error("{name}: expected {expected} bytes, got {got}")]
    Truncated {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("no configuration value with id {0}")]
    UnknownId(u8),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Link(#[from] LinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigType {
    Float,
    Int,
    Bool,
    Char,
}

impl ConfigType {
    pub fn from_tag(tag: u8) -> Result<Self, ConfigError> {
        match tag {
            b'f' => Ok(ConfigType::Float),
            b'i' => Ok(ConfigType::Int),
            b'b' => Ok(ConfigType::Bool),
            b'c' => Ok(ConfigType::Char),
            other => Err(ConfigError::UnknownType(char::from(other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Float(f32),
    Int(u32),
    Bool(bool),
    Char(u8),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "{v}"),
        }
    }
}

/// One entry of the robot's configuration. Raw bytes are little-endian.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValue {
    pub id: u8,
    pub ty: ConfigType,
    pub name: String,
    data: Vec<u8>,
}

impl ConfigValue {
    pub fn new(id: u8, ty: ConfigType, name: impl Into<String>) -> Self {
        Self {
            id,
            ty,
            name: name.into(),
            data: Vec::new(),
        }
    }

    /// From a `get_info` answer: type tag byte, then the ASCII name.
    pub fn from_info(id: u8, data: &[u8]) -> Result<Self, ConfigError> {
        let (&tag, name) = data.split_first().ok_or(ConfigError::Truncated {
            name: format!("#{id}"),
            expected: 1,
            got: 0,
        })?;
        let name = String::from_utf8_lossy(name)
            .trim_end_matches('\0')
            .to_string();
        Ok(Self::new(id, ConfigType::from_tag(tag)?, name))
    }

    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    pub fn set_raw(&mut self, data: &[u8]) {
        self.data = data.to_vec();
    }

    /// Decoded value; an empty buffer means the type's default.
    pub fn value(&self) -> Result<Value, ConfigError> {
        if self.data.is_empty() {
            return Ok(match self.ty {
                ConfigType::Float => Value::Float(0.0),
                ConfigType::Int => Value::Int(0),
                ConfigType::Bool => Value::Bool(true),
                ConfigType::Char => Value::Char(0),
            });
        }
        match self.ty {
            ConfigType::Float => Ok(Value::Float(f32::from_le_bytes(self.four()?))),
            ConfigType::Int => Ok(Value::Int(u32::from_le_bytes(self.four()?))),
            ConfigType::Bool => Ok(Value::Bool(self.data[0] > 0)),
            ConfigType::Char => Ok(Value::Char(self.data[0])),
        }
    }

    fn four(&self) -> Result<[u8; 4], ConfigError> {
        self.data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| ConfigError::Truncated {
                name: self.name.clone(),
                expected: 4,
                got: self.data.len(),
            })
    }

    /// Parses user text according to the value's type and stores it.
    pub fn set(&mut self, text: &str) -> Result<(), ConfigError> {
        let bad = || ConfigError::BadValue {
            name: self.name.clone(),
            text: text.to_string(),
            ty: self.ty,
        };
        let text_t = text.trim();
        self.data = match self.ty {
            ConfigType::Float => text_t
                .parse::<f32>()
                .map_err(|_| bad())?
                .to_le_bytes()
                .to_vec(),
            ConfigType::Int => text_t
                .parse::<u32>()
                .map_err(|_| bad())?
                .to_le_bytes()
                .to_vec(),
            ConfigType::Bool => vec![u8::from(text_t.eq_ignore_ascii_case("true") || text_t == "1")],
            ConfigType::Char => vec![text_t.parse::<u8>().map_err(|_| bad())?],
        };
        Ok(())
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Ok(v) => write!(f, "{:>3} {:<40} {v}", self.id, self.name),
            Err(_) => write!(f, "{:>3} {:<40} <raw {:02X?}>", self.id, self.name, self.data),
        }
    }
}

/* ---------- synchronisation ---------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Count,
    Info(u8),
    Value(u8),
}

impl Step {
    fn command(self) -> Command {
        match self {
            Step::Count => configuration::get_configuration_count(),
            Step::Info(id) => configuration::get_info(id),
            Step::Value(id) => configuration::get_value(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Running,
    Synced,
    Failed,
}

struct SyncInner {
    robot: Robot,
    phase: SyncPhase,
    count: u8,
    values: BTreeMap<u8, ConfigValue>,
    attempts: u8,
}

/// Pulls a robot's configuration table: count, then every info, then every
/// value. Clones share the same table.
#[derive(Clone)]
pub struct ConfigSync {
    inner: Rc<RefCell<SyncInner>>,
}

impl ConfigSync {
    pub fn new(robot: Robot) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SyncInner {
                robot,
                phase: SyncPhase::Idle,
                count: 0,
                values: BTreeMap::new(),
                attempts: 0,
            })),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.inner.borrow().phase
    }

    pub fn is_synced(&self) -> bool {
        self.phase() == SyncPhase::Synced
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase(), SyncPhase::Synced | SyncPhase::Failed)
    }

    pub fn values(&self) -> Vec<ConfigValue> {
        self.inner.borrow().values.values().cloned().collect()
    }

    pub fn get(&self, id: u8) -> Option<ConfigValue> {
        self.inner.borrow().values.get(&id).cloned()
    }

    pub fn start(&self, link: &mut Link) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.phase = SyncPhase::Running;
            inner.count = 0;
            inner.values.clear();
            inner.attempts = 0;
        }
        self.request(link, Step::Count);
    }

    fn request(&self, link: &mut Link, step: Step) {
        let robot = self.inner.borrow().robot.clone();
        let on_response = self.clone();
        let on_error = self.clone();
        let sent = robot.send_command(
            link,
            step.command(),
            Some(Box::new(move |link, resp| on_response.on_response(link, step, resp))),
            Some(Box::new(move |link, mid| on_error.on_timeout(link, step, mid))),
            false,
        );
        if let Err(e) = sent {
            warn!(robot = robot.id(), ?step, error = %e, "config request not sent");
            self.inner.borrow_mut().phase = SyncPhase::Failed;
        }
    }

    fn on_timeout(&self, link: &mut Link, step: Step, mid: u8) {
        link.clear_pending(mid);
        let retry = {
            let mut inner = self.inner.borrow_mut();
            if inner.phase != SyncPhase::Running {
                return;
            }
            inner.attempts += 1;
            if inner.attempts >= SYNC_ATTEMPTS {
                warn!(robot = inner.robot.id(), ?step, "config sync gave up");
                inner.phase = SyncPhase::Failed;
                false
            } else {
                debug!(robot = inner.robot.id(), ?step, attempt = inner.attempts, "retrying");
                true
            }
        };
        if retry {
            self.request(link, step);
        }
    }

    fn on_response(&self, link: &mut Link, step: Step, resp: &Response) {
        let next = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            if inner.phase != SyncPhase::Running {
                return;
            }
            if resp.return_code() != ReturnCode::Success {
                warn!(robot = inner.robot.id(), ?step, code = ?resp.return_code(), "config sync failed");
                inner.phase = SyncPhase::Failed;
                return;
            }
            inner.attempts = 0;
            match step {
                Step::Count => {
                    let mut raw = [0u8; 4];
                    for (dst, src) in raw.iter_mut().zip(resp.data()) {
                        *dst = *src;
                    }
                    let count = u32::from_le_bytes(raw);
                    inner.count = u8::try_from(count).unwrap_or(u8::MAX - 1);
                    debug!(robot = inner.robot.id(), count, "config count");
                    (inner.count > 0).then_some(Step::Info(1))
                }
                Step::Info(id) => {
                    match ConfigValue::from_info(id, resp.data()) {
                        Ok(value) => {
                            inner.values.insert(id, value);
                        }
                        Err(e) => warn!(id, error = %e, "skipping config entry"),
                    }
                    Some(if id < inner.count {
                        Step::Info(id + 1)
                    } else {
                        Step::Value(1)
                    })
                }
                Step::Value(id) => {
                    if let Some(v) = inner.values.get_mut(&id) {
                        v.set_raw(resp.data());
                    }
                    (id < inner.count).then(|| Step::Value(id + 1))
                }
            }
        };

        match next {
            Some(step) => self.request(link, step),
            None => {
                let mut inner = self.inner.borrow_mut();
                inner.phase = SyncPhase::Synced;
                info!(robot = inner.robot.id(), values = inner.values.len(), "configuration synced");
            }
        }
    }

    /// Sends a new value for `id`; the local table follows on `Success`.
    pub fn set(&self, link: &mut Link, id: u8, text: &str) -> Result<u8, ConfigError> {
        let (robot, mut value) = {
            let inner = self.inner.borrow();
            let value = inner.values.get(&id).cloned().ok_or(ConfigError::UnknownId(id))?;
            (inner.robot.clone(), value)
        };
        value.set(text)?;
        let cmd = configuration::set_value(id, value.raw())?;
        info!(robot = robot.id(), id, name = %value.name, text, "setting config value");

        let table = self.clone();
        let mid = robot.send_command(
            link,
            cmd,
            Some(Box::new(move |_, resp| {
                if resp.return_code() == ReturnCode::Success {
                    table.inner.borrow_mut().values.insert(id, value.clone());
                }
            })),
            None,
            true,
        )?;
        Ok(mid)
    }

    /// Persists the configuration and reboots the robot once stored.
    pub fn store_and_reboot(&self, link: &mut Link) -> Result<u8, ConfigError> {
        let robot = self.inner.borrow().robot.clone();
        let rebooting = robot.clone();
        let mid = robot.send_command(
            link,
            configuration::store(),
            Some(Box::new(move |link, resp| {
                if resp.return_code() != ReturnCode::Success {
                    warn!(robot = rebooting.id(), code = ?resp.return_code(), "store failed");
                    return;
                }
                if let Err(e) =
                    rebooting.send_command(link, general::reboot(), None, None, true)
                {
                    warn!(robot = rebooting.id(), error = %e, "reboot not sent");
                }
            })),
            None,
            true,
        )?;
        Ok(mid)
    }
}

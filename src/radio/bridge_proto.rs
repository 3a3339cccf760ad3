// Line protocol spoken with the radio bridge board.
use std::collections::BTreeMap;

use thiserror::Error;

use super::PipeAddress;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeParseError {
    #[error("empty line")]
    Empty,
    #[error("malformed key=value pair: {0}")]
    BadPair(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid integer for {0}: {1}")]
    BadInt(&'static str, String),
    #[error("invalid hex: {0}")]
    BadHex(String),
    #[error("unknown tag: {0}")]
    UnknownTag(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeMsg {
    // ---- Host -> bridge ----
    Setup {
        channel: u8,
        retries: u8,
        payload: u8,
    },
    PowerUp,
    OpenWrite {
        addr: PipeAddress,
    },
    OpenRead {
        slot: u8,
        addr: PipeAddress,
    },
    AutoAck {
        slot: u8,
        on: bool,
    },
    ListenStart,
    ListenStop,
    Write {
        pay: Vec<u8>,
    },
    Poll,
    Read {
        max: u8,
    },

    // ---- Bridge -> host ----
    Ack,
    WriteDone {
        acked: bool,
    },
    Avail {
        slot: Option<u8>,
    },
    Data {
        pay: Vec<u8>,
    },
    Fault {
        reason: String,
    },
}

/// Public API: serialize a message to a CRLF-terminated line.
pub fn format_msg(msg: &BridgeMsg) -> String {
    use BridgeMsg::*;
    let mut out = String::new();

    macro_rules! push_pair {
        ($k:literal, $v:expr) => {{
            out.push(' ');
            out.push_str($k);
            out.push('=');
            out.push_str(&$v.to_string());
        }};
    }

    match msg {
        Setup {
            channel,
            retries,
            payload,
        } => {
            out.push_str("SETUP");
            push_pair!("channel", channel);
            push_pair!("retries", retries);
            push_pair!("payload", payload);
        }
        PowerUp => out.push_str("POWER UP"),
        OpenWrite { addr } => {
            out.push_str("OPEN WRITE");
            push_pair!("addr", addr);
        }
        OpenRead { slot, addr } => {
            out.push_str("OPEN READ");
            push_pair!("slot", slot);
            push_pair!("addr", addr);
        }
        AutoAck { slot, on } => {
            out.push_str("AUTOACK");
            push_pair!("slot", slot);
            push_pair!("on", u8::from(*on));
        }
        ListenStart => out.push_str("LISTEN START"),
        ListenStop => out.push_str("LISTEN STOP"),
        Write { pay } => {
            out.push_str("WRITE");
            push_pair!("pay", hex_encode(pay));
        }
        Poll => out.push_str("POLL"),
        Read { max } => {
            out.push_str("READ");
            push_pair!("max", max);
        }
        Ack => out.push_str("OK"),
        WriteDone { acked } => {
            out.push_str("WRITE DONE");
            push_pair!("acked", u8::from(*acked));
        }
        Avail { slot } => {
            out.push_str("AVAIL");
            if let Some(s) = slot {
                push_pair!("slot", s);
            }
        }
        Data { pay } => {
            out.push_str("DATA");
            push_pair!("pay", hex_encode(pay));
        }
        Fault { reason } => {
            out.push_str("ERR");
            push_pair!("reason", escape_reason(reason));
        }
    }

    out.push_str("\r\n");
    out
}

/// Public API: parse a CR/LF-terminated line into a message.
pub fn parse_msg(line: &str) -> Result<BridgeMsg, BridgeParseError> {
    let s = line.trim_matches(|c| c == '\r' || c == '\n' || c == ' ');
    if s.is_empty() {
        return Err(BridgeParseError::Empty);
    }

    // Everything before the first k=v token is the (possibly multi-word) tag.
    let tokens: Vec<&str> = s.split_whitespace().collect();
    let kv_start = tokens
        .iter()
        .position(|t| t.contains('='))
        .unwrap_or(tokens.len());
    let tag = tokens[..kv_start].join(" ");
    let mut map = BTreeMap::<String, String>::new();

    for &tok in &tokens[kv_start..] {
        let (k, v) = tok
            .split_once('=')
            .ok_or_else(|| BridgeParseError::BadPair(tok.to_string()))?;
        map.insert(k.to_string(), v.to_string());
    }

    use BridgeMsg::*;

    match tag.as_str() {
        "SETUP" => Ok(Setup {
            channel: req_u8(&map, "channel")?,
            retries: req_u8(&map, "retries")?,
            payload: req_u8(&map, "payload")?,
        }),
        "POWER UP" => Ok(PowerUp),
        "OPEN WRITE" => Ok(OpenWrite {
            addr: req_addr(&map, "addr")?,
        }),
        "OPEN READ" => Ok(OpenRead {
            slot: req_u8(&map, "slot")?,
            addr: req_addr(&map, "addr")?,
        }),
        "AUTOACK" => Ok(AutoAck {
            slot: req_u8(&map, "slot")?,
            on: req_flag(&map, "on")?,
        }),
        "LISTEN START" => Ok(ListenStart),
        "LISTEN STOP" => Ok(ListenStop),
        "WRITE" => Ok(Write {
            pay: req_hex(&map, "pay")?,
        }),
        "POLL" => Ok(Poll),
        "READ" => Ok(Read {
            max: req_u8(&map, "max")?,
        }),
        "OK" => Ok(Ack),
        "WRITE DONE" => Ok(WriteDone {
            acked: req_flag(&map, "acked")?,
        }),
        "AVAIL" => Ok(Avail {
            slot: match map.get("slot") {
                None => None,
                Some(_) => Some(req_u8(&map, "slot")?),
            },
        }),
        "DATA" => Ok(Data {
            pay: req_hex(&map, "pay")?,
        }),
        "ERR" => Ok(Fault {
            reason: map
                .get("reason")
                .map(|s| unescape_reason(s))
                .unwrap_or_default(),
        }),
        _ => Err(BridgeParseError::UnknownTag(tag)),
    }
}

/* ---------- helpers ---------- */

fn req_s<'a>(
    map: &'a BTreeMap<String, String>,
    k: &'static str,
) -> Result<&'a str, BridgeParseError> {
    map.get(k)
        .map(|s| s.as_str())
        .ok_or(BridgeParseError::MissingField(k))
}

fn req_u8(map: &BTreeMap<String, String>, k: &'static str) -> Result<u8, BridgeParseError> {
    let v = req_s(map, k)?;
    v.parse::<u8>()
        .map_err(|_| BridgeParseError::BadInt(k, v.to_string()))
}

fn req_flag(map: &BTreeMap<String, String>, k: &'static str) -> Result<bool, BridgeParseError> {
    match req_s(map, k)? {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(BridgeParseError::BadInt(k, other.to_string())),
    }
}

fn req_hex(map: &BTreeMap<String, String>, k: &'static str) -> Result<Vec<u8>, BridgeParseError> {
    hex_decode(req_s(map, k)?)
}

fn req_addr(
    map: &BTreeMap<String, String>,
    k: &'static str,
) -> Result<PipeAddress, BridgeParseError> {
    let v = req_s(map, k)?;
    let bytes = hex_decode(v)?;
    let arr: [u8; 5] = bytes
        .try_into()
        .map_err(|_| BridgeParseError::BadHex(v.to_string()))?;
    Ok(PipeAddress(arr))
}

pub fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02X}", b);
    }
    s
}

pub fn hex_decode(s: &str) -> Result<Vec<u8>, BridgeParseError> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return Err(BridgeParseError::BadHex(s.to_string()));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| BridgeParseError::BadHex(s.to_string()))
        })
        .collect()
}

/* ---------- value escaping for reason ---------- */

fn escape_reason(s: &str) -> String {
    s.replace(' ', "_")
        .replace('\r', "\\r")
        .replace('\n', "\\n")
}

fn unescape_reason(s: &str) -> String {
    s.replace("\\r", "\r")
        .replace("\\n", "\n")
        .replace('_', " ")
}

/* ---------- tests ---------- */

use thiserror::Error;

use crate::proto::{Command, Response, ReturnCode};

/// Radio payload size.
pub const MAX_PAYLOAD: usize = 32;
/// Header byte + message id.
pub const HEADER_LEN: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("response too short: {len} bytes")]
    TooShort { len: usize },
    #[error("unknown return code {0}")]
    UnknownReturnCode(u8),
}

/// 3-bit category in the high bits, 5-bit command id in the low bits.
pub fn header_byte(category: u8, command_id: u8) -> u8 {
    (category << 5) | (command_id & 0x1F)
}

/// Public API: lay out a command for the wire.
pub fn encode(cmd: &Command, message_id: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + cmd.parameters().len());
    out.push(header_byte(cmd.category().into(), cmd.command_id()));
    out.push(message_id);
    out.extend_from_slice(cmd.parameters());
    out
}

/// Public API: `[message_id, return_code, data...]` into a response.
pub fn decode(bytes: &[u8]) -> Result<Response, ParseError> {
    if bytes.len() < HEADER_LEN {
        return Err(ParseError::TooShort { len: bytes.len() });
    }
    let code =
        ReturnCode::try_from(bytes[1]).map_err(|_| ParseError::UnknownReturnCode(bytes[1]))?;
    Ok(Response::from_wire(bytes[0], code, bytes[2..].to_vec()))
}

/// Big-endian split used for every 16-bit parameter.
pub fn split_u16(value: u16) -> [u8; 2] {
    [(value >> 8) as u8, (value & 0xFF) as u8]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::factory::{action, configuration, general};
    use crate::proto::{MoveDirection, RotateDirection};
    use proptest::prelude::*;

    #[test]
    fn header_packing() {
        assert_eq!(header_byte(1, 2), 0x22);
        assert_eq!(header_byte(3, 5), 0x65);
        assert_eq!(header_byte(0, 31), 0x1F);
    }

    #[test]
    fn encode_rotate() {
        let cmd = action::start_rotate_degrees(90, RotateDirection::Clockwise);
        assert_eq!(encode(&cmd, 12), vec![0x22, 12, 0, 90, 1]);
    }

    #[test]
    fn encode_config_and_general() {
        assert_eq!(encode(&configuration::get_info(2), 0), vec![0x65, 0, 2]);
        assert_eq!(encode(&general::reboot(), 254), vec![0x00, 254]);
        let mv = action::start_move_mm(0x1234, Some(MoveDirection::Backward));
        assert_eq!(encode(&mv, 3), vec![0x21, 3, 0x12, 0x34, 0]);
    }

    #[test]
    fn decode_rejects_short() {
        assert_eq!(decode(&[]), Err(ParseError::TooShort { len: 0 }));
        assert_eq!(decode(&[4]), Err(ParseError::TooShort { len: 1 }));
    }

    #[test]
    fn decode_rejects_unknown_code() {
        assert_eq!(decode(&[4, 42]), Err(ParseError::UnknownReturnCode(42)));
    }

    #[test]
    fn decode_splits_fields() {
        let r = decode(&[9, 1, 0xAA, 0xBB]).unwrap();
        assert_eq!(r.message_id(), 9);
        assert_eq!(r.return_code(), ReturnCode::ActionStarted);
        assert_eq!(r.data(), &[0xAA, 0xBB]);
    }

    proptest! {
        #[test]
        fn decode_recovers_hand_built_response(
            mid in 0u8..=254,
            code in 0u8..=10,
            data in proptest::collection::vec(any::<u8>(), 0..30),
        ) {
            let mut raw = vec![mid, code];
            raw.extend_from_slice(&data);
            let r = decode(&raw).unwrap();
            prop_assert_eq!(r.message_id(), mid);
            prop_assert_eq!(u8::from(r.return_code()), code);
            prop_assert_eq!(r.data(), &data[..]);
        }
    }
}

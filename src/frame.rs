//! Tecan OEM frame codec.
//!
//! Request frames carry the target address, a sequence byte and the ASCII
//! command; response frames carry the master address, a status byte and the
//! payload. Both end with ETX followed by an XOR checksum over every byte from
//! STX through ETX.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::borrow::Cow;
use std::convert::TryFrom;
use std::fmt::{self, Display};
use thiserror::Error;

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const MASTER_ADDRESS: u8 = 0x30;
pub const MAX_ADDRESS: u8 = 14;

const ADDRESS_BASE: u8 = 0x31;
const SEQ_BASE: u8 = 0x30;
const SEQ_REPEAT: u8 = 0x08;
const SEQ_MASK: u8 = 0x07;

const STATUS_READY: u8 = 0x20;
const STATUS_ERROR_MASK: u8 = 0x0F;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("no start of frame")]
    MissingStart,
    #[error("no end of frame")]
    MissingEnd,
    #[error("truncated frame")]
    Truncated,
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },
    #[error("unexpected address byte {0:#04x}")]
    UnexpectedAddress(u8),
    #[error("bad sequence byte {0:#04x}")]
    BadSequence(u8),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("address {0} out of range 0..=14")]
    InvalidAddress(u8),
    #[error("invalid command {0:?}")]
    InvalidCommand(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Bus address of a single device, 0..=14 (`'1'`..`'?'` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(u8);

impl Address {
    pub fn new(address: u8) -> Result<Self, FrameError> {
        if address > MAX_ADDRESS {
            Err(FrameError::InvalidAddress(address))
        } else {
            Ok(Address(address))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    fn wire(self) -> u8 {
        ADDRESS_BASE + self.0
    }
}

impl TryFrom<u8> for Address {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Address::new(value)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// OEM sequence number, cycling through 1..=7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequence(u8);

impl Sequence {
    pub const FIRST: Sequence = Sequence(1);

    pub fn new(n: u8) -> Option<Self> {
        (1..=7).contains(&n).then(|| Sequence(n))
    }

    pub fn next(self) -> Self {
        if self.0 >= 7 {
            Sequence::FIRST
        } else {
            Sequence(self.0 + 1)
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Sequence::FIRST
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Command,
    Repeat,
}

/// Wire bytes of one outgoing frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    bytes: Vec<u8>,
}

impl Frame {
    pub fn new(kind: FrameKind, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn is_repeat(&self) -> bool {
        self.kind == FrameKind::Repeat
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Device error reported in the low nibble of the status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum StatusError {
    Initialization = 1,
    InvalidCommand = 2,
    InvalidOperand = 3,
    InvalidSequence = 4,
    EepromFailure = 6,
    NotInitialized = 7,
    PlungerOverload = 9,
    ValveOverload = 10,
    PlungerMoveNotAllowed = 11,
    CommandOverflow = 15,
}

impl Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusError::Initialization => "initialization error".fmt(f),
            StatusError::InvalidCommand => "invalid command".fmt(f),
            StatusError::InvalidOperand => "invalid operand".fmt(f),
            StatusError::InvalidSequence => "invalid command sequence".fmt(f),
            StatusError::EepromFailure => "EEPROM failure".fmt(f),
            StatusError::NotInitialized => "device not initialized".fmt(f),
            StatusError::PlungerOverload => "plunger overload".fmt(f),
            StatusError::ValveOverload => "valve overload".fmt(f),
            StatusError::PlungerMoveNotAllowed => "plunger move not allowed".fmt(f),
            StatusError::CommandOverflow => "command overflow".fmt(f),
        }
    }
}

/// Decoded device reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u8,
    pub data: Vec<u8>,
}

impl Response {
    pub fn is_ready(&self) -> bool {
        self.status & STATUS_READY != 0
    }

    pub fn error(&self) -> Option<StatusError> {
        StatusError::from_u8(self.status & STATUS_ERROR_MASK)
    }

    pub fn data_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// Command frame as seen by a device on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub address: Address,
    pub sequence: Sequence,
    pub repeat: bool,
    pub command: String,
}

pub trait FrameCodec: Send + Sync {
    fn encode_command(
        &self,
        address: Address,
        sequence: Sequence,
        command: &str,
    ) -> Result<Frame, FrameError>;

    /// Turns the last full frame into its "repeat" variant.
    fn encode_repeat(&self, last: &Frame) -> Frame;

    fn decode_response(&self, raw: &[u8]) -> Result<Response, DecodeError>;
}

/// Tecan OEM framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct OemCodec;

impl FrameCodec for OemCodec {
    fn encode_command(
        &self,
        address: Address,
        sequence: Sequence,
        command: &str,
    ) -> Result<Frame, FrameError> {
        if command.is_empty() || !command.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
            return Err(FrameError::InvalidCommand(command.to_string()));
        }

        let mut bytes = Vec::with_capacity(command.len() + 5);
        bytes.push(STX);
        bytes.push(address.wire());
        bytes.push(SEQ_BASE | sequence.value());
        bytes.extend_from_slice(command.as_bytes());
        bytes.push(ETX);
        bytes.push(checksum(&bytes));

        Ok(Frame::new(FrameKind::Command, bytes))
    }

    fn encode_repeat(&self, last: &Frame) -> Frame {
        let mut bytes = last.as_bytes().to_vec();
        if bytes.len() >= 5 {
            let end = bytes.len() - 1;
            bytes[2] |= SEQ_REPEAT;
            bytes[end] = checksum(&bytes[..end]);
        }
        Frame::new(FrameKind::Repeat, bytes)
    }

    fn decode_response(&self, raw: &[u8]) -> Result<Response, DecodeError> {
        let body = extract_body(raw)?;
        if body.len() < 2 {
            return Err(DecodeError::Truncated);
        }
        if body[0] != MASTER_ADDRESS {
            return Err(DecodeError::UnexpectedAddress(body[0]));
        }

        Ok(Response {
            status: body[1],
            data: body[2..].to_vec(),
        })
    }
}

impl OemCodec {
    /// Device side: parse a command frame written by the master.
    pub fn decode_request(&self, raw: &[u8]) -> Result<Request, DecodeError> {
        let body = extract_body(raw)?;
        if body.len() < 3 {
            return Err(DecodeError::Truncated);
        }

        let address = body[0]
            .checked_sub(ADDRESS_BASE)
            .and_then(|a| Address::new(a).ok())
            .ok_or(DecodeError::UnexpectedAddress(body[0]))?;

        let seq = body[1];
        let sequence = Sequence::new(seq & SEQ_MASK)
            .filter(|_| seq & !(SEQ_REPEAT | SEQ_MASK) == SEQ_BASE)
            .ok_or(DecodeError::BadSequence(seq))?;

        Ok(Request {
            address,
            sequence,
            repeat: seq & SEQ_REPEAT != 0,
            command: String::from_utf8_lossy(&body[2..]).into_owned(),
        })
    }

    /// Device side: build a status reply addressed to the master.
    pub fn encode_status(&self, status: u8, data: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(data.len() + 5);
        bytes.push(STX);
        bytes.push(MASTER_ADDRESS);
        bytes.push(status);
        bytes.extend_from_slice(data);
        bytes.push(ETX);
        bytes.push(checksum(&bytes));
        bytes
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Finds the first STX..ETX frame in `raw`, checks its checksum and returns
/// the bytes between STX and ETX. Noise before STX is ignored.
fn extract_body(raw: &[u8]) -> Result<&[u8], DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::Empty);
    }

    let start = raw
        .iter()
        .position(|&b| b == STX)
        .ok_or(DecodeError::MissingStart)?;
    let end = raw[start..]
        .iter()
        .position(|&b| b == ETX)
        .map(|pos| start + pos)
        .ok_or(DecodeError::MissingEnd)?;
    let actual = *raw.get(end + 1).ok_or(DecodeError::Truncated)?;

    let expected = checksum(&raw[start..=end]);
    if expected != actual {
        return Err(DecodeError::Checksum { expected, actual });
    }

    Ok(&raw[start + 1..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(a: u8) -> Address {
        Address::new(a).unwrap()
    }

    #[test]
    fn encode_init() {
        let reference = [0x02, 0x31, 0x31, 0x5A, 0x52, 0x03, 0x09];
        let frame = OemCodec
            .encode_command(addr(0), Sequence::FIRST, "ZR")
            .unwrap();

        assert_eq!(frame.kind(), FrameKind::Command);
        assert_eq!(frame.as_bytes(), reference);
    }

    #[test]
    fn encode_query_address_3() {
        let reference = [0x02, 0x34, 0x32, 0x3F, 0x37, 0x36, 0x03, 0x39];
        let frame = OemCodec
            .encode_command(addr(3), Sequence::new(2).unwrap(), "?76")
            .unwrap();

        assert_eq!(frame.as_bytes(), reference);
    }

    #[test]
    fn encode_is_deterministic() {
        let a = OemCodec.encode_command(addr(5), Sequence::FIRST, "A3000R");
        let b = OemCodec.encode_command(addr(5), Sequence::FIRST, "A3000R");
        assert_eq!(a, b);
    }

    #[test]
    fn encode_repeat_sets_repeat_bit() {
        let reference = [0x02, 0x31, 0x39, 0x5A, 0x52, 0x03, 0x01];
        let first = OemCodec
            .encode_command(addr(0), Sequence::FIRST, "ZR")
            .unwrap();
        let repeat = OemCodec.encode_repeat(&first);

        assert!(repeat.is_repeat());
        assert_eq!(repeat.as_bytes(), reference);

        let request = OemCodec.decode_request(repeat.as_bytes()).unwrap();
        assert!(request.repeat);
        assert_eq!(request.sequence, Sequence::FIRST);
        assert_eq!(request.command, "ZR");
    }

    #[test]
    fn encode_rejects_bad_input() {
        assert_eq!(Address::new(15), Err(FrameError::InvalidAddress(15)));
        assert!(matches!(
            OemCodec.encode_command(addr(0), Sequence::FIRST, ""),
            Err(FrameError::InvalidCommand(_))
        ));
        assert!(matches!(
            OemCodec.encode_command(addr(0), Sequence::FIRST, "Z\u{3}R"),
            Err(FrameError::InvalidCommand(_))
        ));
    }

    #[test]
    fn decode_status_with_data() {
        let reference = [0x02, 0x30, 0x60, 0x33, 0x30, 0x30, 0x30, 0x03, 0x52];
        let response = OemCodec.decode_response(&reference).unwrap();

        assert_eq!(response.status, 0x60);
        assert_eq!(response.data, b"3000");
        assert!(response.is_ready());
        assert_eq!(response.error(), None);
    }

    #[test]
    fn decode_status_without_data() {
        let reference = [0x02, 0x30, 0x40, 0x03, 0x71];
        let response = OemCodec.decode_response(&reference).unwrap();

        assert_eq!(response.status, 0x40);
        assert!(response.data.is_empty());
        assert!(!response.is_ready());
    }

    #[test]
    fn decode_skips_leading_noise() {
        let raw = [0xFF, 0x00, 0x02, 0x30, 0x40, 0x03, 0x71];
        assert!(OemCodec.decode_response(&raw).is_ok());
    }

    #[test]
    fn decode_simulated_device_reply() {
        let raw = OemCodec.encode_status(0x67, b"XC3000 V1.2");
        let response = OemCodec.decode_response(&raw).unwrap();

        assert_eq!(response.data_str(), "XC3000 V1.2");
        assert_eq!(response.error(), Some(StatusError::NotInitialized));
    }

    #[test]
    fn round_trip_all_addresses() {
        let commands = ["ZR", "?76", "&", "A3000R", "gP100M500G10R", "U200 ,7"];

        for a in 0..=MAX_ADDRESS {
            for (i, command) in commands.iter().enumerate() {
                let sequence = Sequence::new(i as u8 % 7 + 1).unwrap();
                let frame = OemCodec
                    .encode_command(addr(a), sequence, command)
                    .unwrap();
                assert_eq!(frame.as_bytes()[1], 0x31 + a);

                let request = OemCodec.decode_request(frame.as_bytes()).unwrap();
                assert_eq!(request.address, addr(a));
                assert_eq!(request.sequence, sequence);
                assert_eq!(request.command, *command);
                assert!(!request.repeat);

                let repeat = OemCodec.encode_repeat(&frame);
                let request = OemCodec.decode_request(repeat.as_bytes()).unwrap();
                assert!(request.repeat);
                assert_eq!(request.command, *command);
            }
        }
        assert_eq!(addr(14).wire(), 0x3F);
    }

    #[test]
    fn round_trip_payloads() {
        let payloads: [&[u8]; 5] = [
            b"",
            b"0",
            b"XCalibur V2.1 / 25",
            b"3000,1500;-+*#",
            b"~|{} ",
        ];

        for status in [0x40, 0x60, 0x61, 0x67, 0x6F] {
            for payload in payloads {
                let raw = OemCodec.encode_status(status, payload);
                let response = OemCodec.decode_response(&raw).unwrap();
                assert_eq!(response.status, status);
                assert_eq!(response.data, payload);
            }
        }
    }

    #[test]
    fn decode_failures() {
        assert_eq!(OemCodec.decode_response(&[]), Err(DecodeError::Empty));
        assert_eq!(
            OemCodec.decode_response(&[0x30, 0x40, 0x03, 0x71]),
            Err(DecodeError::MissingStart)
        );
        assert_eq!(
            OemCodec.decode_response(&[0x02, 0x30, 0x40]),
            Err(DecodeError::MissingEnd)
        );
        assert_eq!(
            OemCodec.decode_response(&[0x02, 0x30, 0x40, 0x03]),
            Err(DecodeError::Truncated)
        );
        assert_eq!(
            OemCodec.decode_response(&[0x02, 0x30, 0x40, 0x03, 0x70]),
            Err(DecodeError::Checksum {
                expected: 0x71,
                actual: 0x70
            })
        );
        assert_eq!(
            OemCodec.decode_response(&[0x02, 0x30, 0x03, 0x31]),
            Err(DecodeError::Truncated)
        );
    }

    #[test]
    fn decode_rejects_echoed_request() {
        let request = OemCodec
            .encode_command(addr(0), Sequence::FIRST, "ZR")
            .unwrap();
        assert_eq!(
            OemCodec.decode_response(request.as_bytes()),
            Err(DecodeError::UnexpectedAddress(0x31))
        );
    }

    #[test]
    fn sequence_wraps() {
        let mut seq = Sequence::FIRST;
        for _ in 0..7 {
            seq = seq.next();
        }
        assert_eq!(seq, Sequence::FIRST);
        assert_eq!(Sequence::new(0), None);
        assert_eq!(Sequence::new(8), None);
    }
}

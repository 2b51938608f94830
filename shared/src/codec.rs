//! Line codec for the rover text protocol
//!
//! Every message is a single newline-terminated ASCII line:
//! ```text
//! <TAG>:<field>|<field>|...\n
//! ```
//!
//! | Tag        | Direction | Fields                                    |
//! |------------|-----------|-------------------------------------------|
//! | `HEALTH`   | rover     | temp, memory used, memory total           |
//! | `DRIVE`    | rover     | 6 motor outputs                           |
//! | `WHISKR`   | rover     | 6 integer whisker readings                |
//! | `CHARS`    | rover     | 46 floats of geometry                     |
//! | `GETHEALTH`| client    | none                                      |
//! | `GETCHARS` | client    | none                                      |
//! | `SETOPTS`  | client    | option bitmask                            |
//! | `MDRIVE`   | client    | left, right (two decimals, drive socket)  |
//!
//! A malformed line only ever costs that line: the decoder reports it and
//! carries on with the next one.

use bytes::{Buf, Bytes, BytesMut};
use std::fmt::Write;
use std::marker::PhantomData;
use std::str::FromStr;
use thiserror::Error;

use crate::packet::{
    tags, CharacteristicsPacket, ClientOptions, Command, DrivetrainPacket, HealthPacket,
    ManualDrivePacket, Packet, Vec3, Vec4, WhiskersPacket,
};

/// Longest partial line kept while waiting for a terminator
pub const MAX_LINE_LEN: usize = 4096;

/// Number of float fields in a `CHARS:` line
pub const CHARACTERISTICS_FIELDS: usize = 3 + 1 + 6 * 3 + 6 * 4;

/// Errors that can occur while decoding a line
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Line too long: at least {0} bytes (max: {MAX_LINE_LEN})")]
    LineTooLong(usize),

    #[error("Line is not valid UTF-8")]
    InvalidUtf8,

    #[error("Missing tag separator in line {0:?}")]
    MissingSeparator(String),

    #[error("Unknown tag: {0}")]
    UnknownTag(String),

    #[error("{tag}: expected {expected} fields, got {actual}")]
    FieldCount {
        tag: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{tag}: field {index} is not a valid number: {value:?}")]
    InvalidField {
        tag: &'static str,
        index: usize,
        value: String,
    },
}

/// A message that can be carried as one protocol line
pub trait WireMessage: Sized {
    /// Parse a single line with the terminator already removed
    fn parse(line: &str) -> Result<Self, CodecError>;

    /// Append the encoded line, including its terminator
    fn encode_into(&self, buf: &mut BytesMut);

    /// Encode into a fresh buffer
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        self.encode_into(&mut buf);
        buf.freeze()
    }
}

/// Encode an outbound command
pub fn encode_command(command: &Command) -> Bytes {
    command.encode()
}

/// Encode a telemetry packet (simulator side)
pub fn encode_packet(packet: &Packet) -> Bytes {
    packet.encode()
}

/// Split a line into its tag and field list
fn split_line(line: &str) -> Result<(&str, Vec<&str>), CodecError> {
    let (tag, payload) = line
        .split_once(':')
        .ok_or_else(|| CodecError::MissingSeparator(line.to_string()))?;

    let fields = if payload.is_empty() {
        Vec::new()
    } else {
        payload.split('|').collect()
    };

    Ok((tag, fields))
}

fn expect_fields(tag: &'static str, fields: &[&str], expected: usize) -> Result<(), CodecError> {
    if fields.len() != expected {
        return Err(CodecError::FieldCount {
            tag,
            expected,
            actual: fields.len(),
        });
    }
    Ok(())
}

fn parse_field<T: FromStr>(tag: &'static str, index: usize, value: &str) -> Result<T, CodecError> {
    value.trim().parse().map_err(|_| CodecError::InvalidField {
        tag,
        index,
        value: value.to_string(),
    })
}

/// Parse exactly `N` fields of the same numeric type
fn parse_fields<T: FromStr + Copy + Default, const N: usize>(
    tag: &'static str,
    fields: &[&str],
) -> Result<[T; N], CodecError> {
    expect_fields(tag, fields, N)?;

    let mut values = [T::default(); N];
    for (index, field) in fields.iter().enumerate() {
        values[index] = parse_field(tag, index, field)?;
    }
    Ok(values)
}

fn parse_characteristics(fields: &[&str]) -> Result<CharacteristicsPacket, CodecError> {
    let f: [f64; CHARACTERISTICS_FIELDS] = parse_fields(tags::CHARACTERISTICS, fields)?;

    let mut packet = CharacteristicsPacket {
        frame_size: Vec3::new(f[0], f[1], f[2]),
        wheel_diameter: f[3],
        ..Default::default()
    };

    for (i, wheel) in packet.wheel_locations.iter_mut().enumerate() {
        let o = 4 + i * 3;
        *wheel = Vec3::new(f[o], f[o + 1], f[o + 2]);
    }

    for (i, whisker) in packet.whiskers.iter_mut().enumerate() {
        let o = 22 + i * 4;
        *whisker = Vec4::new(f[o], f[o + 1], f[o + 2], f[o + 3]);
    }

    Ok(packet)
}

fn parse_manual_drive(fields: &[&str]) -> Result<ManualDrivePacket, CodecError> {
    let [left, right] = parse_fields::<f64, 2>(tags::MANUAL_DRIVE, fields)?;
    Ok(ManualDrivePacket::new(left, right))
}

/// Write `TAG:a|b|c\n`
fn write_line<I, D>(buf: &mut BytesMut, tag: &str, fields: I)
where
    I: IntoIterator<Item = D>,
    D: std::fmt::Display,
{
    // Writing into BytesMut cannot fail
    let _ = write!(buf, "{}:", tag);
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            buf.extend_from_slice(b"|");
        }
        let _ = write!(buf, "{}", field);
    }
    buf.extend_from_slice(b"\n");
}

fn write_manual_drive(buf: &mut BytesMut, drive: &ManualDrivePacket) {
    let q = drive.quantized();
    let _ = writeln!(buf, "{}:{:.2}|{:.2}", tags::MANUAL_DRIVE, q.left, q.right);
}

impl WireMessage for Packet {
    fn parse(line: &str) -> Result<Self, CodecError> {
        let (tag, fields) = split_line(line)?;

        match tag {
            tags::HEALTH => {
                expect_fields(tags::HEALTH, &fields, 3)?;
                Ok(Packet::Health(HealthPacket {
                    temp: parse_field(tags::HEALTH, 0, fields[0])?,
                    memory_used: parse_field(tags::HEALTH, 1, fields[1])?,
                    memory_total: parse_field(tags::HEALTH, 2, fields[2])?,
                }))
            }
            tags::DRIVE => Ok(Packet::Drivetrain(DrivetrainPacket {
                motors: parse_fields(tags::DRIVE, &fields)?,
            })),
            tags::WHISKERS => Ok(Packet::Whiskers(WhiskersPacket {
                sensors: parse_fields(tags::WHISKERS, &fields)?,
            })),
            tags::CHARACTERISTICS => Ok(Packet::Characteristics(Box::new(
                parse_characteristics(&fields)?,
            ))),
            tags::MANUAL_DRIVE => Ok(Packet::ManualDrive(parse_manual_drive(&fields)?)),
            other => Err(CodecError::UnknownTag(other.to_string())),
        }
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Packet::Health(h) => {
                let _ = writeln!(
                    buf,
                    "{}:{}|{}|{}",
                    tags::HEALTH,
                    h.temp,
                    h.memory_used,
                    h.memory_total
                );
            }
            Packet::Drivetrain(d) => write_line(buf, tags::DRIVE, d.motors),
            Packet::Whiskers(w) => write_line(buf, tags::WHISKERS, w.sensors),
            Packet::Characteristics(c) => {
                let mut values = Vec::with_capacity(CHARACTERISTICS_FIELDS);
                values.extend([c.frame_size.x, c.frame_size.y, c.frame_size.z]);
                values.push(c.wheel_diameter);
                for w in &c.wheel_locations {
                    values.extend([w.x, w.y, w.z]);
                }
                for w in &c.whiskers {
                    values.extend([w.x, w.y, w.z, w.w]);
                }
                write_line(buf, tags::CHARACTERISTICS, values);
            }
            Packet::ManualDrive(drive) => write_manual_drive(buf, drive),
        }
    }
}

impl WireMessage for Command {
    fn parse(line: &str) -> Result<Self, CodecError> {
        let (tag, fields) = split_line(line)?;

        match tag {
            tags::GET_HEALTH => {
                expect_fields(tags::GET_HEALTH, &fields, 0)?;
                Ok(Command::GetHealth)
            }
            tags::GET_CHARACTERISTICS => {
                expect_fields(tags::GET_CHARACTERISTICS, &fields, 0)?;
                Ok(Command::GetCharacteristics)
            }
            tags::SET_OPTIONS => {
                let [bits] = parse_fields::<u8, 1>(tags::SET_OPTIONS, &fields)?;
                Ok(Command::SetOptions(ClientOptions::from_bits(bits)))
            }
            tags::MANUAL_DRIVE => Ok(Command::Drive(parse_manual_drive(&fields)?)),
            other => Err(CodecError::UnknownTag(other.to_string())),
        }
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Command::GetHealth => write_line::<_, u8>(buf, tags::GET_HEALTH, []),
            Command::GetCharacteristics => write_line::<_, u8>(buf, tags::GET_CHARACTERISTICS, []),
            Command::SetOptions(opts) => write_line(buf, tags::SET_OPTIONS, [opts.bits()]),
            Command::Drive(drive) => write_manual_drive(buf, drive),
        }
    }
}

/// Incremental line decoder
///
/// Bytes are fed in arbitrary chunks with [`FrameDecoder::extend`]; complete
/// lines are pulled with [`FrameDecoder::decode_next`]. A trailing partial
/// line stays buffered until a later chunk completes it.
#[derive(Debug)]
pub struct FrameDecoder<T> {
    /// Partial line data being accumulated
    buffer: BytesMut,
    /// Set after an oversized line, cleared at its terminator
    discarding: bool,
    _message: PhantomData<fn() -> T>,
}

impl<T: WireMessage> FrameDecoder<T> {
    /// Create a new line decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            discarding: false,
            _message: PhantomData,
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next line from the buffer
    ///
    /// Returns:
    /// - `None` if more data is needed
    /// - `Some(Ok(message))` for a well-formed line
    /// - `Some(Err(...))` for a dropped line; keep calling to continue
    pub fn decode_next(&mut self) -> Option<Result<T, CodecError>> {
        loop {
            let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') else {
                return self.check_overflow();
            };

            let line = self.buffer.split_to(pos + 1);
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if pos > MAX_LINE_LEN {
                return Some(Err(CodecError::LineTooLong(pos)));
            }

            let mut raw = &line[..pos];
            if let Some(stripped) = raw.strip_suffix(b"\r") {
                raw = stripped;
            }
            if raw.is_empty() {
                continue;
            }

            return Some(match std::str::from_utf8(raw) {
                Ok(text) => T::parse(text),
                Err(_) => Err(CodecError::InvalidUtf8),
            });
        }
    }

    fn check_overflow(&mut self) -> Option<Result<T, CodecError>> {
        if self.discarding {
            self.buffer.clear();
            return None;
        }
        if self.buffer.len() > MAX_LINE_LEN {
            let len = self.buffer.len();
            self.buffer.advance(len);
            self.discarding = true;
            return Some(Err(CodecError::LineTooLong(len)));
        }
        None
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

impl<T: WireMessage> Default for FrameDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

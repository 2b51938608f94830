//! Packet and command types exchanged with the rover controller
//!
//! Inbound telemetry is modelled as [`Packet`], outbound requests as
//! [`Command`]. Both are encoded as tagged text lines by [`crate::codec`].

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Three-component vector (metres)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Four-component vector, used for whisker placement (x, y, z, angle)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec4 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Vec4 {
    pub const fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }
}

/// Motor outputs for all six wheels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DrivetrainPacket {
    pub motors: [f64; 6],
}

/// Controller health report
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HealthPacket {
    /// Core temperature in degrees Celsius
    pub temp: f64,
    /// Memory in use, bytes
    pub memory_used: i64,
    /// Total memory, bytes
    pub memory_total: i64,
}

impl HealthPacket {
    /// Memory usage as an integer percentage (0 when the total is unknown)
    pub fn memory_percent(&self) -> i64 {
        if self.memory_total <= 0 {
            return 0;
        }
        self.memory_used * 100 / self.memory_total
    }
}

/// Raw whisker (bumper) sensor readings
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WhiskersPacket {
    pub sensors: [i32; 6],
}

/// Static rover geometry, fetched once per connection
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CharacteristicsPacket {
    pub frame_size: Vec3,
    pub wheel_diameter: f64,
    pub wheel_locations: [Vec3; 6],
    pub whiskers: [Vec4; 6],
}

/// Tank-style drive request, both sides in [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ManualDrivePacket {
    pub left: f64,
    pub right: f64,
}

impl ManualDrivePacket {
    pub const fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }

    /// Clamp both sides to [-1, 1] and floor-truncate to two decimals.
    ///
    /// This is exactly what goes on the wire, so `0.567` becomes `0.56` and
    /// `-0.004` becomes `-0.01`.
    pub fn quantized(&self) -> Self {
        Self {
            left: quantize_drive(self.left),
            right: quantize_drive(self.right),
        }
    }
}

/// Clamp a drive value to [-1, 1] then floor it to two decimal places
pub fn quantize_drive(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    let clamped = value.clamp(-1.0, 1.0);
    let scaled = clamped * 100.0;
    // Snap only representation error such as 0.29 * 100 = 28.999999999999996
    let nearest = scaled.round();
    let steps = if (scaled - nearest).abs() <= scaled.abs().max(1.0) * f64::EPSILON * 4.0 {
        nearest
    } else {
        scaled.floor()
    };
    let truncated = steps / 100.0;
    if truncated == 0.0 {
        0.0
    } else {
        truncated
    }
}

/// A decoded line-protocol packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Drivetrain(DrivetrainPacket),
    Health(HealthPacket),
    Whiskers(WhiskersPacket),
    Characteristics(Box<CharacteristicsPacket>),
    ManualDrive(ManualDrivePacket),
}

impl Packet {
    /// Wire tag of this packet (without the trailing colon)
    pub fn tag(&self) -> &'static str {
        match self {
            Packet::Drivetrain(_) => tags::DRIVE,
            Packet::Health(_) => tags::HEALTH,
            Packet::Whiskers(_) => tags::WHISKERS,
            Packet::Characteristics(_) => tags::CHARACTERISTICS,
            Packet::ManualDrive(_) => tags::MANUAL_DRIVE,
        }
    }
}

/// Outbound requests sent by the client
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    GetHealth,
    GetCharacteristics,
    SetOptions(ClientOptions),
    Drive(ManualDrivePacket),
}

impl Command {
    /// Whether this command travels on the secondary (drive) socket
    pub fn uses_drive_socket(&self) -> bool {
        matches!(self, Command::Drive(_))
    }

    /// Wire tag of this command (without the trailing colon)
    pub fn tag(&self) -> &'static str {
        match self {
            Command::GetHealth => tags::GET_HEALTH,
            Command::GetCharacteristics => tags::GET_CHARACTERISTICS,
            Command::SetOptions(_) => tags::SET_OPTIONS,
            Command::Drive(_) => tags::MANUAL_DRIVE,
        }
    }
}

/// Wire tags
pub mod tags {
    pub const HEALTH: &str = "HEALTH";
    pub const DRIVE: &str = "DRIVE";
    pub const WHISKERS: &str = "WHISKR";
    pub const CHARACTERISTICS: &str = "CHARS";
    pub const MANUAL_DRIVE: &str = "MDRIVE";
    pub const GET_HEALTH: &str = "GETHEALTH";
    pub const GET_CHARACTERISTICS: &str = "GETCHARS";
    pub const SET_OPTIONS: &str = "SETOPTS";
}

/// Telemetry subscription flags sent with `SETOPTS:`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClientOptions(u8);

impl ClientOptions {
    pub const NONE: Self = Self(0);
    pub const LISTEN_DRIVETRAIN: Self = Self(1 << 0);
    pub const LISTEN_WHISKERS: Self = Self(1 << 1);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ClientOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ClientOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

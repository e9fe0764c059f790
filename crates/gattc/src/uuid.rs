use std::fmt;
use std::str::FromStr;

/// A Bluetooth UUID.
///
/// 16-bit and 32-bit SIG-assigned values are embedded in the Bluetooth base
/// UUID so that every UUID is held in a single 128-bit form; equality is
/// value-based across the three widths. Bytes are stored little-endian, the
/// order they appear in ATT PDUs and in the cache file.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Uuid {
    bytes: [u8; 16],
}

/// The Bluetooth base UUID, 00000000-0000-1000-8000-00805F9B34FB,
/// little-endian.
const BASE_UUID: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Offset of the 16/32-bit short value inside the base UUID.
const SHORT_OFFSET: usize = 12;

impl Uuid {
    /// Creates a UUID from 16 little-endian bytes.
    pub const fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Uuid { bytes }
    }

    /// Creates a UUID from 16 big-endian bytes (the standard textual order).
    pub fn from_be_bytes(mut bytes: [u8; 16]) -> Self {
        bytes.reverse();
        Uuid { bytes }
    }

    /// Creates a UUID from a 16-bit SIG-assigned value.
    pub const fn from_u16(uuid16: u16) -> Self {
        let mut bytes = BASE_UUID;
        bytes[SHORT_OFFSET] = uuid16 as u8;
        bytes[SHORT_OFFSET + 1] = (uuid16 >> 8) as u8;
        Uuid { bytes }
    }

    /// Creates a UUID from a 32-bit SIG-assigned value.
    pub const fn from_u32(uuid32: u32) -> Self {
        let mut bytes = BASE_UUID;
        bytes[SHORT_OFFSET] = uuid32 as u8;
        bytes[SHORT_OFFSET + 1] = (uuid32 >> 8) as u8;
        bytes[SHORT_OFFSET + 2] = (uuid32 >> 16) as u8;
        bytes[SHORT_OFFSET + 3] = (uuid32 >> 24) as u8;
        Uuid { bytes }
    }

    /// Parses a UUID from a little-endian byte slice of length 2, 4, or 16.
    ///
    /// Returns `None` for any other length.
    pub fn try_from_le_slice(slice: &[u8]) -> Option<Self> {
        match slice.len() {
            2 => Some(Uuid::from_u16(u16::from_le_bytes([slice[0], slice[1]]))),
            4 => Some(Uuid::from_u32(u32::from_le_bytes([
                slice[0], slice[1], slice[2], slice[3],
            ]))),
            16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(slice);
                Some(Uuid::from_le_bytes(bytes))
            }
            _ => None,
        }
    }

    /// Returns the 16 little-endian bytes.
    pub const fn to_le_bytes(&self) -> [u8; 16] {
        self.bytes
    }

    /// Returns the 16 bytes in big-endian (textual) order.
    pub fn to_be_bytes(&self) -> [u8; 16] {
        let mut bytes = self.bytes;
        bytes.reverse();
        bytes
    }

    fn is_base_derived(&self) -> bool {
        self.bytes[..SHORT_OFFSET] == BASE_UUID[..SHORT_OFFSET]
    }

    /// Returns the 16-bit short form, if this UUID is a SIG-assigned 16-bit
    /// value.
    pub fn as_u16(&self) -> Option<u16> {
        if self.is_base_derived()
            && self.bytes[SHORT_OFFSET + 2] == 0
            && self.bytes[SHORT_OFFSET + 3] == 0
        {
            Some(u16::from_le_bytes([
                self.bytes[SHORT_OFFSET],
                self.bytes[SHORT_OFFSET + 1],
            ]))
        } else {
            None
        }
    }

    /// Returns the 32-bit short form, if this UUID is SIG-assigned.
    pub fn as_u32(&self) -> Option<u32> {
        if self.is_base_derived() {
            Some(u32::from_le_bytes([
                self.bytes[SHORT_OFFSET],
                self.bytes[SHORT_OFFSET + 1],
                self.bytes[SHORT_OFFSET + 2],
                self.bytes[SHORT_OFFSET + 3],
            ]))
        } else {
            None
        }
    }
}

impl From<u16> for Uuid {
    fn from(uuid16: u16) -> Self {
        Uuid::from_u16(uuid16)
    }
}

impl From<u32> for Uuid {
    fn from(uuid32: u32) -> Self {
        Uuid::from_u32(uuid32)
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == Some(*other)
    }
}

impl PartialEq<Uuid> for u16 {
    fn eq(&self, other: &Uuid) -> bool {
        other.as_u16() == Some(*self)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.to_be_bytes();
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form where possible, full hyphenated form otherwise.
        if let Some(v) = self.as_u16() {
            write!(f, "Uuid(0x{:04X})", v)
        } else if let Some(v) = self.as_u32() {
            write!(f, "Uuid(0x{:08X})", v)
        } else {
            fmt::Display::fmt(self, f)
        }
    }
}

/// Error parsing a UUID from text.
#[derive(Debug)]
pub enum UuidParseError {
    InvalidLength,
    InvalidFormat,
}

impl From<hex::FromHexError> for UuidParseError {
    fn from(_: hex::FromHexError) -> Self {
        UuidParseError::InvalidFormat
    }
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    /// Accepts "180A", "0000180A", or the full hyphenated/plain 128-bit form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| c.is_ascii_hexdigit()).collect();

        match cleaned.len() {
            4 => {
                let v = u16::from_str_radix(&cleaned, 16)
                    .map_err(|_| UuidParseError::InvalidFormat)?;
                Ok(Uuid::from_u16(v))
            }
            8 => {
                let v = u32::from_str_radix(&cleaned, 16)
                    .map_err(|_| UuidParseError::InvalidFormat)?;
                Ok(Uuid::from_u32(v))
            }
            32 => {
                let mut bytes = [0u8; 16];
                hex::decode_to_slice(&cleaned, &mut bytes)?;
                Ok(Uuid::from_be_bytes(bytes))
            }
            _ => Err(UuidParseError::InvalidLength),
        }
    }
}

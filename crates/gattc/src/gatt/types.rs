//! Node types for the server attribute database
//!
//! One [`Service`] owns its characteristics and included-service edges; a
//! [`Characteristic`] owns its descriptors. Parent links are recovered by
//! handle lookup on the cache rather than stored, and an included edge
//! carries the start handle of its target service for the same reason.

use crate::uuid::Uuid;

/// Characteristic properties bitmask from the declaration attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharProperties(pub u8);

impl CharProperties {
    pub const BROADCAST: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;
    pub const AUTHENTICATED_SIGNED_WRITES: u8 = 0x40;
    pub const EXTENDED_PROPERTIES: u8 = 0x80;

    pub fn can_read(&self) -> bool {
        (self.0 & Self::READ) != 0
    }

    pub fn can_write(&self) -> bool {
        (self.0 & Self::WRITE) != 0
    }

    pub fn can_notify(&self) -> bool {
        (self.0 & Self::NOTIFY) != 0
    }

    pub fn can_indicate(&self) -> bool {
        (self.0 & Self::INDICATE) != 0
    }
}

/// A characteristic descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub handle: u16,
    pub uuid: Uuid,
}

/// A characteristic and its descriptors.
///
/// The value handle is the lookup key throughout the cache; the declaration
/// handle is kept alongside it because descriptor ranges are derived from
/// declaration handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub decl_handle: u16,
    pub value_handle: u16,
    pub properties: CharProperties,
    pub uuid: Uuid,
    pub descriptors: Vec<Descriptor>,
}

/// An include declaration inside a service, pointing at another service in
/// the same cache by its start handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludedService {
    pub handle: u16,
    pub uuid: Uuid,
    pub incl_s_handle: u16,
}

/// A service group: the handle range `[s_handle, e_handle]` covers every
/// attribute the service contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub s_handle: u16,
    pub e_handle: u16,
    pub is_primary: bool,
    pub uuid: Uuid,
    pub characteristics: Vec<Characteristic>,
    pub included: Vec<IncludedService>,
}

impl Service {
    pub fn contains_handle(&self, handle: u16) -> bool {
        handle >= self.s_handle && handle <= self.e_handle
    }
}

/// Element type tags for the flattened database export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbElementType {
    PrimaryService,
    SecondaryService,
    IncludedService,
    Characteristic,
    Descriptor,
}

/// One element of the flattened database handed to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbElement {
    pub element_type: DbElementType,
    pub attribute_handle: u16,
    pub start_handle: u16,
    pub end_handle: u16,
    pub id: u16,
    pub uuid: Uuid,
    pub properties: u8,
    /// Always zero: permissions are not discoverable over ATT
    /// (Core 5.0, Vol 3, Part F, 3.2.5).
    pub permissions: u8,
}

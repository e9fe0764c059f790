//! SDP collaborator contract
//!
//! On BR/EDR there is no ATT primary-service discovery; the GATT endpoint
//! is advertised through SDP instead. The engine issues one
//! ServiceSearchAttribute request for the ATT protocol UUID and reads the
//! handle range out of each matching record's protocol descriptor list.
//! Query execution belongs to the SDP layer; only the record model and the
//! request trait live here.

use crate::gap::BdAddr;
use crate::uuid::Uuid;

/// Protocol UUID identifying ATT in a protocol descriptor list.
pub const UUID_PROTOCOL_ATT: u16 = 0x0007;

// Universal attribute IDs requested with the search.
pub const ATTR_ID_SERVICE_CLASS_ID_LIST: u16 = 0x0001;
pub const ATTR_ID_PROTOCOL_DESC_LIST: u16 = 0x0004;

/// Status reported by the SDP layer with its callback.
///
/// `DbFull` means the discovery database filled up before the response was
/// fully stored; the records that did fit are still usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpStatus {
    Success,
    DbFull,
    Error,
}

/// One element of a record's protocol descriptor list: the protocol UUID
/// plus its parameters. For ATT the parameters are the start and end
/// attribute handles of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolElem {
    pub protocol_uuid: Uuid,
    pub params: Vec<u16>,
}

/// A service record returned by the search, reduced to the two attributes
/// the engine asked for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SdpRecord {
    pub service_class_uuids: Vec<Uuid>,
    pub protocol_list: Vec<ProtocolElem>,
}

impl SdpRecord {
    /// The record's service UUID: the first entry of the service class id
    /// list.
    pub fn service_class_uuid(&self) -> Option<&Uuid> {
        self.service_class_uuids.first()
    }

    /// Finds the protocol element for a 16-bit protocol UUID.
    pub fn protocol_elem(&self, protocol: u16) -> Option<&ProtocolElem> {
        self.protocol_list
            .iter()
            .find(|pe| pe.protocol_uuid == protocol)
    }
}

/// Downward interface to the SDP layer.
///
/// `service_search_attr` issues a ServiceSearchAttribute request for the
/// ATT protocol UUID with the service-class-id-list and
/// protocol-descriptor-list attributes, returning `false` if the request
/// could not be sent. Results come back through
/// [`ServerCb::sdp_result`](crate::gatt::ServerCb::sdp_result).
pub trait SdpDriver {
    fn service_search_attr(&mut self, bda: BdAddr) -> bool;
}

//! Type definitions for the ATT discovery contract

use crate::gatt::CharProperties;
use crate::uuid::Uuid;
use std::fmt;

/// Outcome of a GATT/ATT operation.
///
/// These are procedure statuses, not process errors: a failed sub-procedure
/// still drives the discovery pass to an orderly completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
    Busy,
    DbFull,
    InternalError,
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "success"),
            Status::Error => write!(f, "error"),
            Status::Busy => write!(f, "busy"),
            Status::DbFull => write!(f, "database full"),
            Status::InternalError => write!(f, "internal error"),
        }
    }
}

/// ATT discovery sub-procedures the engine can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverKind {
    /// Discover all primary services.
    ServiceAll,
    /// Discover primary services by service UUID.
    ServiceByUuid,
    /// Find included services within a service range.
    IncludedService,
    /// Discover characteristic declarations within a service range.
    Characteristic,
    /// Discover characteristic descriptors within a descriptor range.
    Descriptor,
}

/// One record handed back by the ATT layer during a discovery sub-procedure.
///
/// Which variant arrives is determined by the sub-procedure that produced
/// it; a mismatched pairing is logged and dropped by the engine.
#[derive(Debug, Clone)]
pub enum DiscoveryPayload {
    /// A primary service group from `ServiceAll`/`ServiceByUuid`.
    Service {
        s_handle: u16,
        e_handle: u16,
        uuid: Uuid,
    },
    /// An include declaration: `handle` is the declaration's own handle,
    /// `s_handle..e_handle` the range of the service it points at.
    IncludedService {
        handle: u16,
        s_handle: u16,
        e_handle: u16,
        uuid: Uuid,
    },
    /// A characteristic declaration and the value handle it announces.
    Characteristic {
        decl_handle: u16,
        value_handle: u16,
        properties: CharProperties,
        uuid: Uuid,
    },
    /// A characteristic descriptor.
    Descriptor { handle: u16, uuid: Uuid },
}

/// Downward interface to the ATT client layer.
///
/// `discover` starts one sub-procedure over the given handle range and
/// returns immediately; records come back through
/// [`ServerCb::discovery_result`](crate::gatt::ServerCb::discovery_result)
/// and the closing status through
/// [`ServerCb::discovery_complete`](crate::gatt::ServerCb::discovery_complete).
/// Results for one sub-procedure arrive in ascending handle order.
pub trait AttDriver {
    fn discover(&mut self, conn_id: u16, kind: DiscoverKind, s_handle: u16, e_handle: u16)
        -> Status;
}

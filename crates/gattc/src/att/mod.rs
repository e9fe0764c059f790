//! Attribute Protocol (ATT) discovery contract
//!
//! The ATT wire layer lives outside this crate; what lives here is the
//! narrow surface the discovery engine drives it through: the discovery
//! sub-procedure kinds, the result payloads fed back in, the status codes
//! that flow through the state machine, and the declaration UUIDs GATT
//! assigns.

pub mod constants;
pub mod types;

pub use self::constants::*;
pub use self::types::{AttDriver, DiscoverKind, DiscoveryPayload, Status};

//! gattc - GATT client service discovery and cache engine
//!
//! Given a connection to a remote GATT server, this library drives the
//! Attribute Protocol discovery sequence (services, included services,
//! characteristics, descriptors), assembles the results into an in-memory
//! attribute database, answers handle lookups against it, and persists it
//! per bonded peer so later reconnections skip the air interface. On
//! BR/EDR transports the primary-service step is replaced by an SDP query
//! for the ATT endpoint.
//!
//! The ATT wire layer, SDP execution, connection registry, bonding state
//! and event dispatch belong to the surrounding stack and are consumed
//! through the `AttDriver`, `SdpDriver`, `BondingStore` and `EventSink`
//! traits.

pub mod att;
pub mod error;
pub mod gap;
pub mod gatt;
pub mod sdp;
pub mod uuid;

// Re-export common types for convenience
pub use att::{AttDriver, DiscoverKind, DiscoveryPayload, Status};
pub use error::Error;
pub use gap::{BdAddr, BondingStore, Transport};
pub use gatt::{
    CacheStore, CharProperties, Characteristic, DbElement, DbElementType, Descriptor,
    DiscoveryCtx, EventSink, GattEvent, IncludedService, ServerCache, ServerCb, Service,
};
pub use sdp::{SdpDriver, SdpRecord, SdpStatus};
pub use uuid::Uuid;

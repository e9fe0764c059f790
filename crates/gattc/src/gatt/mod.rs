//! GATT client service discovery and attribute cache
//!
//! This module houses the engine core: the per-server attribute database,
//! the discovery scratch buffer, the state machine that fills both from
//! ATT (or SDP, on BR/EDR), and the on-disk cache that lets bonded peers
//! reconnect without rediscovery.

pub mod cache;
pub mod discovery;
pub mod explore;
pub mod persist;
pub mod types;

#[cfg(test)]
mod tests;

pub use cache::ServerCache;
pub use discovery::{DiscoveryCtx, DiscoveryState, EventSink, GattEvent, ServerCb};
pub use explore::{AttrRec, ExploreList, MAX_CACHE_CHAR};
pub use persist::{CacheStore, NvAttr, NvAttrType, CACHE_VERSION, DEFAULT_CACHE_PREFIX};
pub use types::{
    CharProperties, Characteristic, DbElement, DbElementType, Descriptor, IncludedService, Service,
};

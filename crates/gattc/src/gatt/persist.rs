//! On-disk server cache
//!
//! The cache for one peer is a flat file `<prefix><bda-hex>`: a version
//! word, an attribute count, then fixed-width attribute records. The
//! format is little-endian and packed; any change to the record layout
//! requires a bump of [`CACHE_VERSION`], which gates loading.
//!
//! Records are written in a positional order the loader depends on: every
//! service first, then for each service its characteristics (each followed
//! by that characteristic's descriptors) and finally its include edges. By
//! the time an include record is replayed, both its owner and its target
//! service are guaranteed to be back in the cache.

use crate::error::Error;
use crate::gap::BdAddr;
use crate::gatt::cache::ServerCache;
use crate::gatt::types::CharProperties;
use crate::uuid::Uuid;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

/// Version tag written at the head of every cache file.
pub const CACHE_VERSION: u16 = 2;

/// Default platform location of per-peer cache files.
pub const DEFAULT_CACHE_PREFIX: &str = "/data/misc/bluetooth/gatt_cache_";

/// Size of one serialized attribute record.
pub const NV_ATTR_SIZE: usize = 27;

/// Kind tag of a persisted attribute record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvAttrType {
    Service = 0,
    IncludedService = 1,
    Characteristic = 2,
    Descriptor = 3,
}

impl NvAttrType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(NvAttrType::Service),
            1 => Some(NvAttrType::IncludedService),
            2 => Some(NvAttrType::Characteristic),
            3 => Some(NvAttrType::Descriptor),
            _ => None,
        }
    }
}

/// One persisted attribute record.
///
/// Field use varies by type: a service record carries its handle range and
/// primary flag; a characteristic carries its value handle in `s_handle`,
/// its declaration handle in `id` and its properties in `prop`; a
/// descriptor carries only its handle; an include edge carries its own
/// handle in `s_handle` and its target's start handle in
/// `incl_srvc_handle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvAttr {
    pub attr_type: NvAttrType,
    pub s_handle: u16,
    pub e_handle: u16,
    pub uuid: Uuid,
    pub prop: u8,
    pub incl_srvc_handle: u16,
    pub is_primary: bool,
    pub id: u16,
}

impl NvAttr {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LittleEndian>(self.s_handle)?;
        w.write_u16::<LittleEndian>(self.e_handle)?;
        w.write_u8(self.attr_type as u8)?;
        w.write_u8(self.is_primary as u8)?;
        w.write_u16::<LittleEndian>(self.id)?;
        w.write_u8(self.prop)?;
        w.write_u16::<LittleEndian>(self.incl_srvc_handle)?;
        w.write_all(&self.uuid.to_le_bytes())?;
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self, Error> {
        let s_handle = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let e_handle = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let type_byte = r.read_u8().map_err(truncated)?;
        let attr_type = NvAttrType::from_u8(type_byte)
            .ok_or_else(|| Error::CacheCorrupt(format!("unknown attribute type {}", type_byte)))?;
        let is_primary = r.read_u8().map_err(truncated)? != 0;
        let id = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let prop = r.read_u8().map_err(truncated)?;
        let incl_srvc_handle = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let mut uuid = [0u8; 16];
        r.read_exact(&mut uuid).map_err(truncated)?;

        Ok(NvAttr {
            attr_type,
            s_handle,
            e_handle,
            uuid: Uuid::from_le_bytes(uuid),
            prop,
            incl_srvc_handle,
            is_primary,
            id,
        })
    }
}

fn truncated(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::CacheCorrupt("short read".into())
    } else {
        Error::Io(e)
    }
}

/// Store of per-peer cache files under a configured path prefix.
#[derive(Debug, Clone)]
pub struct CacheStore {
    prefix: String,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_PREFIX)
    }
}

impl CacheStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Path of the cache file for one peer: the prefix followed by the
    /// address as lowercase hex, MSB first, no separators.
    pub fn cache_file_name(&self, bda: &BdAddr) -> PathBuf {
        PathBuf::from(format!("{}{}", self.prefix, bda.to_hex()))
    }

    /// Writes the cache for `bda` to disk. An empty cache writes nothing.
    pub fn save(&self, bda: &BdAddr, cache: &ServerCache) -> Result<(), Error> {
        if cache.is_empty() {
            return Ok(());
        }

        let attrs = flatten_cache(cache);
        if attrs.len() > usize::from(u16::MAX) {
            return Err(Error::CacheCorrupt(format!(
                "attribute count {} does not fit the header",
                attrs.len()
            )));
        }

        let fname = self.cache_file_name(bda);
        let mut w = BufWriter::new(File::create(&fname)?);
        w.write_u16::<LittleEndian>(CACHE_VERSION)?;
        w.write_u16::<LittleEndian>(attrs.len() as u16)?;
        for attr in &attrs {
            attr.write_to(&mut w)?;
        }
        w.flush()?;

        info!(
            "saved server cache for {}: {} attributes to {}",
            bda,
            attrs.len(),
            fname.display()
        );
        Ok(())
    }

    /// Reads the cache file for `bda` back as attribute records.
    ///
    /// Fails on a missing file, a version mismatch, or a file shorter than
    /// its declared record count.
    pub fn load(&self, bda: &BdAddr) -> Result<Vec<NvAttr>, Error> {
        let fname = self.cache_file_name(bda);
        let mut r = BufReader::new(File::open(&fname)?);

        let version = r.read_u16::<LittleEndian>().map_err(truncated)?;
        if version != CACHE_VERSION {
            return Err(Error::CacheVersionMismatch(version));
        }

        let num_attr = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let mut attrs = Vec::with_capacity(usize::from(num_attr));
        for _ in 0..num_attr {
            attrs.push(NvAttr::read_from(&mut r)?);
        }

        debug!(
            "read {} cached attributes for {} from {}",
            attrs.len(),
            bda,
            fname.display()
        );
        Ok(attrs)
    }

    /// Deletes the cache file for `bda`. Deleting a file that does not
    /// exist is a success.
    pub fn reset(&self, bda: &BdAddr) -> Result<(), Error> {
        match fs::remove_file(self.cache_file_name(bda)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Serializes the cache into the positional record order described in the
/// module docs.
fn flatten_cache(cache: &ServerCache) -> Vec<NvAttr> {
    let mut attrs = Vec::with_capacity(cache.db_size(0x0000, 0xFFFF));

    for service in cache.services() {
        attrs.push(NvAttr {
            attr_type: NvAttrType::Service,
            s_handle: service.s_handle,
            e_handle: service.e_handle,
            uuid: service.uuid,
            prop: 0,
            incl_srvc_handle: 0,
            is_primary: service.is_primary,
            id: 0,
        });
    }

    for service in cache.services() {
        for charac in &service.characteristics {
            attrs.push(NvAttr {
                attr_type: NvAttrType::Characteristic,
                s_handle: charac.value_handle,
                e_handle: 0,
                uuid: charac.uuid,
                prop: charac.properties.0,
                incl_srvc_handle: 0,
                is_primary: false,
                id: charac.decl_handle,
            });

            for desc in &charac.descriptors {
                attrs.push(NvAttr {
                    attr_type: NvAttrType::Descriptor,
                    s_handle: desc.handle,
                    e_handle: 0,
                    uuid: desc.uuid,
                    prop: 0,
                    incl_srvc_handle: 0,
                    is_primary: false,
                    id: 0,
                });
            }
        }

        for incl in &service.included {
            attrs.push(NvAttr {
                attr_type: NvAttrType::IncludedService,
                s_handle: incl.handle,
                e_handle: 0,
                uuid: incl.uuid,
                prop: 0,
                incl_srvc_handle: incl.incl_s_handle,
                is_primary: false,
                id: 0,
            });
        }
    }

    attrs
}

/// Replaces the cache contents by replaying persisted records in file
/// order.
pub fn rebuild_cache(cache: &mut ServerCache, attrs: &[NvAttr]) {
    cache.clear();

    for attr in attrs {
        match attr.attr_type {
            NvAttrType::Service => {
                cache.add_service(attr.s_handle, attr.e_handle, attr.uuid, attr.is_primary);
            }
            NvAttrType::Characteristic => {
                // Caches written before the declaration handle was recorded
                // carry a zero id; fall back to the value handle.
                let decl_handle = if attr.id != 0 { attr.id } else { attr.s_handle };
                cache.add_characteristic(
                    decl_handle,
                    attr.s_handle,
                    attr.uuid,
                    CharProperties(attr.prop),
                );
            }
            NvAttrType::Descriptor => {
                cache.add_descriptor(attr.s_handle, attr.uuid);
            }
            NvAttrType::IncludedService => {
                cache.add_included(attr.s_handle, attr.uuid, attr.incl_srvc_handle);
            }
        }
    }
}

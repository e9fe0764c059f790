//! Discovery scratch buffer
//!
//! While a discovery pass runs, service and characteristic records land in
//! this bounded list before being lifted into the cache. Service records
//! occupy the front (`0..total_srvc`); the records of the service currently
//! being expanded are appended behind them and reclaimed when exploration
//! moves to the next service.

use crate::att::{handle_is_valid, Status};
use crate::gatt::types::CharProperties;
use crate::uuid::Uuid;
use log::{debug, error};

/// Capacity of the scratch buffer, in records.
pub const MAX_CACHE_CHAR: usize = 128;

/// One scratch record. In service mode `s_handle..e_handle` is the service
/// range; in characteristic mode `s_handle` is the value handle,
/// `char_decl_handle` the declaration handle, and `e_handle` the end of the
/// descriptor search range, patched as later declarations arrive.
#[derive(Debug, Clone)]
pub struct AttrRec {
    pub s_handle: u16,
    pub e_handle: u16,
    pub char_decl_handle: u16,
    pub is_primary: bool,
    pub property: CharProperties,
    pub uuid: Uuid,
}

#[derive(Debug)]
pub struct ExploreList {
    recs: Vec<AttrRec>,
    /// Index of the service being expanded.
    pub(crate) cur_srvc_idx: usize,
    /// Index of the characteristic being expanded.
    pub(crate) cur_char_idx: usize,
    /// Service records held.
    pub(crate) total_srvc: usize,
    /// Characteristic records of the current service not yet consumed.
    pub(crate) total_char: usize,
}

impl ExploreList {
    pub fn new() -> Self {
        Self {
            recs: Vec::with_capacity(MAX_CACHE_CHAR),
            cur_srvc_idx: 0,
            cur_char_idx: 0,
            total_srvc: 0,
            total_char: 0,
        }
    }

    pub fn rec(&self, idx: usize) -> Option<&AttrRec> {
        self.recs.get(idx)
    }

    pub fn len(&self) -> usize {
        self.recs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recs.is_empty()
    }

    /// Appends a service record.
    pub fn push_service(&mut self, s_handle: u16, e_handle: u16, uuid: Uuid, is_primary: bool) -> Status {
        if self.recs.len() >= MAX_CACHE_CHAR {
            error!("service 0x{:04x} not added, explore list full", s_handle);
            return Status::DbFull;
        }

        debug!("explore list: service 0x{:04x} {:?}", s_handle, uuid);
        self.recs.push(AttrRec {
            s_handle,
            e_handle,
            char_decl_handle: 0,
            is_primary,
            property: CharProperties(0),
            uuid,
        });
        self.total_srvc += 1;
        Status::Success
    }

    /// Appends a characteristic record for the service being expanded.
    ///
    /// The new record's descriptor range is initialized to run to the end
    /// of the service; the previous record's range, if any, is closed off
    /// just below this declaration.
    pub fn push_characteristic(
        &mut self,
        decl_handle: u16,
        value_handle: u16,
        uuid: Uuid,
        property: CharProperties,
    ) -> Status {
        let Some(service_end) = self.rec(self.cur_srvc_idx).map(|r| r.e_handle) else {
            error!("unexpected characteristic result, no service under exploration");
            return Status::InternalError;
        };

        if self.recs.len() >= MAX_CACHE_CHAR {
            error!(
                "characteristic 0x{:04x} not added, explore list full",
                value_handle
            );
            return Status::DbFull;
        }

        self.total_char += 1;
        self.recs.push(AttrRec {
            s_handle: value_handle,
            e_handle: service_end,
            char_decl_handle: decl_handle,
            is_primary: false,
            property,
            uuid,
        });

        if self.total_char > 1 {
            let prev = self.recs.len() - 2;
            self.recs[prev].e_handle = decl_handle.saturating_sub(1);
        }
        Status::Success
    }

    /// Whether a service with this range is already listed. An invalid
    /// handle pair reports as present so it is never added.
    pub fn contains_service(&self, s_handle: u16, e_handle: u16) -> bool {
        if !handle_is_valid(s_handle) || !handle_is_valid(e_handle) || s_handle > e_handle {
            error!(
                "invalid included service handle range [0x{:04x} ~ 0x{:04x}]",
                s_handle, e_handle
            );
            return true;
        }

        self.recs
            .iter()
            .any(|rec| rec.s_handle == s_handle || rec.e_handle == e_handle)
    }

    /// Drops the characteristic records of the previously expanded service,
    /// keeping the service records at the front.
    pub fn reclaim_characteristics(&mut self) {
        self.recs.truncate(self.total_srvc);
    }

    /// Debug dump of the current records.
    pub fn log_records(&self) {
        debug!("<== explore list, {} records ==>", self.recs.len());
        for (i, rec) in self.recs.iter().enumerate() {
            debug!(
                "rec[{}] {:?} s_handle 0x{:04x} e_handle 0x{:04x} primary={}",
                i, rec.uuid, rec.s_handle, rec.e_handle, rec.is_primary
            );
        }
    }
}

impl Default for ExploreList {
    fn default() -> Self {
        Self::new()
    }
}

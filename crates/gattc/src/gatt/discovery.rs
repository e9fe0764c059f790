//! GATT client discovery state machine
//!
//! One [`ServerCb`] exists per remote server. A discovery pass walks
//! `Services -> Included -> Characteristics -> Descriptors`, looping the
//! inner three phases over each service found, then saves the cache for
//! bonded peers and returns to `Idle`. The engine suspends whenever it
//! hands a request to the ATT or SDP driver and resumes on the matching
//! result/completion callback; everything runs serially on the host-stack
//! task, so there is no locking.

use crate::att::{
    handle_is_valid, AttDriver, DiscoverKind, DiscoveryPayload, Status, ATT_HANDLE_MAX,
    ATT_HANDLE_MIN,
};
use crate::error::Error;
use crate::gap::{BdAddr, BondingStore, Transport};
use crate::gatt::cache::ServerCache;
use crate::gatt::explore::ExploreList;
use crate::gatt::persist::{rebuild_cache, CacheStore};
use crate::gatt::types::{Characteristic, DbElement, Descriptor, Service};
use crate::sdp::{SdpDriver, SdpRecord, SdpStatus, UUID_PROTOCOL_ATT};
use crate::uuid::Uuid;
use log::{debug, error, info, warn};

/// Phase of the discovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle,
    DiscoverServices,
    DiscoverIncluded,
    DiscoverCharacteristics,
    DiscoverDescriptors,
    Save,
}

/// Events surfaced to the application dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum GattEvent {
    /// One match from [`ServerCb::search_service`].
    SearchResult {
        conn_id: u16,
        service_handle: u16,
        uuid: Uuid,
    },
    /// A discovery pass finished, successfully or not.
    DiscoveryComplete { conn_id: u16, status: Status },
}

/// Upward interface to the application event dispatcher.
pub trait EventSink {
    fn dispatch(&mut self, event: GattEvent);
}

/// The collaborators a discovery pass runs against, borrowed per call from
/// the surrounding stack.
pub struct DiscoveryCtx<'a> {
    pub att: &'a mut dyn AttDriver,
    pub sdp: &'a mut dyn SdpDriver,
    pub bonding: &'a dyn BondingStore,
    pub store: &'a CacheStore,
    pub events: &'a mut dyn EventSink,
}

/// Per-server control block: discovery state plus the attribute cache.
///
/// While a pass is in progress the explore list is live and every public
/// query reports an empty cache; readers only ever observe a complete
/// database.
#[derive(Debug)]
pub struct ServerCb {
    server_bda: BdAddr,
    transport: Transport,
    state: DiscoveryState,
    /// Sticky status of the pass; the first failing sub-procedure wins.
    status: Status,
    explore: Option<ExploreList>,
    /// Include edges found during the pass, resolved into the cache once
    /// every service has been lifted out of the explore list.
    pending_included: Vec<(u16, Uuid, u16)>,
    cache: ServerCache,
}

impl ServerCb {
    pub fn new(server_bda: BdAddr, transport: Transport) -> Self {
        Self {
            server_bda,
            transport,
            state: DiscoveryState::Idle,
            status: Status::Success,
            explore: None,
            pending_included: Vec::new(),
            cache: ServerCache::new(),
        }
    }

    pub fn server_bda(&self) -> BdAddr {
        self.server_bda
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    pub fn discovery_in_progress(&self) -> bool {
        self.explore.is_some()
    }

    /// Starts a discovery pass. Any previously cached database is dropped.
    ///
    /// On LE the pass begins with ATT primary-service discovery over the
    /// full handle range; on BR/EDR with an SDP search for the ATT
    /// endpoint. A failure to issue the first request tears the pass back
    /// down and is returned to the caller.
    pub fn start_discovery(&mut self, conn_id: u16, ctx: &mut DiscoveryCtx<'_>) -> Status {
        if self.explore.is_some() {
            warn!("discovery already in progress for {}", self.server_bda);
            return Status::Busy;
        }

        info!(
            "starting service discovery for {} over {:?}",
            self.server_bda, self.transport
        );
        self.cache.clear();
        self.pending_included.clear();
        self.explore = Some(ExploreList::new());
        self.status = Status::Success;
        self.state = DiscoveryState::DiscoverServices;

        let status = match self.transport {
            Transport::Le => ctx.att.discover(
                conn_id,
                DiscoverKind::ServiceAll,
                ATT_HANDLE_MIN,
                ATT_HANDLE_MAX,
            ),
            Transport::BrEdr => {
                if ctx.sdp.service_search_attr(self.server_bda) {
                    Status::Success
                } else {
                    Status::Error
                }
            }
        };

        if !status.is_success() {
            warn!("could not start service discovery: {}", status);
            self.explore = None;
            self.state = DiscoveryState::Idle;
        }
        status
    }

    /// Feeds one ATT discovery record into the pass.
    pub fn discovery_result(&mut self, kind: DiscoverKind, payload: DiscoveryPayload) {
        let Some(explore) = self.explore.as_mut() else {
            warn!("discovery result {:?} with no discovery in progress", kind);
            return;
        };

        match (kind, payload) {
            (
                DiscoverKind::ServiceAll | DiscoverKind::ServiceByUuid,
                DiscoveryPayload::Service {
                    s_handle,
                    e_handle,
                    uuid,
                },
            ) => {
                explore.push_service(s_handle, e_handle, uuid, true);
            }
            (
                DiscoverKind::IncludedService,
                DiscoveryPayload::IncludedService {
                    handle,
                    s_handle,
                    e_handle,
                    uuid,
                },
            ) => {
                // A target never seen as primary is queued as a secondary
                // service so its contents get explored too.
                let listed = explore.contains_service(s_handle, e_handle);
                let mut target_known = listed;
                if !listed {
                    target_known = explore
                        .push_service(s_handle, e_handle, uuid, false)
                        .is_success();
                }
                if target_known {
                    self.pending_included.push((handle, uuid, s_handle));
                }
            }
            (
                DiscoverKind::Characteristic,
                DiscoveryPayload::Characteristic {
                    decl_handle,
                    value_handle,
                    properties,
                    uuid,
                },
            ) => {
                explore.push_characteristic(decl_handle, value_handle, uuid, properties);
            }
            (DiscoverKind::Descriptor, DiscoveryPayload::Descriptor { handle, uuid }) => {
                self.cache.add_descriptor(handle, uuid);
            }
            (kind, payload) => {
                warn!(
                    "mismatched discovery result {:?} for {:?}, dropped",
                    payload, kind
                );
            }
        }
    }

    /// Feeds the completion of one ATT sub-procedure into the pass.
    ///
    /// A non-success status marks the whole pass failed and finalizes it
    /// immediately; otherwise the state machine advances to the next
    /// sub-procedure.
    pub fn discovery_complete(
        &mut self,
        conn_id: u16,
        kind: DiscoverKind,
        status: Status,
        ctx: &mut DiscoveryCtx<'_>,
    ) {
        if self.explore.is_none() {
            warn!(
                "discovery completion {:?} with no discovery in progress",
                kind
            );
            return;
        }

        if !status.is_success() {
            warn!("discovery sub-procedure {:?} failed: {}", kind, status);
            self.status = status;
            self.finish_discovery(conn_id, ctx);
            return;
        }

        match kind {
            DiscoverKind::ServiceAll | DiscoverKind::ServiceByUuid => {
                if let Some(explore) = self.explore.as_ref() {
                    explore.log_records();
                }
                self.explore_service(conn_id, ctx);
            }
            DiscoverKind::IncludedService => {
                let range = {
                    let Some(explore) = self.explore.as_mut() else {
                        return;
                    };
                    explore.cur_char_idx = explore.total_srvc;
                    explore.total_char = 0;
                    explore
                        .rec(explore.cur_srvc_idx)
                        .map(|rec| (rec.s_handle, rec.e_handle))
                };
                let Some((s_handle, e_handle)) = range else {
                    error!("include discovery finished with no current service");
                    return;
                };
                self.state = DiscoveryState::DiscoverCharacteristics;
                let status =
                    ctx.att
                        .discover(conn_id, DiscoverKind::Characteristic, s_handle, e_handle);
                if !status.is_success() {
                    warn!("characteristic discovery request failed: {}", status);
                }
            }
            DiscoverKind::Characteristic => {
                if let Some(explore) = self.explore.as_ref() {
                    explore.log_records();
                }
                let has_chars = self
                    .explore
                    .as_ref()
                    .map(|explore| explore.total_char > 0)
                    .unwrap_or(false);
                if has_chars {
                    self.explore_characteristic(conn_id, ctx);
                } else {
                    // Service without characteristics: straight to the next.
                    if let Some(explore) = self.explore.as_mut() {
                        explore.cur_srvc_idx += 1;
                    }
                    self.explore_service(conn_id, ctx);
                }
            }
            DiscoverKind::Descriptor => self.descriptor_phase_complete(conn_id, ctx),
        }
    }

    /// Feeds the SDP search callback into the pass (BR/EDR only).
    ///
    /// Every record carrying an ATT protocol element with a valid handle
    /// pair becomes a primary-service record; the rest are skipped. The
    /// pass then joins the common explore loop, so an error status (or an
    /// empty record set) completes with an empty database.
    pub fn sdp_result(
        &mut self,
        conn_id: u16,
        status: SdpStatus,
        records: &[SdpRecord],
        ctx: &mut DiscoveryCtx<'_>,
    ) {
        let Some(explore) = self.explore.as_mut() else {
            warn!("SDP result with no discovery in progress");
            return;
        };

        if matches!(status, SdpStatus::Success | SdpStatus::DbFull) {
            for record in records {
                let Some(&uuid) = record.service_class_uuid() else {
                    continue;
                };
                let Some(pe) = record.protocol_elem(UUID_PROTOCOL_ATT) else {
                    continue;
                };
                if pe.params.len() < 2 {
                    continue;
                }
                let (s_handle, e_handle) = (pe.params[0], pe.params[1]);

                if handle_is_valid(s_handle) && handle_is_valid(e_handle) {
                    debug!(
                        "found ATT service {:?} handle [0x{:04x} ~ 0x{:04x}]",
                        uuid, s_handle, e_handle
                    );
                    explore.push_service(s_handle, e_handle, uuid, true);
                } else {
                    error!(
                        "invalid ATT handle range [0x{:04x} ~ 0x{:04x}] in SDP record",
                        s_handle, e_handle
                    );
                }
            }
        }

        self.explore_service(conn_id, ctx);
    }

    /// Lifts the current service record into the cache and begins its
    /// include discovery, or finalizes the pass when none remain.
    fn explore_service(&mut self, conn_id: u16, ctx: &mut DiscoveryCtx<'_>) {
        let rec = {
            let Some(explore) = self.explore.as_mut() else {
                error!("explore_service with no discovery in progress");
                return;
            };
            debug!(
                "exploring service {} of {}",
                explore.cur_srvc_idx, explore.total_srvc
            );
            explore.cur_char_idx = explore.total_srvc;
            explore.reclaim_characteristics();
            if explore.cur_srvc_idx < explore.total_srvc {
                explore.rec(explore.cur_srvc_idx).cloned()
            } else {
                None
            }
        };

        match rec {
            Some(rec) => {
                self.cache
                    .add_service(rec.s_handle, rec.e_handle, rec.uuid, rec.is_primary);
                self.state = DiscoveryState::DiscoverIncluded;
                let status = ctx.att.discover(
                    conn_id,
                    DiscoverKind::IncludedService,
                    rec.s_handle,
                    rec.e_handle,
                );
                if !status.is_success() {
                    warn!("include discovery request failed: {}", status);
                }
            }
            None => {
                info!("no more services to explore for {}", self.server_bda);
                self.resolve_pending_included();
                self.cache.log_cache();
                self.state = DiscoveryState::Save;

                if ctx.bonding.is_bonded(&self.server_bda) {
                    if let Err(e) = self.save_cache(ctx.store) {
                        warn!("saving server cache for {} failed: {}", self.server_bda, e);
                    }
                }
                self.finish_discovery(conn_id, ctx);
            }
        }
    }

    /// Lifts the current characteristic record into the cache and begins
    /// its descriptor discovery.
    fn explore_characteristic(&mut self, conn_id: u16, ctx: &mut DiscoveryCtx<'_>) {
        let rec = {
            let Some(explore) = self.explore.as_ref() else {
                error!("explore_characteristic with no discovery in progress");
                return;
            };
            explore.rec(explore.cur_char_idx).cloned()
        };
        let Some(rec) = rec else {
            error!("characteristic record index out of range");
            return;
        };

        self.cache
            .add_characteristic(rec.char_decl_handle, rec.s_handle, rec.uuid, rec.property);

        self.state = DiscoveryState::DiscoverDescriptors;
        let s_handle = rec.s_handle.saturating_add(1);
        let issued = s_handle <= rec.e_handle
            && ctx
                .att
                .discover(conn_id, DiscoverKind::Descriptor, s_handle, rec.e_handle)
                .is_success();

        // An empty descriptor range must not stall the pass; treat it as a
        // completed sub-procedure.
        if !issued {
            self.descriptor_phase_complete(conn_id, ctx);
        }
    }

    /// Advances past a finished descriptor range: next characteristic of
    /// the current service, or the next service.
    fn descriptor_phase_complete(&mut self, conn_id: u16, ctx: &mut DiscoveryCtx<'_>) {
        let more_chars = {
            let Some(explore) = self.explore.as_mut() else {
                return;
            };
            explore.total_char = explore.total_char.saturating_sub(1);
            if explore.total_char > 0 {
                explore.cur_char_idx += 1;
                true
            } else {
                explore.cur_srvc_idx += 1;
                false
            }
        };

        if more_chars {
            self.explore_characteristic(conn_id, ctx);
        } else {
            self.explore_service(conn_id, ctx);
        }
    }

    /// Moves the include edges collected during the pass into the cache.
    /// Deferred to this point so that forward references resolve: every
    /// target service is in the cache once the explore loop has finished.
    fn resolve_pending_included(&mut self) {
        for (handle, uuid, incl_s_handle) in self.pending_included.drain(..) {
            self.cache.add_included(handle, uuid, incl_s_handle);
        }
    }

    /// Tears the pass down and reports its outcome. A failed pass never
    /// publishes a partial database.
    fn finish_discovery(&mut self, conn_id: u16, ctx: &mut DiscoveryCtx<'_>) {
        let status = self.status;
        if !status.is_success() {
            self.cache.clear();
        }
        self.explore = None;
        self.pending_included.clear();
        self.state = DiscoveryState::Idle;
        self.status = Status::Success;

        info!(
            "service discovery for {} complete: {}",
            self.server_bda, status
        );
        ctx.events.dispatch(GattEvent::DiscoveryComplete { conn_id, status });
    }

    /// Drops all discovery state and the cached database. Used by the
    /// connection manager when the link goes away mid-pass.
    pub fn reset(&mut self) {
        self.explore = None;
        self.pending_included.clear();
        self.cache.clear();
        self.state = DiscoveryState::Idle;
        self.status = Status::Success;
    }

    fn readable(&self) -> bool {
        self.explore.is_none() && !self.cache.is_empty()
    }

    /// Cached services, empty while a discovery pass is in progress.
    pub fn services(&self) -> &[Service] {
        if self.readable() {
            self.cache.services()
        } else {
            &[]
        }
    }

    pub fn service_for_handle(&self, handle: u16) -> Option<&Service> {
        if !self.readable() {
            return None;
        }
        self.cache.service_for_handle(handle)
    }

    pub fn characteristic_for_handle(&self, handle: u16) -> Option<&Characteristic> {
        if !self.readable() {
            return None;
        }
        self.cache.characteristic_for_handle(handle)
    }

    pub fn descriptor_for_handle(&self, handle: u16) -> Option<&Descriptor> {
        if !self.readable() {
            return None;
        }
        self.cache.descriptor_for_handle(handle)
    }

    /// Emits one `SearchResult` event per cached service matching `uuid`,
    /// or per cached service when no filter is given.
    pub fn search_service(&self, conn_id: u16, uuid: Option<Uuid>, events: &mut dyn EventSink) {
        if !self.readable() {
            return;
        }
        for service in self.cache.services() {
            if let Some(filter) = uuid {
                if filter != service.uuid {
                    continue;
                }
            }
            debug!(
                "search hit: service {:?} handle 0x{:04x}",
                service.uuid, service.s_handle
            );
            events.dispatch(GattEvent::SearchResult {
                conn_id,
                service_handle: service.s_handle,
                uuid: service.uuid,
            });
        }
    }

    /// Flattened copy of the database between `start` and `end`.
    pub fn get_db(&self, start: u16, end: u16) -> Vec<DbElement> {
        if !self.readable() {
            error!("no server cache available for {}", self.server_bda);
            return Vec::new();
        }
        self.cache.get_db(start, end)
    }

    /// Writes the current database to the store. An empty database writes
    /// nothing.
    pub fn save_cache(&self, store: &CacheStore) -> Result<(), Error> {
        store.save(&self.server_bda, &self.cache)
    }

    /// Rebuilds the database from the on-disk cache, skipping the air
    /// interface entirely. The in-memory database is replaced only after
    /// the whole file has been read successfully.
    pub fn load_cache(&mut self, store: &CacheStore) -> Result<(), Error> {
        let attrs = store.load(&self.server_bda)?;
        rebuild_cache(&mut self.cache, &attrs);
        info!(
            "rebuilt server cache for {} from storage, {} services",
            self.server_bda,
            self.cache.services().len()
        );
        Ok(())
    }
}

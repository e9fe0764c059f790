//! In-memory attribute database for one GATT server
//!
//! Services are kept in discovery order, which is ascending start handle;
//! their ranges never overlap, so any attribute handle identifies at most
//! one containing service. Writers are the discovery state machine and the
//! cache loader; everything else only reads.

use crate::gatt::types::{
    CharProperties, Characteristic, DbElement, DbElementType, Descriptor, IncludedService, Service,
};
use crate::uuid::Uuid;
use log::{debug, error};

/// The attribute database of one remote server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerCache {
    services: Vec<Service>,
}

impl ServerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.services.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Services in discovery order (ascending start handle).
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Appends a service. The caller guarantees the range does not overlap
    /// any existing service; the cache does not re-check.
    pub fn add_service(&mut self, s_handle: u16, e_handle: u16, uuid: Uuid, is_primary: bool) {
        self.services.push(Service {
            s_handle,
            e_handle,
            is_primary,
            uuid,
            characteristics: Vec::new(),
            included: Vec::new(),
        });
    }

    /// Appends a characteristic to the service containing `decl_handle`.
    ///
    /// The service range is widened to cover the value handle if the server
    /// reported a group end short of it.
    pub fn add_characteristic(
        &mut self,
        decl_handle: u16,
        value_handle: u16,
        uuid: Uuid,
        properties: CharProperties,
    ) {
        let Some(service) = self.service_for_handle_mut(decl_handle) else {
            error!(
                "no service contains characteristic declaration 0x{:04x}, dropped",
                decl_handle
            );
            return;
        };

        if service.e_handle < value_handle {
            service.e_handle = value_handle;
        }

        service.characteristics.push(Characteristic {
            decl_handle,
            value_handle,
            properties,
            uuid,
            descriptors: Vec::new(),
        });
    }

    /// Appends a descriptor to the last characteristic of the service
    /// containing `handle`.
    pub fn add_descriptor(&mut self, handle: u16, uuid: Uuid) {
        let Some(service) = self.service_for_handle_mut(handle) else {
            error!("no service contains descriptor 0x{:04x}, dropped", handle);
            return;
        };

        let Some(charac) = service.characteristics.last_mut() else {
            error!(
                "descriptor 0x{:04x} arrived before any characteristic, dropped",
                handle
            );
            return;
        };

        charac.descriptors.push(Descriptor { handle, uuid });
    }

    /// Records an include edge on the service containing `handle`, pointing
    /// at the service that starts at `incl_s_handle`. The edge is dropped
    /// if either side is missing.
    pub fn add_included(&mut self, handle: u16, uuid: Uuid, incl_s_handle: u16) {
        if self.service_for_handle(incl_s_handle).is_none() {
            error!(
                "included service 0x{:04x} is not in the cache, edge dropped",
                incl_s_handle
            );
            return;
        }

        let Some(service) = self.service_for_handle_mut(handle) else {
            error!(
                "no service contains include declaration 0x{:04x}, dropped",
                handle
            );
            return;
        };

        service.included.push(IncludedService {
            handle,
            uuid,
            incl_s_handle,
        });
    }

    /// The service whose range contains `handle`.
    pub fn service_for_handle(&self, handle: u16) -> Option<&Service> {
        self.services.iter().find(|s| s.contains_handle(handle))
    }

    fn service_for_handle_mut(&mut self, handle: u16) -> Option<&mut Service> {
        self.services.iter_mut().find(|s| s.contains_handle(handle))
    }

    /// The characteristic whose value handle equals `handle`.
    pub fn characteristic_for_handle(&self, handle: u16) -> Option<&Characteristic> {
        self.service_for_handle(handle)?
            .characteristics
            .iter()
            .find(|c| c.value_handle == handle)
    }

    /// The descriptor at `handle`.
    pub fn descriptor_for_handle(&self, handle: u16) -> Option<&Descriptor> {
        self.service_for_handle(handle)?
            .characteristics
            .iter()
            .flat_map(|c| c.descriptors.iter())
            .find(|d| d.handle == handle)
    }

    /// Resolves an include edge to its target service.
    pub fn resolve_included(&self, edge: &IncludedService) -> Option<&Service> {
        self.service_for_handle(edge.incl_s_handle)
    }

    /// Number of export elements between `start` and `end`.
    pub fn db_size(&self, start: u16, end: u16) -> usize {
        let mut size = 0;
        for service in self.in_range(start, end) {
            size += 1;
            for charac in &service.characteristics {
                size += 1 + charac.descriptors.len();
            }
            size += service.included.len();
        }
        size
    }

    /// Flattens every service lying entirely within `[start, end]` into a
    /// neutral element array: service, then its characteristics each
    /// followed by their descriptors, then its include edges.
    pub fn get_db(&self, start: u16, end: u16) -> Vec<DbElement> {
        let mut db = Vec::with_capacity(self.db_size(start, end));

        for service in self.in_range(start, end) {
            db.push(DbElement {
                element_type: if service.is_primary {
                    DbElementType::PrimaryService
                } else {
                    DbElementType::SecondaryService
                },
                attribute_handle: 0,
                start_handle: service.s_handle,
                end_handle: service.e_handle,
                id: service.s_handle,
                uuid: service.uuid,
                properties: 0,
                permissions: 0,
            });

            for charac in &service.characteristics {
                db.push(DbElement {
                    element_type: DbElementType::Characteristic,
                    attribute_handle: charac.value_handle,
                    start_handle: 0,
                    end_handle: 0,
                    id: charac.value_handle,
                    uuid: charac.uuid,
                    properties: charac.properties.0,
                    permissions: 0,
                });

                for desc in &charac.descriptors {
                    db.push(DbElement {
                        element_type: DbElementType::Descriptor,
                        attribute_handle: desc.handle,
                        start_handle: 0,
                        end_handle: 0,
                        id: desc.handle,
                        uuid: desc.uuid,
                        properties: 0,
                        permissions: 0,
                    });
                }
            }

            for incl in &service.included {
                db.push(DbElement {
                    element_type: DbElementType::IncludedService,
                    attribute_handle: incl.handle,
                    start_handle: self
                        .resolve_included(incl)
                        .map(|s| s.s_handle)
                        .unwrap_or(0),
                    end_handle: 0,
                    id: incl.handle,
                    uuid: incl.uuid,
                    properties: 0,
                    permissions: 0,
                });
            }
        }

        db
    }

    fn in_range(&self, start: u16, end: u16) -> impl Iterator<Item = &Service> {
        self.services
            .iter()
            .filter(move |s| s.s_handle >= start && s.e_handle <= end)
    }

    /// Debug dump of the whole cache.
    pub fn log_cache(&self) {
        debug!("<== server cache, {} services ==>", self.services.len());
        for service in &self.services {
            debug!(
                "service: handle [0x{:04x} ~ 0x{:04x}] {:?} primary={}",
                service.s_handle, service.e_handle, service.uuid, service.is_primary
            );
            for charac in &service.characteristics {
                debug!(
                    "  characteristic: handle 0x{:04x} {:?} prop 0x{:02x}",
                    charac.value_handle, charac.uuid, charac.properties.0
                );
                for desc in &charac.descriptors {
                    debug!("    descriptor: handle 0x{:04x} {:?}", desc.handle, desc.uuid);
                }
            }
            for incl in &service.included {
                debug!(
                    "  included: handle 0x{:04x} {:?} -> 0x{:04x}",
                    incl.handle, incl.uuid, incl.incl_s_handle
                );
            }
        }
    }
}

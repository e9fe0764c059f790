//! Unit tests for the discovery state machine
//!
//! A `FakeServer` describes a remote database; the mock ATT driver queues
//! every discover request the engine issues, and `pump` answers each one
//! from the fake database until the engine stops asking.

use crate::att::{AttDriver, DiscoverKind, DiscoveryPayload, Status};
use crate::error::Error;
use crate::gap::{BdAddr, BondingStore, Transport};
use crate::gatt::discovery::{DiscoveryCtx, EventSink, GattEvent, ServerCb};
use crate::gatt::persist::{CacheStore, NV_ATTR_SIZE};
use crate::gatt::types::{CharProperties, DbElementType};
use crate::sdp::{ProtocolElem, SdpDriver, SdpRecord, SdpStatus, UUID_PROTOCOL_ATT};
use crate::uuid::Uuid;
use std::collections::VecDeque;
use std::fs;

const CONN_ID: u16 = 1;

fn u(value: u16) -> Uuid {
    Uuid::from_u16(value)
}

fn test_bda() -> BdAddr {
    BdAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55])
}

/// Mock ATT driver: accepts every request and queues it for the test to
/// answer.
#[derive(Default)]
struct MockAtt {
    pending: VecDeque<(DiscoverKind, u16, u16)>,
    history: Vec<(DiscoverKind, u16, u16)>,
}

impl AttDriver for MockAtt {
    fn discover(
        &mut self,
        _conn_id: u16,
        kind: DiscoverKind,
        s_handle: u16,
        e_handle: u16,
    ) -> Status {
        self.history.push((kind, s_handle, e_handle));
        self.pending.push_back((kind, s_handle, e_handle));
        Status::Success
    }
}

#[derive(Default)]
struct MockSdp {
    requested: bool,
}

impl SdpDriver for MockSdp {
    fn service_search_attr(&mut self, _bda: BdAddr) -> bool {
        self.requested = true;
        true
    }
}

struct Bonded(bool);

impl BondingStore for Bonded {
    fn is_bonded(&self, _bda: &BdAddr) -> bool {
        self.0
    }
}

#[derive(Default)]
struct EventLog {
    events: Vec<GattEvent>,
}

impl EventSink for EventLog {
    fn dispatch(&mut self, event: GattEvent) {
        self.events.push(event);
    }
}

#[derive(Clone)]
struct CharDef {
    decl: u16,
    value: u16,
    prop: u8,
    uuid: u16,
    descs: Vec<(u16, u16)>,
}

#[derive(Clone)]
struct IncludeDef {
    handle: u16,
    s_handle: u16,
    e_handle: u16,
    uuid: u16,
}

#[derive(Clone)]
struct SvcDef {
    s_handle: u16,
    e_handle: u16,
    uuid: u16,
    chars: Vec<CharDef>,
    includes: Vec<IncludeDef>,
}

/// The remote database the mock ATT driver answers from.
struct FakeServer {
    services: Vec<SvcDef>,
}

impl FakeServer {
    fn results_for(&self, kind: DiscoverKind, s_handle: u16, e_handle: u16) -> Vec<DiscoveryPayload> {
        let range = s_handle..=e_handle;
        match kind {
            DiscoverKind::ServiceAll | DiscoverKind::ServiceByUuid => self
                .services
                .iter()
                .map(|svc| DiscoveryPayload::Service {
                    s_handle: svc.s_handle,
                    e_handle: svc.e_handle,
                    uuid: u(svc.uuid),
                })
                .collect(),
            DiscoverKind::IncludedService => self
                .services
                .iter()
                .flat_map(|svc| svc.includes.iter())
                .filter(|incl| range.contains(&incl.handle))
                .map(|incl| DiscoveryPayload::IncludedService {
                    handle: incl.handle,
                    s_handle: incl.s_handle,
                    e_handle: incl.e_handle,
                    uuid: u(incl.uuid),
                })
                .collect(),
            DiscoverKind::Characteristic => self
                .services
                .iter()
                .flat_map(|svc| svc.chars.iter())
                .filter(|ch| range.contains(&ch.decl))
                .map(|ch| DiscoveryPayload::Characteristic {
                    decl_handle: ch.decl,
                    value_handle: ch.value,
                    properties: CharProperties(ch.prop),
                    uuid: u(ch.uuid),
                })
                .collect(),
            DiscoverKind::Descriptor => self
                .services
                .iter()
                .flat_map(|svc| svc.chars.iter())
                .flat_map(|ch| ch.descs.iter())
                .filter(|(handle, _)| range.contains(handle))
                .map(|&(handle, uuid)| DiscoveryPayload::Descriptor {
                    handle,
                    uuid: u(uuid),
                })
                .collect(),
        }
    }
}

struct Harness {
    att: MockAtt,
    sdp: MockSdp,
    bonded: bool,
    store: CacheStore,
    events: EventLog,
}

impl Harness {
    fn new(store: CacheStore) -> Self {
        Self {
            att: MockAtt::default(),
            sdp: MockSdp::default(),
            bonded: false,
            store,
            events: EventLog::default(),
        }
    }

    fn in_dir(dir: &std::path::Path) -> Self {
        Self::new(CacheStore::new(format!("{}/gatt_cache_", dir.display())))
    }
}

/// Answers every outstanding ATT request from the fake database until the
/// engine stops issuing new ones.
fn pump(cb: &mut ServerCb, h: &mut Harness, server: &FakeServer) {
    while let Some((kind, s_handle, e_handle)) = h.att.pending.pop_front() {
        for payload in server.results_for(kind, s_handle, e_handle) {
            cb.discovery_result(kind, payload);
        }
        let bonded = Bonded(h.bonded);
        let mut ctx = DiscoveryCtx {
            att: &mut h.att,
            sdp: &mut h.sdp,
            bonding: &bonded,
            store: &h.store,
            events: &mut h.events,
        };
        cb.discovery_complete(CONN_ID, kind, Status::Success, &mut ctx);
    }
}

fn start(cb: &mut ServerCb, h: &mut Harness) -> Status {
    let bonded = Bonded(h.bonded);
    let mut ctx = DiscoveryCtx {
        att: &mut h.att,
        sdp: &mut h.sdp,
        bonding: &bonded,
        store: &h.store,
        events: &mut h.events,
    };
    cb.start_discovery(CONN_ID, &mut ctx)
}

fn run_le_discovery(cb: &mut ServerCb, h: &mut Harness, server: &FakeServer) {
    assert_eq!(start(cb, h), Status::Success);
    pump(cb, h, server);
}

fn battery_server() -> FakeServer {
    FakeServer {
        services: vec![SvcDef {
            s_handle: 1,
            e_handle: 10,
            uuid: 0x180F,
            chars: vec![
                CharDef {
                    decl: 2,
                    value: 3,
                    prop: 0x10,
                    uuid: 0x2A19,
                    descs: vec![(4, 0x2902)],
                },
                CharDef {
                    decl: 5,
                    value: 6,
                    prop: 0x02,
                    uuid: 0x2A1A,
                    descs: vec![],
                },
            ],
            includes: vec![],
        }],
    }
}

#[test]
fn minimal_service_one_characteristic() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::in_dir(dir.path());
    let mut cb = ServerCb::new(test_bda(), Transport::Le);
    let server = FakeServer {
        services: vec![SvcDef {
            s_handle: 1,
            e_handle: 3,
            uuid: 0x1800,
            chars: vec![CharDef {
                decl: 2,
                value: 3,
                prop: 0x02,
                uuid: 0x2A00,
                descs: vec![],
            }],
            includes: vec![],
        }],
    };

    run_le_discovery(&mut cb, &mut h, &server);

    assert_eq!(
        h.events.events,
        vec![GattEvent::DiscoveryComplete {
            conn_id: CONN_ID,
            status: Status::Success
        }]
    );

    let services = cb.services();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].uuid, u(0x1800));
    assert_eq!(services[0].characteristics.len(), 1);
    assert!(services[0].characteristics[0].descriptors.is_empty());

    let charac = cb.characteristic_for_handle(3).unwrap();
    assert_eq!(charac.uuid, u(0x2A00));
    assert_eq!(charac.decl_handle, 2);

    let db = cb.get_db(1, 10);
    assert_eq!(db.len(), 2);
    assert_eq!(db[0].element_type, DbElementType::PrimaryService);
    assert_eq!(db[1].element_type, DbElementType::Characteristic);

    // Unbonded peer: nothing hits the disk.
    assert!(!h.store.cache_file_name(&test_bda()).exists());
}

#[test]
fn descriptor_ranges_follow_declaration_handles() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::in_dir(dir.path());
    let mut cb = ServerCb::new(test_bda(), Transport::Le);
    let server = battery_server();

    run_le_discovery(&mut cb, &mut h, &server);

    // The first characteristic's descriptor range is closed off just below
    // the second declaration; the last one runs to the service end.
    assert!(h
        .att
        .history
        .contains(&(DiscoverKind::Descriptor, 4, 4)));
    assert!(h
        .att
        .history
        .contains(&(DiscoverKind::Descriptor, 7, 10)));

    let services = cb.services();
    assert_eq!(services.len(), 1);
    let chars = &services[0].characteristics;
    assert_eq!(chars.len(), 2);
    assert_eq!(chars[0].descriptors.len(), 1);
    assert_eq!(chars[0].descriptors[0].handle, 4);
    assert_eq!(chars[0].descriptors[0].uuid, u(0x2902));
    assert!(chars[1].descriptors.is_empty());

    assert_eq!(cb.descriptor_for_handle(4).unwrap().uuid, u(0x2902));
}

#[test]
fn included_service_already_listed_as_primary() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::in_dir(dir.path());
    let mut cb = ServerCb::new(test_bda(), Transport::Le);
    let server = FakeServer {
        services: vec![
            SvcDef {
                s_handle: 1,
                e_handle: 10,
                uuid: 0x1801,
                chars: vec![],
                includes: vec![IncludeDef {
                    handle: 2,
                    s_handle: 20,
                    e_handle: 30,
                    uuid: 0x180A,
                }],
            },
            SvcDef {
                s_handle: 20,
                e_handle: 30,
                uuid: 0x180A,
                chars: vec![],
                includes: vec![],
            },
        ],
    };

    run_le_discovery(&mut cb, &mut h, &server);

    // The target was already found as a primary service: no duplicate.
    let services = cb.services();
    assert_eq!(services.len(), 2);
    assert_eq!(services[0].included.len(), 1);
    let edge = &services[0].included[0];
    assert_eq!(edge.handle, 2);
    assert_eq!(edge.incl_s_handle, 20);
    assert_eq!(edge.uuid, u(0x180A));
    assert!(services[1].is_primary);
}

#[test]
fn included_service_appends_secondary() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::in_dir(dir.path());
    let mut cb = ServerCb::new(test_bda(), Transport::Le);
    let server = FakeServer {
        services: vec![
            SvcDef {
                s_handle: 1,
                e_handle: 10,
                uuid: 0x1801,
                chars: vec![],
                includes: vec![IncludeDef {
                    handle: 2,
                    s_handle: 40,
                    e_handle: 50,
                    uuid: 0x181A,
                }],
            },
            SvcDef {
                s_handle: 20,
                e_handle: 30,
                uuid: 0x180A,
                chars: vec![],
                includes: vec![],
            },
        ],
    };

    run_le_discovery(&mut cb, &mut h, &server);

    // The never-advertised target is explored as a secondary service.
    let services = cb.services();
    assert_eq!(services.len(), 3);
    assert_eq!(services[2].s_handle, 40);
    assert_eq!(services[2].e_handle, 50);
    assert!(!services[2].is_primary);
    assert_eq!(services[0].included[0].incl_s_handle, 40);
}

#[test]
fn invalid_included_range_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::in_dir(dir.path());
    let mut cb = ServerCb::new(test_bda(), Transport::Le);
    let server = FakeServer {
        services: vec![SvcDef {
            s_handle: 1,
            e_handle: 10,
            uuid: 0x1801,
            chars: vec![],
            includes: vec![IncludeDef {
                handle: 2,
                s_handle: 0,
                e_handle: 30,
                uuid: 0x180A,
            }],
        }],
    };

    run_le_discovery(&mut cb, &mut h, &server);

    let services = cb.services();
    assert_eq!(services.len(), 1);
    assert!(services[0].included.is_empty());
}

#[test]
fn bonded_peer_cache_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::in_dir(dir.path());
    h.bonded = true;
    let mut cb = ServerCb::new(test_bda(), Transport::Le);

    run_le_discovery(&mut cb, &mut h, &battery_server());

    // One service, two characteristics, one descriptor.
    let fname = h.store.cache_file_name(&test_bda());
    let bytes = fs::read(&fname).unwrap();
    assert_eq!(bytes.len(), 4 + 4 * NV_ATTR_SIZE);
    assert_eq!(&bytes[0..4], &[0x02, 0x00, 0x04, 0x00]);

    let mut reloaded = ServerCb::new(test_bda(), Transport::Le);
    reloaded.load_cache(&h.store).unwrap();
    assert_eq!(reloaded.services(), cb.services());

    // Declaration handles survive the round trip.
    assert_eq!(reloaded.characteristic_for_handle(3).unwrap().decl_handle, 2);
}

#[test]
fn bad_cache_files_fail_load_and_leave_graph_alone() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::in_dir(dir.path());
    h.bonded = true;
    let mut cb = ServerCb::new(test_bda(), Transport::Le);

    run_le_discovery(&mut cb, &mut h, &battery_server());
    let before = cb.services().to_vec();
    let fname = h.store.cache_file_name(&test_bda());

    // Wrong version word.
    fs::write(&fname, [0x01, 0x00, 0x00, 0x00]).unwrap();
    assert!(matches!(
        cb.load_cache(&h.store),
        Err(Error::CacheVersionMismatch(1))
    ));
    assert_eq!(cb.services(), before.as_slice());

    // Declared count longer than the file.
    fs::write(&fname, [0x02, 0x00, 0x10, 0x00, 0xAA]).unwrap();
    assert!(matches!(cb.load_cache(&h.store), Err(Error::CacheCorrupt(_))));
    assert_eq!(cb.services(), before.as_slice());
}

#[test]
fn zero_services_complete_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::in_dir(dir.path());
    h.bonded = true;
    let mut cb = ServerCb::new(test_bda(), Transport::Le);
    let server = FakeServer { services: vec![] };

    run_le_discovery(&mut cb, &mut h, &server);

    assert_eq!(
        h.events.events,
        vec![GattEvent::DiscoveryComplete {
            conn_id: CONN_ID,
            status: Status::Success
        }]
    );
    assert!(cb.services().is_empty());
    assert!(!h.store.cache_file_name(&test_bda()).exists());
}

#[test]
fn failed_subprocedure_finalizes_without_publishing() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::in_dir(dir.path());
    h.bonded = true;
    let mut cb = ServerCb::new(test_bda(), Transport::Le);
    let server = battery_server();

    assert_eq!(start(&mut cb, &mut h), Status::Success);

    // Answer the primary-service pass, then fail include discovery.
    let (kind, s_handle, e_handle) = h.att.pending.pop_front().unwrap();
    assert_eq!(kind, DiscoverKind::ServiceAll);
    for payload in server.results_for(kind, s_handle, e_handle) {
        cb.discovery_result(kind, payload);
    }
    {
        let bonded = Bonded(h.bonded);
        let mut ctx = DiscoveryCtx {
            att: &mut h.att,
            sdp: &mut h.sdp,
            bonding: &bonded,
            store: &h.store,
            events: &mut h.events,
        };
        cb.discovery_complete(CONN_ID, kind, Status::Success, &mut ctx);
    }

    let (kind, _, _) = h.att.pending.pop_front().unwrap();
    assert_eq!(kind, DiscoverKind::IncludedService);
    let bonded = Bonded(h.bonded);
    let mut ctx = DiscoveryCtx {
        att: &mut h.att,
        sdp: &mut h.sdp,
        bonding: &bonded,
        store: &h.store,
        events: &mut h.events,
    };
    cb.discovery_complete(CONN_ID, kind, Status::Error, &mut ctx);
    drop(ctx);

    assert_eq!(
        h.events.events,
        vec![GattEvent::DiscoveryComplete {
            conn_id: CONN_ID,
            status: Status::Error
        }]
    );
    assert!(!cb.discovery_in_progress());
    assert!(cb.services().is_empty());
    assert!(!h.store.cache_file_name(&test_bda()).exists());
}

#[test]
fn lookups_are_gated_while_discovery_runs() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::in_dir(dir.path());
    let mut cb = ServerCb::new(test_bda(), Transport::Le);

    assert_eq!(start(&mut cb, &mut h), Status::Success);
    assert!(cb.discovery_in_progress());
    assert!(cb.services().is_empty());
    assert!(cb.service_for_handle(1).is_none());
    assert!(cb.get_db(1, 0xFFFF).is_empty());

    // A second start while one is in flight is refused.
    assert_eq!(start(&mut cb, &mut h), Status::Busy);

    pump(&mut cb, &mut h, &battery_server());
    assert!(!cb.discovery_in_progress());
    assert!(!cb.services().is_empty());
}

#[test]
fn search_service_emits_one_event_per_match() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::in_dir(dir.path());
    let mut cb = ServerCb::new(test_bda(), Transport::Le);
    let server = FakeServer {
        services: vec![
            SvcDef {
                s_handle: 1,
                e_handle: 10,
                uuid: 0x1801,
                chars: vec![],
                includes: vec![],
            },
            SvcDef {
                s_handle: 20,
                e_handle: 30,
                uuid: 0x180A,
                chars: vec![],
                includes: vec![],
            },
        ],
    };

    run_le_discovery(&mut cb, &mut h, &server);

    let mut log = EventLog::default();
    cb.search_service(CONN_ID, None, &mut log);
    assert_eq!(log.events.len(), 2);

    let mut log = EventLog::default();
    cb.search_service(CONN_ID, Some(u(0x180A)), &mut log);
    assert_eq!(
        log.events,
        vec![GattEvent::SearchResult {
            conn_id: CONN_ID,
            service_handle: 20,
            uuid: u(0x180A),
        }]
    );
}

#[test]
fn sdp_fallback_feeds_primary_services() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::in_dir(dir.path());
    let mut cb = ServerCb::new(test_bda(), Transport::BrEdr);
    let server = FakeServer {
        services: vec![SvcDef {
            s_handle: 1,
            e_handle: 10,
            uuid: 0x1800,
            chars: vec![CharDef {
                decl: 2,
                value: 3,
                prop: 0x02,
                uuid: 0x2A00,
                descs: vec![],
            }],
            includes: vec![],
        }],
    };

    assert_eq!(start(&mut cb, &mut h), Status::Success);
    assert!(h.sdp.requested);
    assert!(h.att.pending.is_empty());

    let att_elem = ProtocolElem {
        protocol_uuid: u(UUID_PROTOCOL_ATT),
        params: vec![1, 10],
    };
    let records = vec![
        // Usable record.
        SdpRecord {
            service_class_uuids: vec![u(0x1800)],
            protocol_list: vec![att_elem.clone()],
        },
        // No ATT protocol element.
        SdpRecord {
            service_class_uuids: vec![u(0x110B)],
            protocol_list: vec![ProtocolElem {
                protocol_uuid: u(0x0100),
                params: vec![0x0019],
            }],
        },
        // No service class UUID.
        SdpRecord {
            service_class_uuids: vec![],
            protocol_list: vec![att_elem.clone()],
        },
        // Invalid handle pair.
        SdpRecord {
            service_class_uuids: vec![u(0x1800)],
            protocol_list: vec![ProtocolElem {
                protocol_uuid: u(UUID_PROTOCOL_ATT),
                params: vec![0, 10],
            }],
        },
    ];

    let bonded = Bonded(h.bonded);
    let mut ctx = DiscoveryCtx {
        att: &mut h.att,
        sdp: &mut h.sdp,
        bonding: &bonded,
        store: &h.store,
        events: &mut h.events,
    };
    cb.sdp_result(CONN_ID, SdpStatus::Success, &records, &mut ctx);
    drop(ctx);
    pump(&mut cb, &mut h, &server);

    let services = cb.services();
    assert_eq!(services.len(), 1);
    assert!(services[0].is_primary);
    assert_eq!(services[0].uuid, u(0x1800));
    assert_eq!(services[0].characteristics.len(), 1);
}

#[test]
fn sdp_error_status_completes_with_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::in_dir(dir.path());
    let mut cb = ServerCb::new(test_bda(), Transport::BrEdr);

    assert_eq!(start(&mut cb, &mut h), Status::Success);

    let bonded = Bonded(h.bonded);
    let mut ctx = DiscoveryCtx {
        att: &mut h.att,
        sdp: &mut h.sdp,
        bonding: &bonded,
        store: &h.store,
        events: &mut h.events,
    };
    cb.sdp_result(CONN_ID, SdpStatus::Error, &[], &mut ctx);

    assert_eq!(
        h.events.events,
        vec![GattEvent::DiscoveryComplete {
            conn_id: CONN_ID,
            status: Status::Success
        }]
    );
    assert!(cb.services().is_empty());
}

#[test]
fn reset_drops_in_flight_discovery() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::in_dir(dir.path());
    let mut cb = ServerCb::new(test_bda(), Transport::Le);

    assert_eq!(start(&mut cb, &mut h), Status::Success);
    assert!(cb.discovery_in_progress());

    cb.reset();
    assert!(!cb.discovery_in_progress());
    assert!(cb.services().is_empty());

    // A fresh pass runs normally afterwards.
    h.att.pending.clear();
    run_le_discovery(&mut cb, &mut h, &battery_server());
    assert_eq!(cb.services().len(), 1);
}

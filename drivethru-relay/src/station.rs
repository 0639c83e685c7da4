//! The station ring
//!
//! Stations live in a fixed arena; `next` is an index, the last station
//! wraps to the first. Each station's queue and service slot sit behind the
//! station's own lock and no operation ever holds two of them at once.

use crate::audit::AuditSink;
use drivethru_core::{
    AuditRecord, AuditStatus, CameraId, Error, PresenceEvent, PresenceHandler, RelayConfig,
    Result, StationProtocolError, VehicleId,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct StationState {
    /// Head is served first
    queue: VecDeque<VehicleId>,
    in_service: Option<VehicleId>,
}

#[derive(Debug)]
struct Station {
    name: CameraId,
    next: usize,
    state: Mutex<StationState>,
}

/// Ordered ring of stations with one entry point
pub struct StationRing {
    stations: Vec<Station>,
    by_name: HashMap<CameraId, usize>,
    entry: usize,
    next_vehicle: AtomicU64,
    sink: Arc<dyn AuditSink>,
}

impl StationRing {
    /// Build the ring in the given order and seed the entry station with
    /// vehicles `1..=seed_vehicles`, vehicle 1 first in line.
    pub fn new(
        names: &[String],
        entry: Option<&str>,
        seed_vehicles: u64,
        sink: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        if names.is_empty() {
            return Err(Error::Configuration(
                "station ring needs at least one station".to_string(),
            ));
        }

        let mut by_name = HashMap::with_capacity(names.len());
        let mut stations = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(Error::Configuration("station names must not be empty".to_string()));
            }
            let id = CameraId::new(name.clone());
            if by_name.insert(id.clone(), i).is_some() {
                return Err(Error::Configuration(format!("duplicate station name '{}'", name)));
            }
            stations.push(Station {
                name: id,
                next: (i + 1) % names.len(),
                state: Mutex::new(StationState::default()),
            });
        }

        let entry = match entry {
            Some(name) => *by_name.get(&CameraId::from(name)).ok_or_else(|| {
                Error::Configuration(format!("entry station '{}' is not in the ring", name))
            })?,
            None => 0,
        };

        {
            let mut state = stations[entry].state.lock();
            state.queue.extend((1..=seed_vehicles).map(VehicleId));
        }

        info!(
            "Station ring {} built, entry {} seeded with {} vehicles",
            names.join(" -> "),
            stations[entry].name,
            seed_vehicles
        );

        Ok(Self {
            stations,
            by_name,
            entry,
            next_vehicle: AtomicU64::new(seed_vehicles + 1),
            sink,
        })
    }

    pub fn from_config(config: &RelayConfig, sink: Arc<dyn AuditSink>) -> Result<Self> {
        config.validate().map_err(Error::Configuration)?;
        Self::new(
            &config.stations,
            config.entry.as_deref(),
            config.seed_vehicles,
            sink,
        )
    }

    fn index(&self, station: &CameraId) -> Result<usize> {
        self.by_name
            .get(station)
            .copied()
            .ok_or_else(|| Error::UnknownStation(station.to_string()))
    }

    pub fn entry(&self) -> &CameraId {
        &self.stations[self.entry].name
    }

    pub fn contains(&self, station: &CameraId) -> bool {
        self.by_name.contains_key(station)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    fn audit(&self, station: &CameraId, vehicle: Option<VehicleId>, status: AuditStatus) {
        self.sink
            .emit(&AuditRecord::new(station.clone(), vehicle, status));
    }

    /// Move the head of the station's queue into service
    pub fn vehicle_entered(&self, station: &CameraId) -> Result<VehicleId> {
        let idx = self.index(station)?;
        let st = &self.stations[idx];

        let outcome = {
            let mut state = st.state.lock();
            match (state.in_service, state.queue.front().copied()) {
                (None, Some(vehicle)) => {
                    state.queue.pop_front();
                    state.in_service = Some(vehicle);
                    Ok(vehicle)
                }
                (in_service, _) => {
                    warn!(
                        station = %st.name,
                        in_service = ?in_service.map(|v| v.0),
                        queue = ?state.queue.iter().map(|v| v.0).collect::<Vec<_>>(),
                        "vehicle_entered rejected"
                    );
                    Err(StationProtocolError::EnterRejected {
                        station: st.name.clone(),
                        in_service,
                        queued: state.queue.len(),
                    })
                }
            }
        };

        match outcome {
            Ok(vehicle) => {
                info!("Vehicle {} entered {}", vehicle, st.name);
                self.audit(&st.name, Some(vehicle), AuditStatus::Entered);
                Ok(vehicle)
            }
            Err(e) => {
                // The record names the vehicle still occupying the station
                let occupying = match &e {
                    StationProtocolError::EnterRejected { in_service, .. } => *in_service,
                    _ => None,
                };
                self.audit(&st.name, occupying, AuditStatus::NoOp);
                Err(e.into())
            }
        }
    }

    /// Release the vehicle in service to the tail of the next station's queue
    pub fn vehicle_left(&self, station: &CameraId) -> Result<VehicleId> {
        let idx = self.index(station)?;
        let st = &self.stations[idx];

        let taken = {
            let mut state = st.state.lock();
            let taken = state.in_service.take();
            if taken.is_none() {
                warn!(
                    station = %st.name,
                    queue = ?state.queue.iter().map(|v| v.0).collect::<Vec<_>>(),
                    "vehicle_left rejected: nothing in service"
                );
            }
            taken
        };

        let Some(vehicle) = taken else {
            self.audit(&st.name, None, AuditStatus::NoOp);
            return Err(StationProtocolError::NothingInService {
                station: st.name.clone(),
            }
            .into());
        };

        let next = &self.stations[st.next];
        next.state.lock().queue.push_back(vehicle);

        info!("Vehicle {} left {} for {}", vehicle, st.name, next.name);
        self.audit(&st.name, Some(vehicle), AuditStatus::Left);
        Ok(vehicle)
    }

    /// Add a new vehicle to the back of the entry station's queue
    pub fn inject(&self) -> VehicleId {
        let vehicle = VehicleId(self.next_vehicle.fetch_add(1, Ordering::Relaxed));
        let entry = &self.stations[self.entry];
        entry.state.lock().queue.push_back(vehicle);
        debug!("Vehicle {} injected at {}", vehicle, entry.name);
        vehicle
    }

    /// Per-station view in ring order starting at the entry. Stations are
    /// read one at a time, so a vehicle in transit may be missing.
    pub fn snapshot(&self) -> RingSnapshot {
        let n = self.stations.len();
        let stations = (0..n)
            .map(|offset| {
                let st = &self.stations[(self.entry + offset) % n];
                let state = st.state.lock();
                StationSnapshot {
                    name: st.name.clone(),
                    queue: state.queue.iter().copied().collect(),
                    in_service: state.in_service,
                    next: self.stations[st.next].name.clone(),
                    is_entry: offset == 0,
                }
            })
            .collect();
        RingSnapshot { stations }
    }

    /// One station's view
    pub fn station(&self, station: &CameraId) -> Result<StationSnapshot> {
        let idx = self.index(station)?;
        let st = &self.stations[idx];
        let state = st.state.lock();
        Ok(StationSnapshot {
            name: st.name.clone(),
            queue: state.queue.iter().copied().collect(),
            in_service: state.in_service,
            next: self.stations[st.next].name.clone(),
            is_entry: idx == self.entry,
        })
    }
}

impl PresenceHandler for StationRing {
    fn on_presence(&self, camera: &CameraId, event: PresenceEvent) {
        let result = match event {
            PresenceEvent::Entered => self.vehicle_entered(camera),
            PresenceEvent::Left => self.vehicle_left(camera),
        };
        match result {
            Ok(_) => debug!("{}", self.snapshot()),
            // Already logged and audited
            Err(Error::StationProtocol(_)) => {}
            Err(e) => warn!("Presence event {:?} from camera {} ignored: {}", event, camera, e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationSnapshot {
    pub name: CameraId,
    /// Head first
    pub queue: Vec<VehicleId>,
    pub in_service: Option<VehicleId>,
    pub next: CameraId,
    pub is_entry: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RingSnapshot {
    pub stations: Vec<StationSnapshot>,
}

impl RingSnapshot {
    /// Every vehicle currently queued or in service
    pub fn vehicles(&self) -> Vec<VehicleId> {
        self.stations
            .iter()
            .flat_map(|s| s.queue.iter().copied().chain(s.in_service))
            .collect()
    }
}

/// Operator view: `S | --- [3, 2] --- MENU (1) ---  [] --- PAY (None) --- | E`.
/// Queues are printed newest first so vehicles flow rightwards into the station.
impl fmt::Display for RingSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S | ---")?;
        for station in &self.stations {
            let queue: Vec<String> = station.queue.iter().rev().map(|v| v.to_string()).collect();
            let current = station
                .in_service
                .map(|v| v.to_string())
                .unwrap_or_else(|| "None".to_string());
            write!(f, " [{}] --- {} ({}) --- ", queue.join(", "), station.name, current)?;
        }
        write!(f, "| E")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;

    fn ring(seed: u64) -> (StationRing, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let names: Vec<String> = ["MENU", "PAY", "PICKUP"].iter().map(|s| s.to_string()).collect();
        (StationRing::new(&names, None, seed, sink.clone()).unwrap(), sink)
    }

    fn id(name: &str) -> CameraId {
        CameraId::from(name)
    }

    #[test]
    fn test_seeded_fifo() {
        let (ring, _) = ring(3);
        assert_eq!(ring.vehicle_entered(&id("MENU")).unwrap(), VehicleId(1));
        ring.vehicle_left(&id("MENU")).unwrap();
        assert_eq!(ring.vehicle_entered(&id("MENU")).unwrap(), VehicleId(2));
    }

    #[test]
    fn test_enter_then_leave_moves_to_next_queue() {
        let (ring, sink) = ring(2);
        ring.vehicle_entered(&id("MENU")).unwrap();
        ring.vehicle_left(&id("MENU")).unwrap();

        let pay = ring.station(&id("PAY")).unwrap();
        assert_eq!(pay.queue, vec![VehicleId(1)]);
        assert_eq!(pay.in_service, None);

        let statuses: Vec<AuditStatus> = sink.records().iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![AuditStatus::Entered, AuditStatus::Left]);
        assert_eq!(sink.records()[1].vehicle_id, Some(VehicleId(1)));
        assert_eq!(sink.records()[1].camera_id, id("MENU"));
    }

    #[test]
    fn test_enter_rejected_when_occupied() {
        let (ring, sink) = ring(3);
        ring.vehicle_entered(&id("MENU")).unwrap();
        let err = ring.vehicle_entered(&id("MENU")).unwrap_err();

        match err {
            Error::StationProtocol(StationProtocolError::EnterRejected {
                station,
                in_service,
                queued,
            }) => {
                assert_eq!(station, id("MENU"));
                assert_eq!(in_service, Some(VehicleId(1)));
                assert_eq!(queued, 2);
            }
            other => panic!("unexpected error {:?}", other),
        }

        // No state change
        let menu = ring.station(&id("MENU")).unwrap();
        assert_eq!(menu.in_service, Some(VehicleId(1)));
        assert_eq!(menu.queue, vec![VehicleId(2), VehicleId(3)]);
        let record = sink.records().last().cloned().unwrap();
        assert_eq!(record.status, AuditStatus::NoOp);
        assert_eq!(record.vehicle_id, Some(VehicleId(1)));
    }

    #[test]
    fn test_enter_rejected_on_empty_queue() {
        let (ring, sink) = ring(3);
        let err = ring.vehicle_entered(&id("PAY")).unwrap_err();
        assert!(matches!(
            err,
            Error::StationProtocol(StationProtocolError::EnterRejected { queued: 0, in_service: None, .. })
        ));
        assert_eq!(sink.records()[0].status, AuditStatus::NoOp);
        assert_eq!(sink.records()[0].vehicle_id, None);
    }

    #[test]
    fn test_left_rejected_when_empty() {
        let (ring, sink) = ring(3);
        let err = ring.vehicle_left(&id("MENU")).unwrap_err();
        assert!(matches!(
            err,
            Error::StationProtocol(StationProtocolError::NothingInService { .. })
        ));
        assert_eq!(sink.records()[0].status, AuditStatus::NoOp);
        assert_eq!(ring.station(&id("MENU")).unwrap().queue.len(), 3);
    }

    #[test]
    fn test_last_station_wraps_to_first() {
        let (ring, _) = ring(1);
        for station in ["MENU", "PAY", "PICKUP"] {
            ring.vehicle_entered(&id(station)).unwrap();
            ring.vehicle_left(&id(station)).unwrap();
        }
        assert_eq!(ring.station(&id("MENU")).unwrap().queue, vec![VehicleId(1)]);
    }

    #[test]
    fn test_single_station_ring() {
        let sink = Arc::new(MemorySink::new());
        let ring = StationRing::new(&["ONLY".to_string()], None, 2, sink).unwrap();
        ring.vehicle_entered(&id("ONLY")).unwrap();
        ring.vehicle_left(&id("ONLY")).unwrap();
        let only = ring.station(&id("ONLY")).unwrap();
        assert_eq!(only.queue, vec![VehicleId(2), VehicleId(1)]);
        assert_eq!(only.next, id("ONLY"));
    }

    #[test]
    fn test_construction_errors() {
        let sink = Arc::new(MemorySink::new());
        assert!(matches!(
            StationRing::new(&[], None, 0, sink.clone()),
            Err(Error::Configuration(_))
        ));
        let dup = vec!["A".to_string(), "A".to_string()];
        assert!(StationRing::new(&dup, None, 0, sink.clone()).is_err());
        let names = vec!["A".to_string(), "B".to_string()];
        assert!(StationRing::new(&names, Some("C"), 0, sink).is_err());
    }

    #[test]
    fn test_unknown_station() {
        let (ring, sink) = ring(1);
        assert!(matches!(
            ring.vehicle_entered(&id("DRIVE")),
            Err(Error::UnknownStation(_))
        ));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_inject_allocates_fresh_ids() {
        let (ring, _) = ring(2);
        assert_eq!(ring.inject(), VehicleId(3));
        assert_eq!(ring.inject(), VehicleId(4));
        assert_eq!(
            ring.station(&id("MENU")).unwrap().queue,
            vec![VehicleId(1), VehicleId(2), VehicleId(3), VehicleId(4)]
        );
    }

    #[test]
    fn test_custom_entry() {
        let sink = Arc::new(MemorySink::new());
        let names: Vec<String> = ["MENU", "PAY"].iter().map(|s| s.to_string()).collect();
        let ring = StationRing::new(&names, Some("PAY"), 1, sink).unwrap();
        assert_eq!(ring.entry(), &id("PAY"));
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.stations[0].name, id("PAY"));
        assert!(snapshot.stations[0].is_entry);
        assert_eq!(snapshot.stations[0].queue, vec![VehicleId(1)]);
    }

    #[test]
    fn test_snapshot_display() {
        let (ring, _) = ring(3);
        ring.vehicle_entered(&id("MENU")).unwrap();
        assert_eq!(
            ring.snapshot().to_string(),
            "S | --- [3, 2] --- MENU (1) ---  [] --- PAY (None) ---  [] --- PICKUP (None) --- | E"
        );
    }

    #[test]
    fn test_presence_handler_absorbs_protocol_errors() {
        let (ring, sink) = ring(1);
        ring.on_presence(&id("PAY"), PresenceEvent::Left);
        ring.on_presence(&id("MENU"), PresenceEvent::Entered);
        ring.on_presence(&id("NOWHERE"), PresenceEvent::Entered);

        let statuses: Vec<AuditStatus> = sink.records().iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![AuditStatus::NoOp, AuditStatus::Entered]);
        assert_eq!(ring.station(&id("MENU")).unwrap().in_service, Some(VehicleId(1)));
    }

    #[test]
    fn test_concurrent_enters_only_one_succeeds() {
        let (ring, _) = ring(1);
        let ring = Arc::new(ring);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ring = ring.clone();
                std::thread::spawn(move || ring.vehicle_entered(&CameraId::from("MENU")).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }
}

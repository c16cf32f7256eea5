use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, Ordering};

pub type ClientId = u32;
pub type VehicleId = u32;

/// Client status once a send to it has failed and the session is scheduled
/// for removal by the transport layer.
pub const STATUS_DISCONNECTING: i32 = -1;

#[derive(Debug, Default)]
struct Identity {
    name: String,
    roles: String,
}

#[derive(Debug, Default)]
struct Garage {
    cars: BTreeMap<VehicleId, String>,
    unicycle: Option<VehicleId>,
}

/// Per-session state for one connected game instance.
///
/// The registry holds the only strong reference; everyone else works with
/// `Weak` handles and upgrades for the duration of one packet. Inner state is
/// split behind locks so a record can be shared across the dispatcher and the
/// heartbeat without outer synchronization.
pub struct ClientRecord {
    id: ClientId,
    identity: Mutex<Identity>,
    status: AtomicI32,
    garage: Mutex<Garage>,
}

impl ClientRecord {
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            identity: Mutex::new(Identity::default()),
            status: AtomicI32::new(0),
            garage: Mutex::new(Garage::default()),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn name(&self) -> String {
        self.identity.lock().name.clone()
    }

    pub fn roles(&self) -> String {
        self.identity.lock().roles.clone()
    }

    /// Fills in the identity fields supplied by the handshake.
    pub fn set_identity(&self, name: &str, roles: &str) {
        let mut identity = self.identity.lock();
        identity.name = name.to_string();
        identity.roles = roles.to_string();
    }

    pub fn status(&self) -> i32 {
        self.status.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, status: i32) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn car_count(&self) -> usize {
        self.garage.lock().cars.len()
    }

    pub fn car_data(&self, vid: VehicleId) -> Option<String> {
        self.garage.lock().cars.get(&vid).cloned()
    }

    pub fn set_car_data(&self, vid: VehicleId, data: String) {
        self.garage.lock().cars.insert(vid, data);
    }

    pub fn add_car(&self, vid: VehicleId, data: String) {
        self.garage.lock().cars.insert(vid, data);
    }

    /// Removes the vehicle; a deleted unicycle loses its designation.
    pub fn delete_car(&self, vid: VehicleId) {
        let mut garage = self.garage.lock();
        garage.cars.remove(&vid);
        if garage.unicycle == Some(vid) {
            garage.unicycle = None;
        }
    }

    pub fn clear_cars(&self) {
        let mut garage = self.garage.lock();
        garage.cars.clear();
        garage.unicycle = None;
    }

    /// Smallest non-negative vehicle id not currently in use.
    pub fn open_car_id(&self) -> VehicleId {
        let garage = self.garage.lock();
        let mut candidate = 0;
        for &vid in garage.cars.keys() {
            if vid != candidate {
                break;
            }
            candidate += 1;
        }
        candidate
    }

    pub fn unicycle_id(&self) -> Option<VehicleId> {
        self.garage.lock().unicycle
    }

    pub fn set_unicycle_id(&self, vid: Option<VehicleId>) {
        self.garage.lock().unicycle = vid;
    }

    /// Snapshot of the vehicle map, for sync-on-join style consumers.
    pub fn cars(&self) -> BTreeMap<VehicleId, String> {
        self.garage.lock().cars.clone()
    }
}

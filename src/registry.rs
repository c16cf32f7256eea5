use crate::client::{ClientId, ClientRecord};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Owns every live [`ClientRecord`]. All hand-outs are weak; a record dies as
/// soon as it is removed here, and holders observe the expiry on upgrade.
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, Arc<ClientRecord>>>,
    next_id: AtomicU32,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(0),
        }
    }

    /// Creates a record with a fresh session-stable id and hands back a weak
    /// reference for the accepting transport.
    pub fn insert_new_client(&self) -> Weak<ClientRecord> {
        debug!("inserting new client ({})", self.client_count());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = Arc::new(ClientRecord::new(id));
        let weak = Arc::downgrade(&record);
        self.clients.write().insert(id, record);
        weak
    }

    /// Drops the strong reference for a client, clearing its vehicles first.
    /// A no-op when the handle has already expired.
    pub fn remove_client(&self, client: &Weak<ClientRecord>) {
        if let Some(client) = client.upgrade() {
            debug!("removing client {} ({})", client.name(), self.client_count());
            client.clear_cars();
            self.clients.write().remove(&client.id());
        }
    }

    pub fn client(&self, id: ClientId) -> Option<Weak<ClientRecord>> {
        self.clients.read().get(&id).map(Arc::downgrade)
    }

    /// Applies `f` to a snapshot of the membership. The read lock is held
    /// only while copying; the callback runs unlocked and returns `false` to
    /// stop early.
    pub fn for_each_client<F>(&self, mut f: F)
    where
        F: FnMut(Weak<ClientRecord>) -> bool,
    {
        let snapshot: Vec<Weak<ClientRecord>> = {
            let clients = self.clients.read();
            clients.values().map(Arc::downgrade).collect()
        };
        for client in snapshot {
            if !f(client) {
                break;
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

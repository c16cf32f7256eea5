use crate::client::ClientRecord;
use crate::shutdown::ShutdownCoordinator;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

/// Outbound side of the transport layer.
///
/// The dispatcher only ever asks the sink to deliver payloads; framing,
/// sockets and retransmission live entirely behind this boundary. `reliable`
/// is a transport hint passed through uninterpreted.
pub trait NetworkSink: Send + Sync {
    /// Fans a payload out to every connected client, minus `except`, with
    /// `to_self` deciding whether the sender is included.
    fn send_to_all(&self, except: Option<&ClientRecord>, payload: &[u8], reliable: bool, to_self: bool);

    /// Sends directly to one client. `false` means the send failed and the
    /// caller should flag the session for teardown.
    fn respond(&self, client: &ClientRecord, payload: &[u8], reliable: bool) -> bool;

    /// Replays world state to a freshly handshaken client.
    fn sync_client(&self, client: &ClientRecord) -> bool;

    /// Pushes updated player info (ping, roles) to the roster.
    fn update_player(&self, client: &ClientRecord);
}

/// Counter fed by the dispatcher's telemetry fast path.
pub trait RateMonitor: Send + Sync {
    fn increment_internal_pps(&self);
}

/// Packets-per-second figure published to the backend.
///
/// The dispatcher bumps the internal counter on every relayed telemetry
/// packet; a once-per-second sampler moves the count into the published slot
/// the heartbeat reads.
#[derive(Debug, Default)]
pub struct PpsCounter {
    internal: AtomicU64,
    published: AtomicU64,
}

impl PpsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn sample(&self) {
        let count = self.internal.swap(0, Ordering::Relaxed);
        self.published.store(count, Ordering::Relaxed);
    }
}

impl RateMonitor for PpsCounter {
    fn increment_internal_pps(&self) {
        self.internal.fetch_add(1, Ordering::Relaxed);
    }
}

/// Starts the 1 Hz sampling task and registers its teardown.
pub fn spawn_pps_sampler(counter: Arc<PpsCounter>, shutdown: &ShutdownCoordinator) {
    let stop = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn({
        let stop = Arc::clone(&stop);
        async move {
            while !stop.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                counter.sample();
            }
        }
    });
    shutdown.register(move || async move {
        stop.store(true, Ordering::Relaxed);
        let _ = handle.await;
    });
}

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

type Teardown = Pin<Box<dyn Future<Output = ()> + Send>>;
type Handler = Box<dyn FnOnce() -> Teardown + Send>;

/// Process-wide registry of teardown callbacks.
///
/// Every owner of a background task registers a callback that sets the
/// task's stop flag and awaits its join handle. `shutdown` runs the
/// callbacks once, in insertion order; firing it again is a no-op.
pub struct ShutdownCoordinator {
    handlers: Mutex<Vec<Handler>>,
    fired: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            fired: AtomicBool::new(false),
        }
    }

    pub fn register<F, Fut>(&self, handler: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers.lock().push(Box::new(move || Box::pin(handler())));
    }

    pub async fn shutdown(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            debug!("shutdown already performed, ignoring");
            return;
        }
        let handlers = std::mem::take(&mut *self.handlers.lock());
        info!("shutting down ({} handlers)", handlers.len());
        for handler in handlers {
            handler().await;
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

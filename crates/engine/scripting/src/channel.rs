//! Observation channel
//!
//! The only path by which script output and error descriptions reach the
//! host. Listeners are invoked synchronously, in registration order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, trace};

/// Listener callback type
pub type Listener = Arc<dyn Fn(&str) + Send + Sync>;

/// Ordered registry of listeners sharing one message stream
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct ObservationChannel {
    listeners: Arc<RwLock<Vec<Listener>>>,
}

impl ObservationChannel {
    /// Create a channel with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for every subsequent message
    pub fn subscribe(&self, listener: Listener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver a message to every listener.
    ///
    /// Never panics: a listener that panics is logged and skipped, and the
    /// rest still receive the message.
    pub fn publish(&self, message: &str) {
        // Snapshot so listeners may subscribe while being called.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        trace!(listeners = listeners.len(), len = message.len(), "Publishing message");

        for (index, listener) in listeners.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener(message))).is_err() {
                error!(listener = index, "Output listener panicked; message dropped for it");
            }
        }
    }
}

impl std::fmt::Debug for ObservationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationChannel")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

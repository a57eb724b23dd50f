//! Change-notification plumbing between the registry and the monitoring
//! fan-out. Mutations publish onto a channel instead of calling subscriber
//! lists directly, so a slow monitor push can never block a registry write.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// One registry mutation happened. Carries the registry's identity label;
/// the consumer holds its own reference for building a snapshot.
#[derive(Debug, Clone)]
pub struct RegistryChange {
    pub label: Arc<str>,
}

/// Cloneable handle that emits [`RegistryChange`] events, best-effort.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    label: Arc<str>,
    tx: Option<UnboundedSender<RegistryChange>>,
}

impl ChangeNotifier {
    /// Creates a notifier plus the receiving end for the fan-out pump.
    pub fn new(label: Arc<str>) -> (Self, UnboundedReceiver<RegistryChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                label,
                tx: Some(tx),
            },
            rx,
        )
    }

    /// A notifier with no consumer. Used where nothing monitors the state.
    pub fn disabled(label: Arc<str>) -> Self {
        Self { label, tx: None }
    }

    /// Publishes one change event. Delivery is best-effort: a missing or
    /// closed consumer is not an error.
    pub fn notify(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(RegistryChange {
                label: Arc::clone(&self.label),
            });
        }
    }
}

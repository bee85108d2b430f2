//! Running many clients on one thread.
//!
//! A [`ClientPool`] owns a [`tokio::task::LocalSet`]; every client
//! spawned through it shares that set's thread, with tasks interleaved
//! at their await points. All client state stays on this one thread,
//! so nothing here needs locks. Applications that want parallelism run
//! several pools on separate threads, each with its own clients.

use tokio::sync::mpsc;
use tokio::task::LocalSet;

use crate::event::Event;
use crate::features::FeatureSet;

use super::{Client, Config};

/// A set of clients multiplexed onto one cooperative scheduler.
///
/// A client belongs to the pool it was created on; handles may travel,
/// but the connection task never leaves the pool's thread.
#[derive(Default)]
pub struct ClientPool {
    local: LocalSet,
}

impl ClientPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a client onto this pool.
    pub fn connect(
        &self,
        config: Config,
        features: FeatureSet,
    ) -> (Client, mpsc::UnboundedReceiver<Event>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.local
            .spawn_local(super::run_client(config, features, cmd_rx, event_tx));
        (Client { cmd_tx }, event_rx)
    }

    /// Run until every client has disconnected and no tasks remain.
    pub async fn handle_forever(self) {
        self.local.await;
    }

    /// Borrow the underlying `LocalSet`, e.g. to spawn application
    /// tasks next to the clients.
    pub fn local_set(&self) -> &LocalSet {
        &self.local
    }
}

//! Unit test related configurations and functions.

use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::InterruptHandler;

/// The base port used by UDP tests in this crate.
pub const BASE_PORT: u16 = 47100;

/// The time after which a test gives up waiting for a device event.
pub const TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(1);

/// An [`InterruptHandler`] that counts interrupts as semaphore permits.
pub struct RecordingHandler {
    arrived: Semaphore,
    completed: Semaphore,
}

impl RecordingHandler {
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self {
            arrived: Semaphore::new(0),
            completed: Semaphore::new(0),
        })
    }

    /// Wait for one `packet_arrived` interrupt.
    pub async fn wait_for_packet(&self) {
        tokio::time::timeout(TIMEOUT, self.arrived.acquire())
            .await
            .expect("Timed out waiting for a packet.")
            .expect("Semaphore closed.")
            .forget();
    }

    /// Wait for one `send_complete` interrupt.
    pub async fn wait_for_send_complete(&self) {
        tokio::time::timeout(TIMEOUT, self.completed.acquire())
            .await
            .expect("Timed out waiting for the send to complete.")
            .expect("Semaphore closed.")
            .forget();
    }
}

impl InterruptHandler for RecordingHandler {
    fn packet_arrived(&self) {
        self.arrived.add_permits(1);
    }

    fn send_complete(&self) {
        self.completed.add_permits(1);
    }
}

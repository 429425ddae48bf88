//! The signals shared between the network device's interrupts and the tasks of a
//! post office.
//!
//! The device only ever adds permits; it never touches a mailbox. Turning an
//! arrival into mail is the job of the delivery worker, waiting on
//! [`PostalSignals::wait_for_arrival`].

use network::InterruptHandler;
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

pub struct PostalSignals {
    /// One permit per packet waiting in the device.
    message_available: Semaphore,

    /// One permit per completed send.
    message_sent: Semaphore,

    /// Raised whenever an acknowledgement clears an in-flight mail.
    message_confirmed: Notify,
}

impl PostalSignals {
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self {
            message_available: Semaphore::new(0),
            message_sent: Semaphore::new(0),
            message_confirmed: Notify::new(),
        })
    }

    /// Wait for the device to report an arrived packet.
    pub async fn wait_for_arrival(&self) {
        // The semaphores are never closed.
        if let Ok(permit) = self.message_available.acquire().await {
            permit.forget();
        }
    }

    /// Wait for the device to report that the last send has completed.
    pub async fn wait_for_sent(&self) {
        if let Ok(permit) = self.message_sent.acquire().await {
            permit.forget();
        }
    }

    pub fn confirm(&self) {
        self.message_confirmed.notify_waiters();
    }

    /// The [`Notify`] raised by [`Self::confirm`].
    pub fn confirmed(&self) -> &Notify {
        &self.message_confirmed
    }
}

impl InterruptHandler for PostalSignals {
    fn packet_arrived(&self) {
        self.message_available.add_permits(1);
    }

    fn send_complete(&self) {
        self.message_sent.add_permits(1);
    }
}

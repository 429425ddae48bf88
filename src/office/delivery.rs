//! The delivery worker.
//!
//! Device interrupts only ever add a permit to [`PostalSignals`]; the worker
//! waits for those permits, collects the packet from the device and puts the mail
//! into its mailbox. It is the only task that writes to mailboxes.
//!
//! [`PostalSignals`]: super::PostalSignals

use std::sync::Arc;

use super::PostOffice;
use crate::{postmark, Fatal, Mail};

impl PostOffice {
    /// Spawn the delivery worker, unless it is already running.
    pub(crate) fn start_delivery(self: &Arc<Self>) {
        let weak_self = Arc::downgrade(self);
        let signals = Arc::clone(&self.signals);
        let terminate = Arc::clone(&self._terminate_flag);

        self.dispatcher_handle.get_or_init(|| {
            tokio::spawn(async move {
                // Only a weak reference is held while waiting, so that dropping the
                // post office is enough to stop the worker.
                let deliver = async move {
                    loop {
                        signals.wait_for_arrival().await;

                        let Some(office) = weak_self.upgrade() else {
                            logger::info!("Terminating delivery worker due to dropped reference.");
                            break;
                        };

                        if let Err(reason) = office.deliver_one() {
                            office.halt(reason);
                            break;
                        }
                    }
                };

                tokio::select! {
                    _ = terminate.notified() => {
                        logger::info!("Terminating delivery worker due to termination notification.");
                    },
                    _ = deliver => {},
                }
            })
        });
    }

    /// Move one packet from the device into its mailbox.
    pub(crate) fn deliver_one(&self) -> Result<(), Fatal> {
        let Some((route, packet)) = self.device.receive() else {
            logger::warn!(
                "Machine {} was told a packet arrived, but the device had none.",
                self.address()
            );
            return Ok(());
        };

        let mail = Mail::from_packet(route, packet)
            .map_err(|reason| Fatal::CorruptPacket(route.from, reason))?;

        if mail.header.to as usize >= self.boxes.len() {
            return Err(Fatal::CorruptPacket(
                route.from,
                format!(
                    "mailbox {} is out of range; there are {} mailboxes.",
                    mail.header.to,
                    self.boxes.len()
                ),
            ));
        }

        if mail.payload.len() > self.config().max_mail_size {
            return Err(Fatal::CorruptPacket(
                route.from,
                format!(
                    "mail of {} bytes exceeds the maximum mail size of {} bytes.",
                    mail.payload.len(),
                    self.config().max_mail_size
                ),
            ));
        }

        logger::debug!("Delivering {}", postmark(&mail.route, &mail.header));
        self.boxes[mail.header.to as usize].put(mail.route, mail.header, mail.payload);

        Ok(())
    }
}

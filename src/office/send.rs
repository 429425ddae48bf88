//! The unreliable send and receive paths.
//!

use bytes::{Bytes, BytesMut};
use network::RouteHeader;
use std::{io, sync::Arc};

use super::{Correspondent, PostOffice};
use crate::{postmark, Mail, MailHeader, MailboxId, PostError};

impl PostOffice {
    /// Send `data` to the mailbox and machine named by `header` and `route`.
    ///
    /// The route's source and length, and the header's length, are filled in here.
    /// Returns once the device has finished with the packet, which may or may not
    /// have been delivered. Dropping the returned future part way leaves the
    /// device held until it is done with the packet.
    ///
    /// # Panics
    ///
    /// Panics if `data` exceeds the maximum mail size, or `header.to` is not a
    /// valid mailbox.
    pub async fn send(
        &self,
        route: RouteHeader,
        header: MailHeader,
        data: &[u8],
    ) -> Result<(), PostError> {
        self.transmit(route, header, Bytes::copy_from_slice(data))
            .await
    }

    pub(crate) async fn transmit(
        &self,
        mut route: RouteHeader,
        mut header: MailHeader,
        payload: Bytes,
    ) -> Result<(), PostError> {
        self.check_outbound(&header, payload.len());

        header.length = payload.len() as u32;
        route.from = self.address();
        route.length = (MailHeader::SIZE + payload.len()) as u32;

        let mut packet = BytesMut::with_capacity(route.length as usize);
        header.write(&mut packet);
        packet.extend_from_slice(&payload);
        let packet = packet.freeze();

        let completion = self
            .until_halted(async {
                let guard = Arc::clone(&self.send_lock).lock_owned().await;
                logger::debug!("Sending {}", postmark(&route, &header));

                self.device.send(route, packet);

                // The send that caused a completion signal consumes it, even if
                // the caller has gone.
                let signals = Arc::clone(&self.signals);
                tokio::spawn(async move {
                    signals.wait_for_sent().await;
                    drop(guard);
                })
            })
            .await?;

        self.until_halted(completion)
            .await?
            .map_err(io::Error::from)?;

        Ok(())
    }

    /// Take the oldest mail from mailbox `id`, waiting for one to arrive if needed.
    ///
    /// Mail taken this way also serves as an acknowledgement for anything reliably
    /// sent to the mailbox it came from.
    ///
    /// # Panics
    ///
    /// Panics if there is no mailbox `id`.
    pub async fn receive(&self, id: MailboxId) -> Result<Mail, PostError> {
        let mailbox = self.mailbox(id);
        let mail = self.until_halted(mailbox.get()).await?;

        logger::debug!("Received {}", postmark(&mail.route, &mail.header));
        self.acknowledge(&mail);

        Ok(mail)
    }

    fn acknowledge(&self, mail: &Mail) {
        let sender = Correspondent::sender_of(mail);
        if let Some((ticket, _)) = self
            .in_flight
            .acknowledge(sender, mail.remaining_fragments())
        {
            logger::debug!("Mail {} confirmed by {}.", ticket, postmark(&mail.route, &mail.header));
            self.signals.confirm();
        }
    }

    /// Wait for the next acknowledgement of reliably sent mail.
    pub async fn wait_for_confirmation(&self) -> Result<(), PostError> {
        self.until_halted(self.signals.confirmed().notified())
            .await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        _tests::{open_office, test_config, TIMEOUT},
        Fatal,
    };
    use network::SimulatedNetwork;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn round_trip() {
        let network = SimulatedNetwork::new_arc();
        let alice = open_office(&network, test_config(0));
        let bob = open_office(&network, test_config(1));

        alice
            .send(RouteHeader::to(1), MailHeader::new(1, 0), b"Hello there!")
            .await
            .expect("Failed to send.");

        let mail = tokio::time::timeout(TIMEOUT, bob.receive(0))
            .await
            .expect("Mail did not arrive.")
            .expect("Failed to receive.");

        assert_eq!(mail.payload, Bytes::from_static(b"Hello there!"));
        assert_eq!(mail.route.from, 0);
        assert_eq!(mail.route.to, 1);
        assert_eq!(mail.header.from, 1);
        assert_eq!(mail.header.to, 0);
        assert_eq!(mail.header.length, 12);
        assert!(mail.is_last_fragment());

        // The reply goes back where the mail came from.
        bob.send(mail.route.reply(), mail.header.reply(), b"Got it!")
            .await
            .expect("Failed to reply.");

        let reply = tokio::time::timeout(TIMEOUT, alice.receive(1))
            .await
            .expect("Reply did not arrive.")
            .expect("Failed to receive.");
        assert_eq!(reply.payload, Bytes::from_static(b"Got it!"));
        assert_eq!((reply.route.from, reply.header.from), (1, 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn send_to_self() {
        let network = SimulatedNetwork::new_arc();
        let office = open_office(&network, test_config(4));

        office
            .send(RouteHeader::to(4), MailHeader::new(0, 3), b"")
            .await
            .expect("Failed to send.");

        let mail = tokio::time::timeout(TIMEOUT, office.receive(3))
            .await
            .expect("Mail did not arrive.")
            .expect("Failed to receive.");
        assert!(mail.payload.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn receive_fails_once_halted() {
        let network = SimulatedNetwork::new_arc();
        let office = open_office(&network, test_config(0));

        let waiting = {
            let office = Arc::clone(&office);
            tokio::spawn(async move { office.receive(0).await })
        };

        office.shutdown();

        let result = tokio::time::timeout(TIMEOUT, waiting)
            .await
            .expect("Receive was not woken by the halt.")
            .expect("Task panicked.");
        assert!(matches!(result, Err(PostError::Halted(Fatal::Shutdown))));

        let result = office
            .send(RouteHeader::to(0), MailHeader::new(0, 0), b"late")
            .await;
        assert!(matches!(result, Err(PostError::Halted(Fatal::Shutdown))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_send_keeps_the_device_serialized() {
        let network = Arc::new(SimulatedNetwork::new().with_latency(Duration::from_millis(50)));
        let alice = open_office(&network, test_config(0));
        let bob = open_office(&network, test_config(1));

        // Abandoned while the device still holds the packet.
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            alice.send(RouteHeader::to(1), MailHeader::new(0, 0), b"abandoned"),
        )
        .await;
        assert!(abandoned.is_err());

        for payload in [b"one", b"two", b"six"] {
            tokio::time::timeout(
                TIMEOUT,
                alice.send(RouteHeader::to(1), MailHeader::new(0, 0), payload),
            )
            .await
            .expect("Send stalled.")
            .expect("Failed to send.");
        }

        assert_eq!(network.overlapping_sends(), 0);

        let mut received = Vec::new();
        for _ in 0..4 {
            let mail = tokio::time::timeout(TIMEOUT, bob.receive(0))
                .await
                .expect("Mail did not arrive.")
                .expect("Failed to receive.");
            received.push(mail.payload);
        }
        assert_eq!(
            received,
            [
                Bytes::from_static(b"abandoned"),
                Bytes::from_static(b"one"),
                Bytes::from_static(b"two"),
                Bytes::from_static(b"six"),
            ]
        );
    }

    #[tokio::test]
    #[should_panic(expected = "exceeds the maximum mail size")]
    async fn oversized_mail_panics() {
        let network = SimulatedNetwork::new_arc();
        let office = open_office(&network, test_config(0));
        let data = vec![0; office.config().max_mail_size + 1];

        let _ = office
            .send(RouteHeader::to(1), MailHeader::new(0, 0), &data)
            .await;
    }

    #[tokio::test]
    #[should_panic(expected = "is out of range")]
    async fn destination_out_of_range_panics() {
        let network = SimulatedNetwork::new_arc();
        let office = open_office(&network, test_config(0).with_mailbox_count(2));

        let _ = office
            .send(RouteHeader::to(1), MailHeader::new(0, 2), b"nowhere")
            .await;
    }
}

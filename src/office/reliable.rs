//! Reliable delivery on top of the unreliable send path.
//!
//! A reliable send splits its data into fragments of at most
//! [`PostOfficeConfig::fragment_size`](crate::PostOfficeConfig::fragment_size)
//! bytes and puts all of them into the in-flight set. Fragments are then sent one
//! at a time: each is transmitted, a retransmission timer is armed, and the next
//! one only goes out once the receiver has acknowledged it. Acknowledgements come
//! back to the sending mailbox, `header.from`.
//!
//! A timer that fires while its fragment is still in flight at the same attempt
//! retransmits it. Once a fragment has been transmitted `retry_ceiling + 1` times
//! without being acknowledged, the network is declared broken and the post office
//! halts.
//!
//! An acknowledgement echoes the remaining-fragment counter of the fragment it
//! answers, and is matched to its fragment by that counter and the correspondent,
//! see [`InFlightSet`]. At most one reliable conversation per mailbox pair should
//! be in flight. The receiver accepts fragments strictly in sequence: repeats are
//! acknowledged again and dropped, while a skipped fragment halts the post office.
//!
//! [`InFlightSet`]: super::InFlightSet

use bytes::{Bytes, BytesMut};
use network::RouteHeader;
use std::sync::Arc;

use super::{fragment, Attempt, PostOffice, Ticket};
use crate::{postmark, Fatal, Mail, MailHeader, MailboxId, PostError, ACKNOWLEDGEMENT};

impl PostOffice {
    /// Send `data` of any length to the mailbox and machine named by `header` and
    /// `route`, and wait until every fragment of it has been acknowledged.
    ///
    /// Acknowledgements are expected in mailbox `header.from`; anything else
    /// arriving there in the meantime is discarded.
    ///
    /// # Panics
    ///
    /// Panics if `header.to` or `header.from` is not a valid mailbox.
    pub async fn reliable_send(
        self: &Arc<Self>,
        mut route: RouteHeader,
        header: MailHeader,
        data: &[u8],
    ) -> Result<(), PostError> {
        self.check_outbound(&header, 0);
        let reply_box = self.mailbox(header.from).id();

        route.from = self.address();
        let data = Bytes::copy_from_slice(data);
        let mails = fragment(route, header, &data, self.config().fragment_size());

        // Every fragment is in flight before the first one is sent.
        let tickets: Vec<Ticket> = if mails.len() == 1 {
            mails.into_iter().map(|mail| self.enlist(mail)).collect()
        } else {
            mails
                .into_iter()
                .map(|mail| self.in_flight.insert(mail))
                .collect()
        };

        logger::debug!(
            "Reliably sending {} bytes to mailbox {} on machine {} in {} fragments.",
            data.len(),
            header.to,
            route.to,
            tickets.len()
        );

        for ticket in tickets {
            self.transmit_in_flight(ticket).await?;
            self.await_acknowledgement(ticket, reply_box).await?;
        }

        Ok(())
    }

    /// Put a single-fragment mail in flight, unless an identical one already is.
    fn enlist(&self, mail: Mail) -> Ticket {
        match self.in_flight.find_copy(&mail) {
            Some(ticket) => {
                logger::debug!(
                    "Reusing in-flight mail {} for {}",
                    ticket,
                    postmark(&mail.route, &mail.header)
                );
                ticket
            }
            None => self.in_flight.insert(mail),
        }
    }

    /// Transmit an in-flight mail once more and arm its retransmission timer.
    ///
    /// Does nothing if the mail has been acknowledged in the meantime, and halts the
    /// post office if it has run out of attempts.
    async fn transmit_in_flight(self: &Arc<Self>, ticket: Ticket) -> Result<(), PostError> {
        match self.in_flight.next_attempt(ticket, self.config().retry_ceiling) {
            Attempt::Acknowledged => Ok(()),
            Attempt::Exhausted(mail) => {
                let reason = Fatal::RetriesExhausted {
                    machine: mail.route.to,
                    mailbox: mail.header.to,
                    attempts: mail.attempts,
                };
                self.halt(reason.clone());
                Err(PostError::Halted(reason))
            }
            Attempt::Transmit(mail) => {
                logger::trace!("Transmitting mail {}, attempt {}.", ticket, mail.attempts);
                self.transmit(mail.route, mail.header, mail.payload).await?;
                self.arm_retransmit(ticket, mail.attempts);
                Ok(())
            }
        }
    }

    fn arm_retransmit(self: &Arc<Self>, ticket: Ticket, attempts: u32) {
        let weak_self = Arc::downgrade(self);
        let delay = self.config().retransmit_delay();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if let Some(office) = weak_self.upgrade() {
                office.on_retransmit_timeout(ticket, attempts).await;
            }
        });
    }

    async fn on_retransmit_timeout(self: &Arc<Self>, ticket: Ticket, attempts: u32) {
        if self.fatal_error().is_some() {
            return;
        }

        if self.in_flight.is_empty() {
            logger::trace!("All reliable mail acknowledged; nothing to retransmit.");
            return;
        }

        if self.in_flight.attempts(ticket) != Some(attempts) {
            // Acknowledged, or retransmitted by a later timer.
            return;
        }

        logger::info!(
            "Mail {} was not acknowledged within {:?}; retransmitting.",
            ticket,
            self.config().retransmit_delay()
        );

        if let Err(err) = self.transmit_in_flight(ticket).await {
            logger::debug!("Retransmission of mail {} abandoned: {}", ticket, err);
        }
    }

    /// Wait until `ticket` is no longer in flight, collecting acknowledgements from
    /// `reply_box` meanwhile.
    async fn await_acknowledgement(
        &self,
        ticket: Ticket,
        reply_box: MailboxId,
    ) -> Result<(), PostError> {
        loop {
            // Register for confirmations before checking, so that one raised by
            // another receiver in between is not missed.
            let confirmed = self.signals.confirmed().notified();
            tokio::pin!(confirmed);
            confirmed.as_mut().enable();

            if !self.in_flight.contains(ticket) {
                return Ok(());
            }

            tokio::select! {
                mail = self.receive(reply_box) => {
                    let mail = mail?;
                    if self.in_flight.contains(ticket) {
                        logger::warn!(
                            "Discarding {} while waiting for an acknowledgement.",
                            postmark(&mail.route, &mail.header)
                        );
                    }
                },
                _ = &mut confirmed => {},
            }
        }
    }

    /// Receive one reliably sent message from mailbox `id`, appending its data to
    /// `accumulator`.
    ///
    /// Every fragment is acknowledged as it arrives; fragments repeated by a
    /// retransmission are acknowledged again but not appended twice. Returns the
    /// last fragment, once it has arrived.
    ///
    /// A fragment whose counter skips ahead of the last one accepted means data
    /// was lost, and halts the post office with [`Fatal::CorruptPacket`].
    ///
    /// # Panics
    ///
    /// Panics if there is no mailbox `id`.
    pub async fn reliable_receive(
        &self,
        id: MailboxId,
        accumulator: &mut BytesMut,
    ) -> Result<Mail, PostError> {
        let mut last_accepted: Option<u32> = None;

        loop {
            let mail = self.receive(id).await?;
            let remaining = mail.remaining_fragments();

            match last_accepted {
                Some(last) if remaining >= last => {
                    logger::debug!(
                        "Ignoring repeated fragment {}",
                        postmark(&mail.route, &mail.header)
                    );
                    self.send_acknowledgement(&mail).await?;
                    continue;
                }
                Some(last) if remaining + 1 != last => {
                    let reason = Fatal::CorruptPacket(
                        mail.route.from,
                        format!(
                            "fragment with {} remaining arrived after one with {} remaining.",
                            remaining, last
                        ),
                    );
                    self.halt(reason.clone());
                    return Err(PostError::Halted(reason));
                }
                _ => self.send_acknowledgement(&mail).await?,
            }

            accumulator.extend_from_slice(&mail.payload);
            last_accepted = Some(remaining);

            if mail.is_last_fragment() {
                return Ok(mail);
            }
        }
    }

    async fn send_acknowledgement(&self, mail: &Mail) -> Result<(), PostError> {
        let mut header = mail.header.reply();
        header.remaining_fragments = mail.remaining_fragments();

        if header.to as usize >= self.mailbox_count() {
            let reason = Fatal::CorruptPacket(
                mail.route.from,
                format!(
                    "reply mailbox {} is out of range; there are {} mailboxes.",
                    header.to,
                    self.mailbox_count()
                ),
            );
            self.halt(reason.clone());
            return Err(PostError::Halted(reason));
        }

        self.transmit(
            mail.route.reply(),
            header,
            Bytes::from_static(ACKNOWLEDGEMENT),
        )
        .await
    }
}

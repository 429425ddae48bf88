//! The set of reliably sent mail that has not been acknowledged yet.
//!
//! Entries are keyed by a [`Ticket`] handed out in insertion order, so the oldest
//! entry is the one with the lowest ticket. Mail coming back from some
//! [`Correspondent`] acknowledges the oldest entry addressed to that correspondent
//! with the same remaining-fragment counter. Acknowledgements carry no message
//! identity beyond that, so only one reliable conversation per mailbox pair can be
//! in flight at a time.

use fxhash::FxHashMap;
use network::NetworkAddress;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, MutexGuard,
};

use crate::{Mail, MailboxId};

/// Identifies one entry of the [`InFlightSet`].
pub type Ticket = u64;

/// A mailbox on a particular machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Correspondent {
    pub machine: NetworkAddress,
    pub mailbox: MailboxId,
}

impl Correspondent {
    /// Where `mail` is going.
    pub fn recipient_of(mail: &Mail) -> Self {
        Self {
            machine: mail.route.to,
            mailbox: mail.header.to,
        }
    }

    /// Where `mail` came from.
    pub fn sender_of(mail: &Mail) -> Self {
        Self {
            machine: mail.route.from,
            mailbox: mail.header.from,
        }
    }
}

/// The outcome of asking for another attempt at an in-flight mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// The mail should be transmitted again; its attempt count has been bumped.
    Transmit(Mail),

    /// The mail has used up its attempts. It stays in the set, so that anyone
    /// waiting for it does not mistake it for acknowledged.
    Exhausted(Mail),

    /// The mail is no longer in flight.
    Acknowledged,
}

macro_rules! ignore_poison {
    () => {
        |poison| {
            logger::warn!("Poisoned lock ignored for the in-flight set.");
            poison.into_inner()
        }
    };
}

#[derive(Default)]
pub struct InFlightSet {
    entries: Mutex<FxHashMap<Ticket, Mail>>,
    next_ticket: AtomicU64,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, FxHashMap<Ticket, Mail>> {
        self.entries.lock().unwrap_or_else(ignore_poison!())
    }

    /// Add a mail to the set, and return its ticket.
    pub fn insert(&self, mail: Mail) -> Ticket {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        logger::trace!("Mail {} is now in flight.", ticket);
        self.entries().insert(ticket, mail);
        ticket
    }

    /// The oldest entry carrying the same headers and payload as `mail`, if any.
    pub fn find_copy(&self, mail: &Mail) -> Option<Ticket> {
        self.entries()
            .iter()
            .filter(|(_, entry)| {
                Correspondent::recipient_of(entry) == Correspondent::recipient_of(mail)
                    && entry.header == mail.header
                    && entry.payload == mail.payload
            })
            .map(|(ticket, _)| *ticket)
            .min()
    }

    pub fn contains(&self, ticket: Ticket) -> bool {
        self.entries().contains_key(&ticket)
    }

    /// Treat a mail from `sender` as an acknowledgement of the fragment with
    /// `remaining_fragments` still to come after it.
    ///
    /// Removes and returns the oldest matching entry, if any. A late, repeated
    /// acknowledgement finds nothing, rather than some later fragment.
    pub fn acknowledge(
        &self,
        sender: Correspondent,
        remaining_fragments: u32,
    ) -> Option<(Ticket, Mail)> {
        let mut entries = self.entries();
        let ticket = entries
            .iter()
            .filter(|(_, mail)| {
                Correspondent::recipient_of(mail) == sender
                    && mail.remaining_fragments() == remaining_fragments
            })
            .map(|(ticket, _)| *ticket)
            .min()?;

        entries.remove(&ticket).map(|mail| (ticket, mail))
    }

    /// The attempt count of an entry, if it is still in flight.
    pub fn attempts(&self, ticket: Ticket) -> Option<u32> {
        self.entries().get(&ticket).map(|mail| mail.attempts)
    }

    /// Bump the attempt count of an entry, unless it has already been attempted
    /// more than `retry_ceiling` times.
    ///
    /// An entry can therefore be transmitted `retry_ceiling + 1` times in total.
    pub fn next_attempt(&self, ticket: Ticket, retry_ceiling: u32) -> Attempt {
        match self.entries().get_mut(&ticket) {
            None => Attempt::Acknowledged,
            Some(mail) if mail.attempts > retry_ceiling => Attempt::Exhausted(mail.clone()),
            Some(mail) => {
                mail.attempts += 1;
                Attempt::Transmit(mail.clone())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

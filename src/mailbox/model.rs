//! The mailbox model.
//!
use bytes::Bytes;
use deadqueue::unlimited::Queue;
use network::RouteHeader;

use crate::{postmark, Mail, MailHeader, MailboxId};

/// A blocking FIFO queue of [`Mail`].
///
/// The queue is internally synchronized; any number of producers and consumers
/// may share one mailbox.
pub struct Mailbox {
    id: MailboxId,
    messages: Queue<Mail>,
}

impl Mailbox {
    /// Create a new, empty mailbox.
    pub fn new(id: MailboxId) -> Self {
        Self {
            id,
            messages: Queue::new(),
        }
    }

    pub fn id(&self) -> MailboxId {
        self.id
    }

    /// Append a mail to the mailbox, waking one waiting consumer.
    ///
    /// This never waits.
    ///
    /// # Panics
    ///
    /// Panics if `header.length` disagrees with the length of `payload`.
    pub fn put(&self, route: RouteHeader, header: MailHeader, payload: Bytes) {
        let mail = Mail::new(route, header, payload);
        logger::trace!("Mailbox {} <- {}", self.id, postmark(&route, &header));
        self.messages.push(mail);
    }

    /// Remove and return the oldest mail, waiting for one to arrive if needed.
    ///
    /// Cancelling the returned future before it completes loses no mail.
    pub async fn get(&self) -> Mail {
        logger::trace!("Waiting for mail in mailbox {}.", self.id);
        self.messages.pop().await
    }

    /// A snapshot of the number of mails waiting.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// A snapshot of whether the mailbox is empty.
    ///
    /// This is only meant for diagnostics; by the time it returns, another task may
    /// already have changed the answer.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    fn header(length: usize) -> MailHeader {
        MailHeader {
            from: 1,
            to: 0,
            length: length as u32,
            remaining_fragments: 0,
        }
    }

    fn put(mailbox: &Mailbox, payload: &'static [u8]) {
        mailbox.put(
            RouteHeader::new(0, 1, payload.len() as u32),
            header(payload.len()),
            Bytes::from_static(payload),
        );
    }

    #[tokio::test]
    async fn fifo() {
        let mailbox = Mailbox::new(0);
        let payloads: [&'static [u8]; 4] = [b"one", b"two", b"three", b"four"];

        for payload in payloads {
            put(&mailbox, payload);
        }
        assert_eq!(mailbox.len(), payloads.len());

        for payload in payloads {
            assert_eq!(mailbox.get().await.payload, payload);
        }
        assert!(mailbox.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn get_waits_for_put() {
        let mailbox = Arc::new(Mailbox::new(0));

        let consumer = tokio::spawn({
            let mailbox = Arc::clone(&mailbox);
            async move { mailbox.get().await }
        });

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert!(!consumer.is_finished(), "Get should wait on an empty mailbox.");

        put(&mailbox, b"HELLO");

        let mail = tokio::time::timeout(tokio::time::Duration::from_secs(1), consumer)
            .await
            .expect("Get did not return after a put.")
            .expect("Consumer task panicked.");
        assert_eq!(mail.payload, Bytes::from_static(b"HELLO"));
        assert!(mailbox.is_empty());
    }

    #[tokio::test]
    async fn cancelled_get_loses_nothing() {
        let mailbox = Mailbox::new(0);

        let waited =
            tokio::time::timeout(tokio::time::Duration::from_millis(10), mailbox.get()).await;
        assert!(waited.is_err());

        put(&mailbox, b"still here");
        assert_eq!(mailbox.get().await.payload, Bytes::from_static(b"still here"));
    }
}

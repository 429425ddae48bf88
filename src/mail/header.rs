//! Mailbox-to-mailbox addressing.

use bytes::{Buf, BufMut};
use network::RouteHeader;
use std::mem::size_of;

/// The identifier of a mailbox within one post office.
pub type MailboxId = u32;

/// The mailbox-layer header, carried at the front of every packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MailHeader {
    /// The mailbox the mail came from, which is also where replies should go.
    pub from: MailboxId,

    /// The mailbox the mail is for.
    pub to: MailboxId,

    /// Number of payload bytes following the header.
    pub length: u32,

    /// Fragments still to come after this one; `0` marks the final fragment.
    pub remaining_fragments: u32,
}

impl MailHeader {
    /// Encoded size: four little-endian `u32`s.
    pub const SIZE: usize = 4 * size_of::<u32>();

    /// A header from mailbox `from` to mailbox `to`; the length is filled in on send.
    pub fn new(from: MailboxId, to: MailboxId) -> Self {
        Self {
            from,
            to,
            ..Self::default()
        }
    }

    /// The header for a reply to a mail carrying this header.
    pub fn reply(&self) -> Self {
        Self::new(self.to, self.from)
    }

    pub fn write<B: BufMut>(&self, data: &mut B) {
        data.put_u32_le(self.from);
        data.put_u32_le(self.to);
        data.put_u32_le(self.length);
        data.put_u32_le(self.remaining_fragments);
    }

    /// Read a header off the front of `data`.
    ///
    /// Returns [`None`] if there are not enough bytes.
    pub fn read<B: Buf>(data: &mut B) -> Option<Self> {
        if data.remaining() < Self::SIZE {
            return None;
        }

        Some(Self {
            from: data.get_u32_le(),
            to: data.get_u32_le(),
            length: data.get_u32_le(),
            remaining_fragments: data.get_u32_le(),
        })
    }
}

/// Describe both headers of a mail in one line.
pub fn postmark(route: &RouteHeader, header: &MailHeader) -> String {
    format!(
        "From ({}, {}) to ({}, {}). Length: {}, Remaining parts: {}",
        route.from, header.from, route.to, header.to, header.length, header.remaining_fragments
    )
}

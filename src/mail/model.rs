use bytes::{Bytes, BytesMut};
use network::RouteHeader;

use super::MailHeader;

/// One message, as held by a mailbox or by the in-flight set.
///
/// The payload length is always explicit: `header.length == payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub route: RouteHeader,
    pub header: MailHeader,
    pub payload: Bytes,

    /// Number of times this mail has been handed to the network.
    pub attempts: u32,
}

impl Mail {
    /// Create a new mail.
    ///
    /// # Panics
    ///
    /// Panics if `header.length` disagrees with the length of `payload`.
    pub fn new(route: RouteHeader, header: MailHeader, payload: Bytes) -> Self {
        assert_eq!(
            header.length as usize,
            payload.len(),
            "Mail header declares {} bytes but the payload has {}.",
            header.length,
            payload.len()
        );

        Self {
            route,
            header,
            payload,
            attempts: 0,
        }
    }

    pub fn remaining_fragments(&self) -> u32 {
        self.header.remaining_fragments
    }

    pub fn is_last_fragment(&self) -> bool {
        self.header.remaining_fragments == 0
    }

    /// The packet payload for this mail: the mail header followed by the payload.
    pub fn to_packet(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(MailHeader::SIZE + self.payload.len());
        self.header.write(&mut buffer);
        buffer.extend_from_slice(&self.payload);
        buffer.freeze()
    }

    /// Rebuild a mail from a packet that arrived with the given route header.
    pub fn from_packet(route: RouteHeader, mut packet: Bytes) -> Result<Self, String> {
        let header = MailHeader::read(&mut packet).ok_or_else(|| {
            format!(
                "{} bytes is too short for a {} byte mail header.",
                packet.len(),
                MailHeader::SIZE
            )
        })?;

        if header.length as usize != packet.len() {
            return Err(format!(
                "Mail header declares {} bytes but {} arrived.",
                header.length,
                packet.len()
            ));
        }

        Ok(Self::new(route, header, packet))
    }
}

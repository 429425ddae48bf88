//! Machine-to-machine addressing.

use bytes::{Buf, BufMut};
use std::{fmt, mem::size_of};

/// The identifier of a machine on the network.
pub type NetworkAddress = u32;

/// The largest frame a device will put on the wire, route header included.
pub const MAX_WIRE_SIZE: usize = 64;

/// The default largest payload a device accepts in one packet.
pub const DEFAULT_MAX_PACKET_SIZE: usize = MAX_WIRE_SIZE - RouteHeader::SIZE;

/// The network-layer header that travels alongside every packet.
///
/// The device fills nothing in by itself: whoever calls [`crate::NetworkDevice::send`]
/// is responsible for `from` and `length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RouteHeader {
    /// The machine the packet came from.
    pub from: NetworkAddress,

    /// The machine the packet is going to.
    pub to: NetworkAddress,

    /// Number of payload bytes following the header.
    pub length: u32,
}

impl RouteHeader {
    /// Encoded size: three little-endian `u32`s.
    pub const SIZE: usize = 3 * size_of::<u32>();

    pub fn new(from: NetworkAddress, to: NetworkAddress, length: u32) -> Self {
        Self { from, to, length }
    }

    /// A header addressed to `to`, with the other fields left for the sender.
    pub fn to(to: NetworkAddress) -> Self {
        Self {
            to,
            ..Self::default()
        }
    }

    /// The header for a packet going back the way this one came.
    pub fn reply(&self) -> Self {
        Self {
            from: self.to,
            to: self.from,
            length: 0,
        }
    }

    pub fn write<B: BufMut>(&self, data: &mut B) {
        data.put_u32_le(self.from);
        data.put_u32_le(self.to);
        data.put_u32_le(self.length);
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
        })
    }
}

impl fmt::Display for RouteHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "machine {} -> machine {} ({} bytes)",
            self.from, self.to, self.length
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn wire_layout() {
        let header = RouteHeader::new(1, 2, 0x0304);
        let mut buffer = BytesMut::new();
        header.write(&mut buffer);

        assert_eq!(
            buffer.as_ref(),
            &[1, 0, 0, 0, 2, 0, 0, 0, 4, 3, 0, 0],
            "Route header should be three little-endian u32s."
        );
        assert_eq!(RouteHeader::read(&mut buffer.freeze()), Some(header));
    }

    #[test]
    fn short_header() {
        let mut data: &[u8] = &[1, 0, 0, 0, 2];
        assert_eq!(RouteHeader::read(&mut data), None);
    }

    #[test]
    fn reply_swaps_machines() {
        let header = RouteHeader::new(3, 7, 20);
        assert_eq!(header.reply(), RouteHeader::new(7, 3, 0));
    }
}

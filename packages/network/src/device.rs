//! The contract between a network device and whoever drives it.

use bytes::Bytes;
use std::io;

use crate::{build_error, NetworkAddress, RouteHeader, DEFAULT_MAX_PACKET_SIZE};

/// Receives the interrupt-like notifications raised by a [`NetworkDevice`].
///
/// Both methods are called from the device's own tasks. They must not block, and
/// should do no more than raise a signal for some other task to act on.
pub trait InterruptHandler: Send + Sync {
    /// A packet has arrived and is ready for [`NetworkDevice::receive`].
    fn packet_arrived(&self);

    /// The packet passed to the last [`NetworkDevice::send`] has been handed off.
    ///
    /// This is raised whether or not the packet was dropped on the way.
    fn send_complete(&self);
}

/// A packet-oriented, lossy network interface for one machine.
pub trait NetworkDevice: Send + Sync + 'static {
    /// The address of the machine this device belongs to.
    fn address(&self) -> NetworkAddress;

    /// The largest payload accepted by [`Self::send`].
    fn max_packet_size(&self) -> usize;

    /// Put a packet on the network.
    ///
    /// This never blocks; completion is reported through
    /// [`InterruptHandler::send_complete`], exactly once per call. The packet may be
    /// silently dropped.
    ///
    /// # Panics
    ///
    /// Panics if `payload` is longer than [`Self::max_packet_size`].
    fn send(&self, route: RouteHeader, payload: Bytes);

    /// Take the oldest packet that has arrived, if any.
    fn receive(&self) -> Option<(RouteHeader, Bytes)>;
}

/// Parameters every device is constructed with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceConfig {
    /// The address of the local machine.
    pub address: NetworkAddress,

    /// Probability that any one packet is delivered, in `[0, 1]`.
    pub reliability: f64,

    /// The largest payload accepted in one packet.
    pub max_packet_size: usize,
}

impl DeviceConfig {
    /// Create a new [`DeviceConfig`], checking that `reliability` is a probability.
    pub fn new(address: NetworkAddress, reliability: f64) -> io::Result<Self> {
        if !(0.0..=1.0).contains(&reliability) {
            return Err(build_error(&format!(
                "Reliability {reliability} is not within [0, 1]."
            )));
        }

        Ok(Self {
            address,
            reliability,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        })
    }

    /// Sets the largest payload accepted in one packet.
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Panic unless `payload` fits in one packet of this device.
    pub(crate) fn check_packet(&self, route: &RouteHeader, payload: &[u8]) {
        assert!(
            payload.len() <= self.max_packet_size,
            "Packet of {} bytes exceeds the maximum packet size of {} bytes.",
            payload.len(),
            self.max_packet_size
        );
        debug_assert_eq!(route.length as usize, payload.len());
    }
}

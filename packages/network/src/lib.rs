//! The network device layer underneath the post office.
//!
//! A network device moves packets of bounded size between machines. It may silently
//! drop any outbound packet, but never corrupts or splits one. Devices report
//! progress through an [`InterruptHandler`]: once when a packet has been handed off
//! by [`NetworkDevice::send`], and once for every packet that has arrived and can be
//! collected with [`NetworkDevice::receive`].
//!
//! Two devices are provided:
//!
//! - [`SimulatedNetwork`], an in-memory hub for any number of machines in one
//!   process, with a seedable drop probability and test instrumentation;
//! - [`UdpNetwork`], which places each machine on a loopback UDP port so that
//!   separate processes can talk to each other.

/// Recover the guard from a poisoned [`std::sync::Mutex`] or [`std::sync::RwLock`].
///
/// None of the state behind these locks can be left half-updated by a panic, so the
/// poison is logged and ignored.
macro_rules! ignore_poison {
    ($what:expr) => {
        |poison| {
            $crate::logger::warn!("Poisoned lock ignored for {}.", $what);
            poison.into_inner()
        }
    };
}
pub(crate) use ignore_poison;

mod device;
pub use device::*;

mod route;
pub use route::*;

pub mod sim;
pub use sim::{SimulatedDevice, SimulatedNetwork};

pub mod socket;

pub mod udp;
pub use udp::{UdpDevice, UdpNetwork};

use std::io;
/// Builds an [`io::Error`] for invalid device parameters, with the given message.
pub fn build_error(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}

#[cfg(test)]
pub mod _tests;

/// Re-export the [`logger`] module.
pub use logger;

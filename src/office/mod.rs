//! The post office: mailboxes on top of a lossy, packet-sized network.
//!
//! - [`model`]: the [`PostOffice`] and its lifecycle, including halting.
//! - [`delivery`]: the worker that sorts arriving packets into mailboxes.
//! - [`send`]: the unreliable send and receive paths.
//! - [`reliable`]: fragmentation, acknowledgements and retransmission on top of
//!   them.
//!

mod delivery;

mod fragment;
pub use fragment::fragment;

mod in_flight;
pub use in_flight::{Attempt, Correspondent, InFlightSet, Ticket};

mod model;
pub use model::*;

mod reliable;

mod send;

mod signals;
pub use signals::PostalSignals;

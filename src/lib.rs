//! Mailboxes over an unreliable network.
//!
//! A [`PostOffice`] owns a fixed number of [`Mailbox`]es on one machine, and a
//! [`NetworkDevice`](network::NetworkDevice) that can lose packets and only
//! carries a few dozen bytes at a time. On top of it, the post office offers:
//!
//! - unreliable [`PostOffice::send`] and [`PostOffice::receive`] of single mails,
//!   delivered in arrival order within each mailbox;
//! - [`PostOffice::reliable_send`] and [`PostOffice::reliable_receive`] of
//!   messages of any length, which are fragmented, acknowledged and retransmitted
//!   until they get through, or until the network is declared broken.
//!

mod config;
pub use config::*;

mod errors;
pub use errors::{Fatal, PostError};

pub mod mail;
pub use mail::*;

pub mod mailbox;
pub use mailbox::Mailbox;

mod office;
pub use office::*;


pub use network;

//! The unit of delivery: a [`Mail`], addressed by a [`RouteHeader`] and a
//! [`MailHeader`].
//!
//! On the network, a mail travels as the payload of one packet: the encoded
//! [`MailHeader`] followed by exactly `length` bytes of opaque payload. The
//! [`RouteHeader`] is carried by the device alongside it.
//!
//! [`RouteHeader`]: network::RouteHeader

mod header;
pub use header::*;

mod model;
pub use model::*;

//! A mailbox is where mail waits after it has come off the network, until someone
//! asks for it. Each mailbox is an independent FIFO queue: mail is handed out in the
//! order it arrived, and anyone asking an empty mailbox waits until mail shows up.
//!

mod model;
pub use model::*;

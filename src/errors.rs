//! Error types.
//!

use network::NetworkAddress;
use thiserror::Error;

use crate::MailboxId;

/// A condition the post office cannot recover from.
///
/// Once one of these is raised, the [`crate::PostOffice`] is halted: the delivery
/// worker stops, and every pending or future operation fails with
/// [`PostError::Halted`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fatal {
    #[error("Network error: mail for mailbox {mailbox} on machine {machine} was not acknowledged after {attempts} attempts.")]
    RetriesExhausted {
        machine: NetworkAddress,
        mailbox: MailboxId,
        attempts: u32,
    },
    #[error("Corrupt packet from machine {0}: {1}")]
    CorruptPacket(NetworkAddress, String),
    #[error("The post office has been shut down.")]
    Shutdown,
}

#[derive(Error, Debug)]
pub enum PostError {
    #[error("Post office halted: {0}")]
    Halted(Fatal),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<Fatal> for PostError {
    fn from(reason: Fatal) -> Self {
        Self::Halted(reason)
    }
}

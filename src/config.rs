//! Post office configuration, and the CLI arguments of the demo binary.
//!
use clap::{Parser, ValueEnum};
use network::{DeviceConfig, NetworkAddress};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::{MailHeader, PostError};

/// Default number of mailboxes in a post office.
pub const DEFAULT_MAILBOX_COUNT: usize = 10;

/// Default probability that the network delivers a packet.
pub const DEFAULT_RELIABILITY: f64 = 1.0;

/// Default largest payload the network device accepts in one packet.
pub const DEFAULT_MAX_PACKET_SIZE: usize = network::DEFAULT_MAX_PACKET_SIZE;

/// Default largest mail payload; whatever is left of a packet after the mail header.
pub const DEFAULT_MAX_MAIL_SIZE: usize = DEFAULT_MAX_PACKET_SIZE - MailHeader::SIZE;

/// Default number of retransmissions of a reliable chunk before giving up.
pub const DEFAULT_RETRY_CEILING: u32 = 5;

/// Default time to wait for an acknowledgement before retransmitting, in milliseconds.
pub const DEFAULT_RETRANSMIT_DELAY_MS: u64 = 500;

/// The payload sent back for every reliably received fragment.
pub const ACKNOWLEDGEMENT: &[u8] = b"Got it!";

/// Everything a [`crate::PostOffice`] is constructed with.
///
/// The defaults can be overridden with the `with_*` methods, or by loading a JSON
/// file with [`Self::from_json_file`]; fields missing from the file keep their
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostOfficeConfig {
    /// This machine's network address.
    pub address: NetworkAddress,

    /// Probability in `[0, 1]` that the network delivers any one packet.
    pub reliability: f64,

    /// Number of mailboxes; valid mailbox ids are `0..mailbox_count`.
    pub mailbox_count: usize,

    /// Largest payload the network device accepts in one packet.
    pub max_packet_size: usize,

    /// Largest payload of a single mail, excluding the mail header.
    pub max_mail_size: usize,

    /// Number of retransmissions of a reliable chunk before the network is
    /// declared broken.
    pub retry_ceiling: u32,

    /// Time to wait for an acknowledgement before retransmitting, in milliseconds.
    pub retransmit_delay_ms: u64,
}

impl Default for PostOfficeConfig {
    fn default() -> Self {
        Self {
            address: 0,
            reliability: DEFAULT_RELIABILITY,
            mailbox_count: DEFAULT_MAILBOX_COUNT,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_mail_size: DEFAULT_MAX_MAIL_SIZE,
            retry_ceiling: DEFAULT_RETRY_CEILING,
            retransmit_delay_ms: DEFAULT_RETRANSMIT_DELAY_MS,
        }
    }
}

impl PostOfficeConfig {
    /// A default configuration for the machine at `address`.
    pub fn new(address: NetworkAddress) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self, PostError> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_address(mut self, address: NetworkAddress) -> Self {
        self.address = address;
        self
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn with_mailbox_count(mut self, mailbox_count: usize) -> Self {
        self.mailbox_count = mailbox_count;
        self
    }

    /// Sets the largest packet payload, shrinking the max mail size to fit if needed.
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self.max_mail_size = self
            .max_mail_size
            .min(max_packet_size.saturating_sub(MailHeader::SIZE));
        self
    }

    pub fn with_max_mail_size(mut self, max_mail_size: usize) -> Self {
        self.max_mail_size = max_mail_size;
        self
    }

    pub fn with_retry_ceiling(mut self, retry_ceiling: u32) -> Self {
        self.retry_ceiling = retry_ceiling;
        self
    }

    pub fn with_retransmit_delay(mut self, delay: Duration) -> Self {
        self.retransmit_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn retransmit_delay(&self) -> Duration {
        Duration::from_millis(self.retransmit_delay_ms)
    }

    /// Largest payload carried by one fragment of a reliable send.
    pub fn fragment_size(&self) -> usize {
        self.max_mail_size - 1
    }

    /// The parameters the network device is constructed with.
    pub fn device_config(&self) -> Result<DeviceConfig, PostError> {
        Ok(DeviceConfig::new(self.address, self.reliability)?
            .with_max_packet_size(self.max_packet_size))
    }

    /// Check that the configuration describes a working post office.
    pub fn validate(&self) -> Result<(), PostError> {
        if self.mailbox_count == 0 {
            return Err(PostError::InvalidConfig(
                "A post office needs at least one mailbox.".to_owned(),
            ));
        }

        if !(0.0..=1.0).contains(&self.reliability) {
            return Err(PostError::InvalidConfig(format!(
                "Reliability {} is not within [0, 1].",
                self.reliability
            )));
        }

        if self.max_mail_size + MailHeader::SIZE > self.max_packet_size {
            return Err(PostError::InvalidConfig(format!(
                "A mail of {} bytes plus its {} byte header does not fit in a {} byte packet.",
                self.max_mail_size,
                MailHeader::SIZE,
                self.max_packet_size
            )));
        }

        // Acknowledgements are sent as a single mail.
        if self.max_mail_size < ACKNOWLEDGEMENT.len() {
            return Err(PostError::InvalidConfig(format!(
                "Max mail size {} cannot carry the {} byte acknowledgement.",
                self.max_mail_size,
                ACKNOWLEDGEMENT.len()
            )));
        }

        Ok(())
    }
}

/// What the demo binary does once its post office is open.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Send a message to mailbox 0 of the peer, and wait for its reply in mailbox 1.
    Send,
    /// Wait for a message in mailbox 0, and reply to its sender.
    Receive,
    /// Send a message of any length to mailbox 0 of the peer, reliably.
    ReliableSend,
    /// Reassemble one reliably sent message from mailbox 0.
    ReliableReceive,
}

#[derive(Parser, Debug, Clone)]
pub struct CliArgs {
    /// This machine's network address.
    #[clap(short = 'm', long, default_value_t = 0)]
    pub address: NetworkAddress,

    /// Probability that the network delivers a packet.
    #[clap(short, long, default_value_t = DEFAULT_RELIABILITY)]
    pub reliability: f64,

    /// The machine to send to.
    #[clap(short = 'o', long)]
    pub peer: Option<NetworkAddress>,

    #[clap(long, value_enum, default_value_t = Mode::Receive)]
    pub mode: Mode,

    /// The message to send.
    #[clap(long, default_value = "Hello there!")]
    pub message: String,

    /// JSON file with a post office configuration; the flags above override it.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// UDP port of machine 0; machine `n` listens on `base_port + n`.
    #[clap(long, default_value_t = network::udp::DEFAULT_BASE_PORT)]
    pub base_port: u16,
}

impl CliArgs {
    /// Build the [`PostOfficeConfig`] these arguments describe.
    pub fn post_office_config(&self) -> Result<PostOfficeConfig, PostError> {
        let config = match &self.config {
            Some(path) => PostOfficeConfig::from_json_file(path)?,
            None => PostOfficeConfig::default(),
        }
        .with_address(self.address)
        .with_reliability(self.reliability);

        config.validate()?;
        Ok(config)
    }

    /// The peer machine, which is required for sending.
    pub fn peer(&self) -> Result<NetworkAddress, PostError> {
        self.peer.ok_or_else(|| {
            PostError::InvalidConfig(format!("--peer is required in {:?} mode.", self.mode))
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PostOfficeConfig::default();
        config.validate().expect("Default config should be valid.");
        assert_eq!(config.max_mail_size + MailHeader::SIZE, config.max_packet_size);
    }

    #[test]
    fn invalid_configs() {
        let base = PostOfficeConfig::new(1);

        for config in [
            base.clone().with_mailbox_count(0),
            base.clone().with_reliability(1.5),
            base.clone().with_max_mail_size(DEFAULT_MAX_PACKET_SIZE),
            base.clone().with_max_mail_size(ACKNOWLEDGEMENT.len() - 1),
        ] {
            assert!(
                matches!(config.validate(), Err(PostError::InvalidConfig(_))),
                "{config:?} should be rejected."
            );
        }
    }

    #[test]
    fn packet_size_shrinks_mail_size() {
        let config = PostOfficeConfig::default().with_max_packet_size(30);
        assert_eq!(config.max_mail_size, 30 - MailHeader::SIZE);
        config.validate().expect("Config should still be valid.");
    }

    #[test]
    fn partial_json() {
        let config: PostOfficeConfig =
            serde_json::from_str(r#"{"mailbox_count": 4, "retransmit_delay_ms": 20}"#)
                .expect("Failed to parse config.");

        assert_eq!(config.mailbox_count, 4);
        assert_eq!(config.retransmit_delay(), Duration::from_millis(20));
        assert_eq!(config.retry_ceiling, DEFAULT_RETRY_CEILING);
    }

    #[test]
    fn cli_overrides() {
        let args = CliArgs::parse_from([
            "nettest",
            "-m",
            "1",
            "-o",
            "0",
            "--reliability",
            "0.5",
            "--mode",
            "reliable-send",
        ]);
        let config = args.post_office_config().expect("Valid arguments.");

        assert_eq!(config.address, 1);
        assert_eq!(config.reliability, 0.5);
        assert_eq!(args.mode, Mode::ReliableSend);
        assert_eq!(args.peer().expect("Peer was given."), 0);
    }
}

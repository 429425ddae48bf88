//! The post office itself, and its lifecycle.
//!

use network::{DeviceConfig, InterruptHandler, NetworkAddress, NetworkDevice};
use std::{
    future::Future,
    io,
    sync::{Arc, OnceLock},
};
use tokio::sync::{watch, Mutex, Notify};

use super::{InFlightSet, PostalSignals};
use crate::{Fatal, MailHeader, Mailbox, MailboxId, PostError, PostOfficeConfig};

/// A set of mailboxes on one machine, sharing one network device.
///
/// Mail arriving from the network is sorted into mailboxes by a delivery worker
/// that runs for as long as the post office exists. Callers send with
/// [`Self::send`] and [`Self::reliable_send`], and collect mail with
/// [`Self::receive`] and [`Self::reliable_receive`].
///
/// A [`PostOffice`] is always handled through an [`Arc`]; the worker and the
/// retransmission timers only hold weak references to it, so dropping the last
/// [`Arc`] shuts it down.
///
/// # Halting
///
/// Running out of retransmissions, or receiving a packet that cannot be mail,
/// halts the post office. The reason is kept, and every pending and future
/// operation fails with [`PostError::Halted`]. Nothing is recovered: a halted
/// post office is only good for dropping.
pub struct PostOffice {
    config: PostOfficeConfig,

    /// The network device; its interrupts are delivered to [`Self::signals`].
    pub(crate) device: Box<dyn NetworkDevice>,

    /// The mailboxes, indexed by [`MailboxId`].
    pub(crate) boxes: Vec<Mailbox>,

    pub(crate) signals: Arc<PostalSignals>,

    /// Held for the duration of one transmission, so that at most one packet is
    /// outstanding on the device. The guard is owned by a completion waiter, so a
    /// cancelled send still releases it only after the device is done.
    pub(crate) send_lock: Arc<Mutex<()>>,

    /// Reliably sent mail that has not been acknowledged.
    pub(crate) in_flight: InFlightSet,

    /// The reason this post office halted, once it has.
    halt: watch::Sender<Option<Fatal>>,

    /// The handle of the delivery worker.
    pub(crate) dispatcher_handle: OnceLock<tokio::task::JoinHandle<()>>,

    /// A flag to indicate if the delivery worker should terminate.
    pub(crate) _terminate_flag: Arc<Notify>,
}

impl PostOffice {
    /// Open a post office, connecting it to the network with `connect`.
    ///
    /// `connect` is handed the parameters of the device, and the handler its
    /// interrupts must be delivered to. For example, on a
    /// [`SimulatedNetwork`](network::SimulatedNetwork):
    ///
    /// ```no_run
    /// # async fn example() -> Result<(), postoffice::PostError> {
    /// use postoffice::network::SimulatedNetwork;
    /// use postoffice::{PostOffice, PostOfficeConfig};
    ///
    /// let network = SimulatedNetwork::new_arc();
    /// let office = PostOffice::open(PostOfficeConfig::new(0), |device, handler| {
    ///     network.attach(device, handler)
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// The delivery worker is spawned immediately, so this must be called from
    /// within a [`tokio`] runtime.
    pub fn open<D, F>(config: PostOfficeConfig, connect: F) -> Result<Arc<Self>, PostError>
    where
        D: NetworkDevice,
        F: FnOnce(DeviceConfig, Arc<dyn InterruptHandler>) -> io::Result<D>,
    {
        config.validate()?;

        let signals = PostalSignals::new_arc();
        let handler: Arc<dyn InterruptHandler> = signals.clone();
        let device = connect(config.device_config()?, handler)?;

        if device.max_packet_size() < config.max_mail_size + MailHeader::SIZE {
            return Err(PostError::InvalidConfig(format!(
                "The device of machine {} only carries {} bytes per packet.",
                device.address(),
                device.max_packet_size()
            )));
        }

        let boxes = (0..config.mailbox_count)
            .map(|id| Mailbox::new(id as MailboxId))
            .collect();

        logger::info!(
            "Opening post office on machine {} with {} mailboxes.",
            config.address,
            config.mailbox_count
        );

        let office = Arc::new(Self {
            config,
            device: Box::new(device),
            boxes,
            signals,
            send_lock: Arc::new(Mutex::new(())),
            in_flight: InFlightSet::new(),
            halt: watch::channel(None).0,
            dispatcher_handle: OnceLock::new(),
            _terminate_flag: Arc::new(Notify::new()),
        });

        office.start_delivery();

        Ok(office)
    }

    /// The network address of this machine.
    pub fn address(&self) -> NetworkAddress {
        self.config.address
    }

    pub fn config(&self) -> &PostOfficeConfig {
        &self.config
    }

    pub fn mailbox_count(&self) -> usize {
        self.boxes.len()
    }

    /// # Panics
    ///
    /// Panics if there is no mailbox `id`.
    pub(crate) fn mailbox(&self, id: MailboxId) -> &Mailbox {
        self.boxes.get(id as usize).unwrap_or_else(|| {
            panic!(
                "Mailbox {} does not exist; machine {} has {} mailboxes.",
                id,
                self.address(),
                self.boxes.len()
            )
        })
    }

    /// Panic unless mail with `header` and `length` payload bytes may be sent.
    pub(crate) fn check_outbound(&self, header: &MailHeader, length: usize) {
        assert!(
            length <= self.config.max_mail_size,
            "Mail of {} bytes exceeds the maximum mail size of {} bytes.",
            length,
            self.config.max_mail_size
        );
        assert!(
            (header.to as usize) < self.config.mailbox_count,
            "Destination mailbox {} is out of range; there are {} mailboxes.",
            header.to,
            self.config.mailbox_count
        );
    }

    /// A snapshot of whether mailbox `id` is empty.
    ///
    /// # Panics
    ///
    /// Panics if there is no mailbox `id`.
    pub fn mailbox_is_empty(&self, id: MailboxId) -> bool {
        self.mailbox(id).is_empty()
    }

    /// Number of reliably sent mails still awaiting an acknowledgement.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Halt the post office for `reason`.
    ///
    /// Only the first reason is kept; halting again changes nothing.
    pub(crate) fn halt(&self, reason: Fatal) {
        let first = self.halt.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason.clone());
                true
            } else {
                false
            }
        });

        if first {
            match reason {
                Fatal::Shutdown => {
                    logger::info!("Post office on machine {} shut down.", self.address())
                }
                _ => logger::error!("Post office on machine {} halted: {}", self.address(), reason),
            }
            self._terminate_flag.notify_one();
        }
    }

    /// Halt the post office, failing every pending operation with
    /// [`Fatal::Shutdown`].
    pub fn shutdown(&self) {
        self.halt(Fatal::Shutdown)
    }

    /// The reason this post office halted, if it has.
    pub fn fatal_error(&self) -> Option<Fatal> {
        self.halt.borrow().clone()
    }

    /// Wait for the post office to halt, and return the reason.
    pub async fn halted(&self) -> Fatal {
        let mut receiver = self.halt.subscribe();

        // The sender lives as long as `self`, so this only fails on teardown.
        if receiver.wait_for(Option::is_some).await.is_err() {
            return Fatal::Shutdown;
        }

        let reason = receiver.borrow().clone();
        reason.unwrap_or(Fatal::Shutdown)
    }

    /// Run `future` to completion, unless the post office halts first.
    pub(crate) async fn until_halted<T>(
        &self,
        future: impl Future<Output = T>,
    ) -> Result<T, PostError> {
        tokio::select! {
            biased;
            reason = self.halted() => Err(PostError::Halted(reason)),
            output = future => Ok(output),
        }
    }

    /// Check if the delivery worker has been started.
    pub fn is_delivering(&self) -> bool {
        self.dispatcher_handle.get().is_some()
    }
}

impl Drop for PostOffice {
    fn drop(&mut self) {
        logger::debug!("Drop triggered on the post office of machine {}.", self.address());
        self._terminate_flag.notify_one();
    }
}

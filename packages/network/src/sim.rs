//! An in-memory network for any number of machines within one process.
//!
//! Every [`SimulatedDevice`] is attached to a shared [`SimulatedNetwork`]. A packet
//! sent by one device is delivered to the device with the destination address,
//! unless the hub decides to drop it: either at random, with probability
//! `1 - reliability`, or because an installed drop filter asks it to.
//!
//! The hub keeps a log of every transmission and counts how often a device was
//! asked to send while its previous packet was still outstanding, which lets tests
//! observe the network from the outside.

use bytes::Bytes;
use deadqueue::unlimited::Queue;
use fxhash::FxHashMap;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use crate::{
    ignore_poison, logger, DeviceConfig, InterruptHandler, NetworkAddress, NetworkDevice,
    RouteHeader,
};

/// Decides whether a packet should be dropped, regardless of reliability.
pub type DropFilter = Box<dyn Fn(&RouteHeader, &[u8]) -> bool + Send + Sync>;

/// One packet as observed by the [`SimulatedNetwork`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transmission {
    pub route: RouteHeader,
    pub payload: Bytes,

    /// Whether the packet made it to the destination machine.
    pub delivered: bool,
}

/// The per-machine end of the hub.
struct Port {
    inbound: Queue<(RouteHeader, Bytes)>,
    handler: Arc<dyn InterruptHandler>,

    /// Set while a sent packet has not yet been confirmed to the handler.
    outstanding: AtomicBool,
}

/// The shared medium all [`SimulatedDevice`]s are attached to.
pub struct SimulatedNetwork {
    ports: RwLock<FxHashMap<NetworkAddress, Arc<Port>>>,
    rng: Mutex<StdRng>,
    latency: Duration,
    filter: RwLock<Option<DropFilter>>,
    log: Mutex<Vec<Transmission>>,
    overlaps: AtomicUsize,
}

impl Default for SimulatedNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedNetwork {
    /// Create a new network with an entropy-seeded drop decision and no latency.
    pub fn new() -> Self {
        Self {
            ports: RwLock::new(FxHashMap::default()),
            rng: Mutex::new(StdRng::from_entropy()),
            latency: Duration::ZERO,
            filter: RwLock::new(None),
            log: Mutex::new(Vec::new()),
            overlaps: AtomicUsize::new(0),
        }
    }

    /// Create a new network, and return the atomic reference to it.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seeds the random drop decisions, making a run reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Sets the time between a packet being sent and it arriving.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Install a filter that drops every packet it returns `true` for.
    ///
    /// This replaces any previously installed filter.
    pub fn set_drop_filter(&self, filter: impl Fn(&RouteHeader, &[u8]) -> bool + Send + Sync + 'static) {
        *self.filter.write().unwrap_or_else(ignore_poison!("drop filter")) = Some(Box::new(filter));
    }

    /// Remove the drop filter, if any.
    pub fn clear_drop_filter(&self) {
        *self.filter.write().unwrap_or_else(ignore_poison!("drop filter")) = None;
    }

    /// Attach a new device for the machine in `config`.
    ///
    /// Fails if a device with the same address is already attached.
    pub fn attach(
        self: &Arc<Self>,
        config: DeviceConfig,
        handler: Arc<dyn InterruptHandler>,
    ) -> io::Result<SimulatedDevice> {
        let mut ports = self.ports.write().unwrap_or_else(ignore_poison!("ports"));

        if ports.contains_key(&config.address) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("Machine {} is already attached to the network.", config.address),
            ));
        }

        let port = Arc::new(Port {
            inbound: Queue::new(),
            handler,
            outstanding: AtomicBool::new(false),
        });
        ports.insert(config.address, Arc::clone(&port));
        logger::debug!("Attached machine {} to the simulated network.", config.address);

        Ok(SimulatedDevice {
            network: Arc::clone(self),
            port,
            config,
        })
    }

    /// A snapshot of every packet sent so far, in sending order.
    pub fn transmissions(&self) -> Vec<Transmission> {
        self.log.lock().unwrap_or_else(ignore_poison!("log")).clone()
    }

    /// Number of times a device was asked to send before its previous packet
    /// completed.
    pub fn overlapping_sends(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn should_deliver(&self, route: &RouteHeader, payload: &[u8], reliability: f64) -> bool {
        let filtered = self
            .filter
            .read()
            .unwrap_or_else(ignore_poison!("drop filter"))
            .as_ref()
            .map(|filter| filter(route, payload))
            .unwrap_or(false);

        !filtered
            && self
                .rng
                .lock()
                .unwrap_or_else(ignore_poison!("rng"))
                .gen_bool(reliability)
    }

    fn transmit(&self, sender: &Arc<Port>, reliability: f64, route: RouteHeader, payload: Bytes) {
        if sender.outstanding.swap(true, Ordering::SeqCst) {
            logger::warn!(
                "Machine {} sent a packet while the previous one was outstanding.",
                route.from
            );
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        let delivered = self.should_deliver(&route, &payload, reliability);
        if !delivered {
            logger::debug!("Dropping packet {}.", route);
        }

        self.log
            .lock()
            .unwrap_or_else(ignore_poison!("log"))
            .push(Transmission {
                route,
                payload: payload.clone(),
                delivered,
            });

        let target = self
            .ports
            .read()
            .unwrap_or_else(ignore_poison!("ports"))
            .get(&route.to)
            .cloned();
        let sender = Arc::clone(sender);
        let latency = self.latency;

        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            match (delivered, target) {
                (true, Some(target)) => {
                    target.inbound.push((route, payload));
                    target.handler.packet_arrived();
                }
                (true, None) => {
                    logger::debug!("No machine {} on the network; packet lost.", route.to);
                }
                (false, _) => {}
            }

            sender.outstanding.store(false, Ordering::SeqCst);
            sender.handler.send_complete();
        });
    }
}

/// A device attached to a [`SimulatedNetwork`].
///
/// Dropping the device detaches the machine; packets addressed to it afterwards
/// are lost.
pub struct SimulatedDevice {
    network: Arc<SimulatedNetwork>,
    port: Arc<Port>,
    config: DeviceConfig,
}

impl NetworkDevice for SimulatedDevice {
    fn address(&self) -> NetworkAddress {
        self.config.address
    }

    fn max_packet_size(&self) -> usize {
        self.config.max_packet_size
    }

    fn send(&self, route: RouteHeader, payload: Bytes) {
        self.config.check_packet(&route, &payload);
        self.network
            .transmit(&self.port, self.config.reliability, route, payload);
    }

    fn receive(&self) -> Option<(RouteHeader, Bytes)> {
        self.port.inbound.try_pop()
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        logger::debug!("Detaching machine {} from the simulated network.", self.config.address);
        let mut ports = self
            .network
            .ports
            .write()
            .unwrap_or_else(ignore_poison!("ports"));

        if ports
            .get(&self.config.address)
            .is_some_and(|port| Arc::ptr_eq(port, &self.port))
        {
            ports.remove(&self.config.address);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::_tests::RecordingHandler;

    fn attach(
        network: &Arc<SimulatedNetwork>,
        address: NetworkAddress,
        reliability: f64,
    ) -> (SimulatedDevice, Arc<RecordingHandler>) {
        let handler = RecordingHandler::new_arc();
        let device = network
            .attach(
                DeviceConfig::new(address, reliability).expect("Valid config."),
                handler.clone(),
            )
            .expect("Failed to attach device.");
        (device, handler)
    }

    #[tokio::test]
    async fn delivers_to_destination() {
        let network = SimulatedNetwork::new_arc();
        let (alice, alice_events) = attach(&network, 0, 1.0);
        let (bob, bob_events) = attach(&network, 1, 1.0);

        let payload = Bytes::from_static(b"hello");
        alice.send(RouteHeader::new(0, 1, 5), payload.clone());

        alice_events.wait_for_send_complete().await;
        bob_events.wait_for_packet().await;

        assert_eq!(bob.receive(), Some((RouteHeader::new(0, 1, 5), payload)));
        assert_eq!(bob.receive(), None);
        assert_eq!(network.transmissions().len(), 1);
        assert_eq!(network.overlapping_sends(), 0);
    }

    #[tokio::test]
    async fn unreliable_network_drops_everything() {
        let network = Arc::new(SimulatedNetwork::new().with_seed(7));
        let (alice, alice_events) = attach(&network, 0, 0.0);
        let (bob, _bob_events) = attach(&network, 1, 1.0);

        for _ in 0..3 {
            alice.send(RouteHeader::new(0, 1, 1), Bytes::from_static(b"x"));
            // Completion is reported even though nothing was delivered.
            alice_events.wait_for_send_complete().await;
        }

        assert_eq!(bob.receive(), None);
        assert!(network.transmissions().iter().all(|t| !t.delivered));
    }

    #[tokio::test]
    async fn drop_filter() {
        let network = SimulatedNetwork::new_arc();
        let (alice, alice_events) = attach(&network, 0, 1.0);
        let (bob, bob_events) = attach(&network, 1, 1.0);

        network.set_drop_filter(|_, payload| payload == b"drop me");

        alice.send(RouteHeader::new(0, 1, 7), Bytes::from_static(b"drop me"));
        alice_events.wait_for_send_complete().await;
        alice.send(RouteHeader::new(0, 1, 4), Bytes::from_static(b"keep"));
        alice_events.wait_for_send_complete().await;
        bob_events.wait_for_packet().await;

        assert_eq!(
            bob.receive().map(|(_, payload)| payload),
            Some(Bytes::from_static(b"keep"))
        );

        network.clear_drop_filter();
        alice.send(RouteHeader::new(0, 1, 7), Bytes::from_static(b"drop me"));
        bob_events.wait_for_packet().await;
        assert!(bob.receive().is_some());
    }

    #[tokio::test]
    async fn duplicate_address() {
        let network = SimulatedNetwork::new_arc();
        let (_alice, _) = attach(&network, 0, 1.0);

        let result = network.attach(
            DeviceConfig::new(0, 1.0).expect("Valid config."),
            RecordingHandler::new_arc(),
        );
        assert!(matches!(result, Err(err) if err.kind() == io::ErrorKind::AddrInUse));
    }

    #[tokio::test]
    async fn detach_on_drop() {
        let network = SimulatedNetwork::new_arc();
        let (alice, _) = attach(&network, 0, 1.0);
        drop(alice);

        assert!(network
            .attach(DeviceConfig::new(0, 1.0).expect("Valid config."), RecordingHandler::new_arc())
            .is_ok());
    }

    #[tokio::test]
    async fn overlapping_sends_are_counted() {
        let network = Arc::new(SimulatedNetwork::new().with_latency(Duration::from_millis(20)));
        let (alice, alice_events) = attach(&network, 0, 1.0);
        let (_bob, _) = attach(&network, 1, 1.0);

        alice.send(RouteHeader::new(0, 1, 1), Bytes::from_static(b"a"));
        alice.send(RouteHeader::new(0, 1, 1), Bytes::from_static(b"b"));

        alice_events.wait_for_send_complete().await;
        assert_eq!(network.overlapping_sends(), 1);
    }
}

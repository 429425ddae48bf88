//! A network device backed by loopback UDP sockets.
//!
//! Machine `n` listens on `127.0.0.1:(base_port + n)`. Every datagram carries the
//! encoded [`RouteHeader`] followed by the payload. Like the simulated network,
//! outbound packets are dropped with probability `1 - reliability` before they
//! ever reach the socket.

use bytes::{Bytes, BytesMut};
use deadqueue::unlimited::Queue;
use rand::Rng;
use std::{io, sync::Arc, time::Duration};

use crate::{
    logger,
    socket::{create_udp, machine_socket_addr, receive_datagram, send_datagram, AsyncSocket},
    DeviceConfig, InterruptHandler, NetworkAddress, NetworkDevice, RouteHeader,
};

/// The default port for machine `0`.
pub const DEFAULT_BASE_PORT: u16 = 40000;

/// How long the listener pauses after a transient receive error.
const RECEIVE_BACKOFF: Duration = Duration::from_millis(10);

/// Creates [`UdpDevice`]s sharing the same port layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpNetwork {
    base_port: u16,
}

impl Default for UdpNetwork {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_PORT)
    }
}

impl UdpNetwork {
    pub fn new(base_port: u16) -> Self {
        Self { base_port }
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Bind the socket for the machine in `config` and start listening on it.
    ///
    /// This must be called from within a [`tokio`] runtime.
    pub fn attach(
        &self,
        config: DeviceConfig,
        handler: Arc<dyn InterruptHandler>,
    ) -> io::Result<UdpDevice> {
        let local_addr = machine_socket_addr(self.base_port, config.address)?;
        let socket = Arc::new(create_udp(&local_addr)?);
        let inbound = Arc::new(Queue::new());

        logger::info!("Machine {} listening on {}.", config.address, local_addr);

        let listener_handle = tokio::spawn(listen(
            Arc::clone(&socket),
            Arc::clone(&inbound),
            Arc::clone(&handler),
            config,
        ));

        Ok(UdpDevice {
            network: *self,
            config,
            socket,
            inbound,
            handler,
            listener_handle,
        })
    }
}

/// Errors after which the socket can still be received from.
///
/// On some platforms an ICMP port unreachable, caused by an earlier send to a
/// machine that is not listening, is reported by the next receive.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

/// Receive datagrams until the task is aborted or the socket fails, queueing
/// every valid packet.
async fn listen(
    socket: Arc<AsyncSocket>,
    inbound: Arc<Queue<(RouteHeader, Bytes)>>,
    handler: Arc<dyn InterruptHandler>,
    config: DeviceConfig,
) {
    let frame_size = RouteHeader::SIZE + config.max_packet_size;

    loop {
        let datagram = match receive_datagram(&socket, frame_size).await {
            Ok((datagram, _from)) => Bytes::from(datagram),
            Err(err) if is_transient(&err) => {
                logger::warn!("Machine {} failed to receive: {}", config.address, err);
                tokio::time::sleep(RECEIVE_BACKOFF).await;
                continue;
            }
            Err(err) => {
                logger::error!(
                    "Machine {} stopped listening after a receive error: {}",
                    config.address,
                    err
                );
                break;
            }
        };

        let mut frame = datagram.clone();
        let Some(route) = RouteHeader::read(&mut frame) else {
            logger::warn!("Discarding runt datagram of {} bytes.", datagram.len());
            continue;
        };

        if route.to != config.address || route.length as usize != frame.len() {
            logger::warn!("Discarding malformed packet {}.", route);
            continue;
        }

        inbound.push((route, frame));
        handler.packet_arrived();
    }
}

/// A device attached to a [`UdpNetwork`].
pub struct UdpDevice {
    network: UdpNetwork,
    config: DeviceConfig,
    socket: Arc<AsyncSocket>,
    inbound: Arc<Queue<(RouteHeader, Bytes)>>,
    handler: Arc<dyn InterruptHandler>,
    listener_handle: tokio::task::JoinHandle<()>,
}

impl NetworkDevice for UdpDevice {
    fn address(&self) -> NetworkAddress {
        self.config.address
    }

    fn max_packet_size(&self) -> usize {
        self.config.max_packet_size
    }

    fn send(&self, route: RouteHeader, payload: Bytes) {
        self.config.check_packet(&route, &payload);

        let deliver = rand::thread_rng().gen_bool(self.config.reliability);
        let socket = Arc::clone(&self.socket);
        let handler = Arc::clone(&self.handler);
        let destination = machine_socket_addr(self.network.base_port, route.to);

        tokio::spawn(async move {
            if deliver {
                let mut frame = BytesMut::with_capacity(RouteHeader::SIZE + payload.len());
                route.write(&mut frame);
                frame.extend_from_slice(&payload);

                let sent = match destination {
                    Ok(addr) => send_datagram(&socket, &addr, &frame).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = sent {
                    logger::warn!("Failed to send packet {}: {}", route, err);
                }
            } else {
                logger::debug!("Dropping packet {}.", route);
            }

            handler.send_complete();
        });
    }

    fn receive(&self) -> Option<(RouteHeader, Bytes)> {
        self.inbound.try_pop()
    }
}

impl Drop for UdpDevice {
    fn drop(&mut self) {
        logger::debug!("Closing UDP device for machine {}.", self.config.address);
        self.listener_handle.abort();
    }
}

/// Do not run these tests in CI.
#[cfg(all(test, not(feature = "ci_tests")))]
mod test {
    use super::*;
    use crate::_tests::{RecordingHandler, BASE_PORT};
    use serial_test::serial;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn exchange_packets() {
        let network = UdpNetwork::new(BASE_PORT + 10);

        let alice_events = RecordingHandler::new_arc();
        let alice = network
            .attach(DeviceConfig::new(0, 1.0).expect("Valid config."), alice_events.clone())
            .expect("Failed to attach machine 0.");

        let bob_events = RecordingHandler::new_arc();
        let bob = network
            .attach(DeviceConfig::new(1, 1.0).expect("Valid config."), bob_events.clone())
            .expect("Failed to attach machine 1.");

        let payload = Bytes::from_static(b"Hello there!");
        alice.send(RouteHeader::new(0, 1, payload.len() as u32), payload.clone());

        alice_events.wait_for_send_complete().await;
        bob_events.wait_for_packet().await;

        assert_eq!(
            bob.receive(),
            Some((RouteHeader::new(0, 1, payload.len() as u32), payload))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn unreliable_device_still_completes() {
        let network = UdpNetwork::new(BASE_PORT + 20);
        let events = RecordingHandler::new_arc();
        let device = network
            .attach(DeviceConfig::new(0, 0.0).expect("Valid config."), events.clone())
            .expect("Failed to attach machine 0.");

        device.send(RouteHeader::new(0, 0, 1), Bytes::from_static(b"x"));
        events.wait_for_send_complete().await;

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert_eq!(device.receive(), None);
    }
}

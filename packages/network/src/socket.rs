//! Unified interface for the creation of loopback UDP sockets.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::{build_error, logger, NetworkAddress};

/// The async socket type used in this crate.
pub use tokio_socket2::TokioSocket2 as AsyncSocket;

/// The loopback socket address of a machine, given the port of machine `0`.
pub fn machine_socket_addr(base_port: u16, address: NetworkAddress) -> io::Result<SocketAddr> {
    u16::try_from(address)
        .ok()
        .and_then(|offset| base_port.checked_add(offset))
        .map(|port| SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
        .ok_or_else(|| {
            build_error(&format!(
                "Machine {address} does not fit above base port {base_port}."
            ))
        })
}

/// A helper function to describe a [`SockAddr`].
pub fn describe_sock_addr(sock_addr: &SockAddr) -> String {
    sock_addr
        .as_socket()
        .map(|sock_addr| sock_addr.to_string())
        .unwrap_or_else(|| "(Unknown source)".to_owned())
}

/// Create a non-blocking UDP socket bound to the given address.
pub fn create_udp(addr: &SocketAddr) -> io::Result<AsyncSocket> {
    let domain = Domain::for_address(*addr);

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(*addr))?;

    AsyncSocket::new(socket)
}

/// A helper function to send one datagram.
pub async fn send_datagram(
    asocket: &AsyncSocket,
    addr: &SocketAddr,
    data: &[u8],
) -> io::Result<usize> {
    logger::trace!("Sending {} bytes to {}.", data.len(), addr);
    asocket
        .write(|socket| socket.send_to(data, &SockAddr::from(*addr)))
        .await
}

/// A helper function to receive one datagram of at most `buffer_size` bytes.
pub async fn receive_datagram(
    asocket: &AsyncSocket,
    buffer_size: usize,
) -> io::Result<(Vec<u8>, SockAddr)> {
    let mut inner_buffer = vec![core::mem::MaybeUninit::uninit(); buffer_size];
    let result = asocket
        .read(|socket| socket.recv_from(&mut inner_buffer))
        .await;

    result.map(|(size, addr)| {
        logger::trace!("Received {} bytes from {}.", size, describe_sock_addr(&addr));

        // Only take the initialized part of the buffer.
        (
            (0..size)
                .map(|i| unsafe { inner_buffer[i].assume_init() })
                .collect::<Vec<_>>(),
            addr,
        )
    })
}

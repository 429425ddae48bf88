//! Two post offices talking over loopback UDP.
//!
//! These bind real ports, so they do not run in CI.
#![cfg(not(feature = "ci_tests"))]

use bytes::BytesMut;
use postoffice::{
    network::{RouteHeader, UdpNetwork},
    MailHeader, PostOffice, PostOfficeConfig,
};
use serial_test::serial;
use std::{sync::Arc, time::Duration};

const BASE_PORT: u16 = 47300;

const TIMEOUT: Duration = Duration::from_secs(5);

fn open(network: UdpNetwork, address: u32) -> Arc<PostOffice> {
    let config = PostOfficeConfig::new(address).with_retransmit_delay(Duration::from_millis(100));
    PostOffice::open(config, |device, handler| network.attach(device, handler))
        .expect("Failed to open post office.")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn send_and_reply() {
    let network = UdpNetwork::new(BASE_PORT);
    let a = open(network, 0);
    let b = open(network, 1);

    a.send(RouteHeader::to(1), MailHeader::new(1, 0), b"Hello there!")
        .await
        .expect("Failed to send.");

    let mail = tokio::time::timeout(TIMEOUT, b.receive(0))
        .await
        .expect("Mail did not arrive.")
        .expect("Failed to receive.");
    assert_eq!(&mail.payload[..], b"Hello there!");
    assert_eq!((mail.route.from, mail.header.from), (0, 1));

    b.send(mail.route.reply(), mail.header.reply(), b"Got it!")
        .await
        .expect("Failed to reply.");

    let reply = tokio::time::timeout(TIMEOUT, a.receive(1))
        .await
        .expect("Reply did not arrive.")
        .expect("Failed to receive.");
    assert_eq!(&reply.payload[..], b"Got it!");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn reliable_message() {
    let network = UdpNetwork::new(BASE_PORT + 10);
    let a = open(network, 0);
    let b = open(network, 1);

    let data: Vec<u8> = (0..=255).collect();

    let receiving = {
        let b = Arc::clone(&b);
        tokio::spawn(async move {
            let mut accumulator = BytesMut::new();
            b.reliable_receive(0, &mut accumulator).await.map(|_| accumulator)
        })
    };

    tokio::time::timeout(TIMEOUT, a.reliable_send(RouteHeader::to(1), MailHeader::new(1, 0), &data))
        .await
        .expect("Reliable send did not complete.")
        .expect("Failed to send reliably.");

    let message = tokio::time::timeout(TIMEOUT, receiving)
        .await
        .expect("Reliable receive did not complete.")
        .expect("Task panicked.")
        .expect("Failed to receive reliably.");
    assert_eq!(&message[..], &data[..]);
}

//! Exchange a message between two machines over loopback UDP.
//!
//! Start the receiving machine first, then the sender:
//!
//! ```text
//! nettest -m 0 --mode receive
//! nettest -m 1 -o 0 --mode send --message "Hello there!"
//! ```
//!
//! With `--reliability` below `1`, packets are dropped at random; the
//! `reliable-send` and `reliable-receive` modes get the message through anyway,
//! or exit with an error once the network is declared broken.

use bytes::BytesMut;
use clap::Parser;
use std::sync::Arc;

use postoffice::{
    network::{RouteHeader, UdpNetwork},
    CliArgs, MailHeader, Mode, PostError, PostOffice, ACKNOWLEDGEMENT,
};

/// The mailbox messages are sent to.
const INBOX: u32 = 0;

/// The mailbox replies are sent to.
const REPLY_BOX: u32 = 1;

async fn run(office: Arc<PostOffice>, args: &CliArgs) -> Result<(), PostError> {
    match args.mode {
        Mode::Send => {
            let peer = args.peer()?;
            office
                .send(
                    RouteHeader::to(peer),
                    MailHeader::new(REPLY_BOX, INBOX),
                    args.message.as_bytes(),
                )
                .await?;

            let reply = office.receive(REPLY_BOX).await?;
            println!(
                "Got \"{}\" from {}, box {}",
                String::from_utf8_lossy(&reply.payload),
                reply.route.from,
                reply.header.from
            );
        }
        Mode::Receive => {
            let mail = office.receive(INBOX).await?;
            println!(
                "Got \"{}\" from {}, box {}",
                String::from_utf8_lossy(&mail.payload),
                mail.route.from,
                mail.header.from
            );

            office
                .send(mail.route.reply(), mail.header.reply(), ACKNOWLEDGEMENT)
                .await?;
        }
        Mode::ReliableSend => {
            let peer = args.peer()?;
            office
                .reliable_send(
                    RouteHeader::to(peer),
                    MailHeader::new(REPLY_BOX, INBOX),
                    args.message.as_bytes(),
                )
                .await?;
            println!("Message of {} bytes acknowledged by {}.", args.message.len(), peer);
        }
        Mode::ReliableReceive => {
            let mut message = BytesMut::new();
            let mail = office.reliable_receive(INBOX, &mut message).await?;
            println!(
                "Got \"{}\" from {}, box {}",
                String::from_utf8_lossy(&message),
                mail.route.from,
                mail.header.from
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), PostError> {
    let args = CliArgs::parse();
    let config = args.post_office_config()?;
    let network = UdpNetwork::new(args.base_port);

    let office = PostOffice::open(config, |device, handler| network.attach(device, handler))?;

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("SIGTERM received, gracefully shutting down.");
            office.shutdown();
            Ok(())
        },
        reason = office.halted() => {
            Err(PostError::Halted(reason))
        },
        result = run(Arc::clone(&office), &args) => result,
    };

    if let Err(err) = &result {
        eprintln!("{err}");
        std::process::exit(1);
    }

    // Give the last packet, usually an acknowledgement, time to leave the socket.
    tokio::time::sleep(office.config().retransmit_delay()).await;

    result
}

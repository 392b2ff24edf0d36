//! A minimal client session against a running node:
//!
//! ```text
//! cargo run --example hello -- 127.0.0.1:3478 alice [bob]
//! ```
//!
//! Logs in as the given identifier and, when a peer name is passed, calls
//! them and sends a greeting. Received messages are printed until the
//! process is stopped.

use std::{net::Ipv4Addr, thread, time::Duration};

use dim_node_sdk::{Client, ClientOptions, discover};

fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Info)?;

    let mut args = std::env::args().skip(1);
    let server = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: hello <server> <identifier> [peer]"))?
        .parse()?;
    let identifier = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: hello <server> <identifier> [peer]"))?;
    let peer = args.next();

    println!("reflexive address: {:?}", discover(server)?);

    let client = Client::start(ClientOptions {
        bind: (Ipv4Addr::UNSPECIFIED, 0).into(),
        secret: std::env::var("DIM_SECRET").ok(),
        identifier: identifier.clone(),
        server,
    })?;

    client.login();
    while !client.is_logged_in() {
        thread::sleep(Duration::from_millis(100));
    }

    println!("logged in as {:?}, mapped to {:?}", identifier, client.mapped());

    if let Some(peer) = &peer {
        client.call(peer);
        thread::sleep(Duration::from_secs(1));
        client.send_text(peer, &format!("hello from {}", identifier))?;
    }

    loop {
        while let Some(envelope) = client.poll_inbox() {
            println!(
                "{}: {}",
                envelope.sender,
                String::from_utf8_lossy(&envelope.content)
            );
        }

        thread::sleep(Duration::from_millis(100));
    }
}

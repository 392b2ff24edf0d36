pub mod config;
pub mod server;

use self::{config::Config, server::Server};

use std::{
    net::SocketAddr,
    sync::{Arc, Weak},
    time::Duration,
};

use anyhow::Result;
use service::{
    HubHandler, PeerHandler, SignatureProvider,
    directory::Directory,
    hub::{Hub, HubOptions},
    peer::{Peer, PeerOptions},
    pool::MemoryPool,
    signer::HmacSigner,
};

#[rustfmt::skip]
static SOFTWARE: &str = concat!(
    "dim-node.",
    env!("CARGO_PKG_VERSION")
);

/// One running node: the socket hub, the reliability engine and the
/// contact directory, wired together through the [`Server`] handler.
///
/// Everything is scoped to this object. Dropping it stops the peer loop,
/// closes the hub and releases the workers in reverse construction order;
/// integration tests start nodes the same way the binary does.
pub struct Node {
    pub hub: Arc<Hub>,
    pub peer: Arc<Peer>,
    pub directory: Arc<Directory>,
    // The hub and peer only hold the handler weakly; this keeps it alive.
    _server: Arc<Server>,
}

impl Node {
    pub fn start(config: Arc<Config>) -> Result<Self> {
        let signer: Arc<dyn SignatureProvider> = Arc::new(match &config.auth.secret {
            Some(secret) => HmacSigner::new(secret.as_bytes()),
            None => {
                log::warn!("no signing secret configured, using a throwaway key");
                HmacSigner::random()
            }
        });

        let directory = Arc::new(Directory::new(signer));
        let hub = Hub::new(HubOptions {
            bind: config.transport.bind,
            ping_interval: Duration::from_secs(config.transport.ping_interval),
            ..HubOptions::default()
        })?;

        let peer = Peer::new(PeerOptions::default(), Arc::new(MemoryPool::default()));
        let server = Server::new(config, hub.clone(), peer.clone(), directory.clone());

        hub.set_handler(Arc::downgrade(&server) as Weak<dyn HubHandler>);
        peer.set_handler(Arc::downgrade(&server) as Weak<dyn PeerHandler>);

        log::info!("node is running: addr={:?}", hub.local_addr());
        Ok(Self {
            hub,
            peer,
            directory,
            _server: server,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.hub.local_addr()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.peer.stop();
        self.hub.close();
    }
}

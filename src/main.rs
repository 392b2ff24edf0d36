#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use dim_node::{Node, config::Config};

fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);
    simple_logger::init_with_level(config.log.level.as_level())?;

    let _node = Node::start(config)?;

    // The node runs entirely on its worker threads; the main thread only
    // keeps the process alive.
    loop {
        std::thread::park();
    }
}

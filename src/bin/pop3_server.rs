use std::net::SocketAddr;
use std::sync::Arc;

use postman::config::Config;
use postman_pop3::Session;
use postman_store::{SledStore, UserStore};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let port: u16 = match std::env::args().nth(1).and_then(|arg| arg.parse().ok()) {
        Some(port) => port,
        None => {
            eprintln!("Invalid arguments. Expected: pop3-server <port>");
            std::process::exit(1);
        }
    };

    let config = Config::load().map_err(|err| {
        log::error!("failed to load config: {:#}", err);
        err
    })?;
    log::set_max_level(config.log_level.parse().unwrap_or(log::LevelFilter::Info));

    let store: Arc<dyn UserStore> = Arc::new(SledStore::open(&config.data_dir).map_err(|err| {
        log::error!("failed to open mail store at {}: {:#}", config.data_dir.display(), err);
        err
    })?);

    let bind_addr = SocketAddr::new(config.pop3_addr.ip(), port);
    let listener = TcpListener::bind(bind_addr).await.map_err(|err| {
        log::error!("failed to bind pop3 listener on {}: {:#}", bind_addr, err);
        err
    })?;
    log::info!("postman pop3 server listening on {}", bind_addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        let store = store.clone();
        tokio::spawn(async move {
            log::info!("accepted pop3 connection from {}", peer);
            let session = Session::new(stream, store);
            if let Err(err) = session.run().await {
                log::warn!("pop3 session with {} ended with error: {}", peer, err);
            }
        });
    }
}

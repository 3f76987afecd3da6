use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use partogram::api::{AppContext, RestApi};
use partogram::config::load_config;
use partogram::storage::{Persistence, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config(Path::new("config.yaml"))?;
    info!(path = %config.storage.path, "iniciando partogram");

    let persistence = Persistence::new(&config.storage.path)?;
    let store = match persistence.load()? {
        Some(tables) => {
            info!("snapshot cargado");
            Store::from_tables(tables)
        }
        None => Store::new(),
    };

    let host: IpAddr = config.api.host.parse()?;
    let port = config.api.port;
    let ctx = Arc::new(AppContext::new(config, store, Some(persistence)));
    let api = RestApi::new(Arc::clone(&ctx));
    let routes = api.routes();

    let addr = SocketAddr::new(host, port);
    info!(%addr, "escuchando");

    // Channel for the shutdown signal
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async move {
        shutdown_rx.await.ok();
        info!("apagando el servidor");
    });

    let server_handle = tokio::spawn(server);

    signal::ctrl_c().await?;
    info!("ctrl-c recibido, iniciando apagado ordenado");

    shutdown_tx.send(()).ok();
    server_handle.await?;

    // Flush a final snapshot before exiting
    if let Err(e) = ctx.snapshot_final() {
        error!(error = %e, "no se pudo guardar el snapshot final");
    } else {
        info!("snapshot final guardado");
    }

    info!("apagado completo");
    Ok(())
}

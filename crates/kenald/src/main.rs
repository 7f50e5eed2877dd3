use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::Config;
use dbus_interface::KenalService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("kenald starting");

    let config = Config::from_env();
    tracing::info!(
        data_dir = %config.data_dir.display(),
        model = %config.detector_model_path(),
        threshold = config.match_threshold,
        "configuration loaded"
    );

    let engine = engine::spawn_engine(&config)?;

    let _connection = zbus::connection::Builder::session()?
        .name("org.kenal.Kenal1")?
        .serve_at("/org/kenal/Kenal1", KenalService::new(engine))?
        .build()
        .await?;

    tracing::info!("kenald ready on org.kenal.Kenal1");

    tokio::signal::ctrl_c().await?;
    tracing::info!("kenald shutting down");

    Ok(())
}

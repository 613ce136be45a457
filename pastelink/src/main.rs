mod cui;
mod settings;
mod tracing_helper;

use anyhow::Result;
use tracing::warn;

const SETTINGS_FILE: &str = concat!(env!("CARGO_PKG_NAME"), ".toml");

#[tokio::main]
async fn main() -> Result<()> {
    let loaded = settings::load(SETTINGS_FILE).await;
    let settings = loaded.as_ref().cloned().unwrap_or_default();
    tracing_helper::init_tracing(
        &settings.log_dir,
        concat!(env!("CARGO_PKG_NAME"), ".log"),
        true,
    )?;
    if let Err(err) = loaded {
        warn!("{:#}, using defaults", err);
    }
    cui::main_menu(&settings).await?;
    Ok(())
}

use std::path::PathBuf;

use guild_jukebox::settings::{Settings, SETTINGS_ENV};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::var_os(SETTINGS_ENV).map(PathBuf::from);
    let (settings, load_error) = match &path {
        Some(path) => match Settings::load(path) {
            Ok(settings) => (settings, None),
            Err(err) => (Settings::default(), Some(err)),
        },
        None => (Settings::default(), None),
    };

    guild_jukebox::init_tracing(&settings);
    match (&path, load_error) {
        (Some(path), Some(err)) => {
            warn!(path = %path.display(), error = %format!("{err:#}"), "using default settings")
        }
        (Some(path), None) => info!(path = %path.display(), "loaded settings"),
        _ => {}
    }

    guild_jukebox::run(settings).await
}

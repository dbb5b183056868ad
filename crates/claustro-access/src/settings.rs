//! Bootstrap helpers: configuration loading and tracing init.

use std::path::Path;

use anyhow::Context as _;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use claustro_core::settings::DirectorySettings;

/// Load [`DirectorySettings`] from a TOML file (optional) with `CLAUSTRO_*`
/// environment overrides on top.
pub fn load_settings(path: &Path) -> anyhow::Result<DirectorySettings> {
  let settings = config::Config::builder()
    .add_source(config::File::from(path.to_path_buf()).required(false))
    .add_source(config::Environment::with_prefix("CLAUSTRO"))
    .build()
    .context("failed to read config file")?;

  settings
    .try_deserialize()
    .context("failed to deserialise DirectorySettings")
}

/// Initialise tracing for a binary or integration harness. `RUST_LOG`
/// overrides the default info level.
pub fn init_tracing() {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();
}

//! Configuration loading.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults (`Settings::default()`)
//! 2. `config/default.{toml,yaml,json}` if present
//! 3. environment variables `QUEUEBUS__<SECTION>__<KEY>`, after a `.env`
//!    file (if any) has been loaded into the environment

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    AdapterSettings, BrokerSettings, LoggingSettings, RelaySettings, Settings, TransportSettings,
};

pub const ENV_PREFIX: &str = "QUEUEBUS";

pub fn load_config() -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();
    load_from("config/default")
}

/// Load with `file` (extension optional) as the file layer.
pub fn load_from(file: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(file).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    Ok(partial.merge_over(Settings::default()))
}

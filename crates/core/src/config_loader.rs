use crate::config::AppConfig;
use crate::error::EngineError;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads application configuration by merging TOML and environment variables.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the files cannot be parsed or a value
    /// fails range validation.
    pub fn load() -> Result<AppConfig, EngineError> {
        Self::load_from("config/Config.toml")
    }

    /// Loads configuration from a specific TOML path.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the files cannot be parsed or a value
    /// fails range validation.
    pub fn load_from(path: &str) -> Result<AppConfig, EngineError> {
        let config: AppConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("APP_").split("__"))
            .extract()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;

        config.validate().map_err(EngineError::Configuration)?;

        Ok(config)
    }
}

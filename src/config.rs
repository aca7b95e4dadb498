use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub model_path: String,
    pub media_root: String,
}

impl Settings {
    /// Layered configuration: built-in defaults, then an optional
    /// `default.config.toml`, then `DR_*` environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("host", "127.0.0.1")?
            .set_default("port", 8080)?
            .set_default("log_level", "info")?
            .set_default("model_path", "model.onnx")?
            .set_default("media_root", "media")?
            .add_source(config::File::with_name("default.config").required(false))
            .add_source(config::Environment::with_prefix("DR"))
            .build()?
            .try_deserialize()
    }
}

pub mod chains;
pub mod settings;

pub use chains::{load_gateway_config, ChainConfig, ConfigError};
pub use settings::Settings;

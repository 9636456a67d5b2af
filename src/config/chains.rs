use serde::{Deserialize, Serialize};

use super::settings::Settings;

/// Static per-chain configuration (spec.md §3 "Chain config").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub display_name: String,
    pub registry_url: String,
    pub base_prefix: String,
    pub archive_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GatewayFile {
    #[serde(default)]
    settings: Option<Settings>,
    chains: Vec<ChainConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Load chain list + tunables from a JSON file, substituting `${VAR}`
/// environment-variable references before parsing — the same two-step
/// (substitute, then `serde_json::from_str`) the teacher's
/// `services::rpc::config::load_rpc_config` uses.
pub fn load_gateway_config(path: &str) -> Result<(Vec<ChainConfig>, Settings), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    let content = substitute_env_vars(&content);
    let file: GatewayFile =
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
    let settings = file.settings.unwrap_or_default().apply_env_overrides();
    Ok((file.chains, settings))
}

fn substitute_env_vars(content: &str) -> String {
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

pub mod types;

pub use types::{AuthConfig, Config, RegistryEndpoints};

use std::env;
use std::fs;
use std::path::PathBuf;

const CONFIG_FILE_NAME: &str = ".provena.toml";

/// Get the global config file path (~/.provena.toml)
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(CONFIG_FILE_NAME))
}

/// Load configuration: defaults, then the global config file, then
/// environment variable overrides.
///
/// A missing or malformed config file is not fatal; it falls back to the
/// defaults with a warning.
pub fn load_config() -> Config {
    let mut config = read_global_config().unwrap_or_default();
    apply_env_overrides(&mut config);
    config
}

fn read_global_config() -> Option<Config> {
    let path = global_config_path()?;
    if !path.exists() {
        return None;
    }
    let content = fs::read_to_string(&path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("Ignoring malformed config at {}: {}", path.display(), e);
            None
        }
    }
}

fn apply_env_overrides(config: &mut Config) {
    let mut domain_changed = false;
    if let Ok(domain) = env::var("PROVENA_DOMAIN") {
        config.auth.domain = domain;
        domain_changed = true;
    }
    if let Ok(realm) = env::var("PROVENA_REALM") {
        config.auth.realm = realm;
    }
    if let Ok(client_id) = env::var("PROVENA_CLIENT_ID") {
        config.auth.client_id = client_id;
    }

    // A domain override re-derives every endpoint before the per-endpoint
    // overrides are applied on top.
    if domain_changed {
        config.registry = RegistryEndpoints::for_domain(&config.auth.domain);
    }
    if let Ok(url) = env::var("REGISTRY_API") {
        config.registry.registry_api = url;
    }
    if let Ok(url) = env::var("DATASTORE_API") {
        config.registry.datastore_api = url;
    }
    if let Ok(url) = env::var("PROV_API") {
        config.registry.prov_api = url;
    }
    if let Ok(url) = env::var("SEARCH_API") {
        config.registry.search_api = url;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides_rederive_endpoints() {
        let mut config = Config::default();
        config.auth.domain = "prov.example.org".to_string();
        config.registry = RegistryEndpoints::for_domain(&config.auth.domain);
        assert!(config.registry.registry_api.contains("prov.example.org"));
    }

    #[test]
    fn test_default_config_parses_roundtrip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.auth.realm, config.auth.realm);
        assert_eq!(parsed.registry.search_api, config.registry.search_api);
    }
}

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub registry: RegistryEndpoints,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            registry: RegistryEndpoints::default(),
        }
    }
}

/// Authorization server (Keycloak realm) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Deployment domain, e.g. `dev.example-provena.org`
    pub domain: String,
    /// Keycloak realm name
    pub realm: String,
    /// Public OAuth client id registered for this connector
    pub client_id: String,
    /// Scopes requested at login
    pub scope: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            domain: "dev.rrap-is.com".to_string(),
            realm: "rrap".to_string(),
            client_id: "provena-cli".to_string(),
            scope: "openid profile email offline_access".to_string(),
        }
    }
}

impl AuthConfig {
    fn realm_base(&self) -> String {
        format!(
            "https://auth.{}/auth/realms/{}/protocol/openid-connect",
            self.domain, self.realm
        )
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/auth", self.realm_base())
    }

    pub fn token_url(&self) -> String {
        format!("{}/token", self.realm_base())
    }

    pub fn revoke_url(&self) -> String {
        format!("{}/revoke", self.realm_base())
    }
}

/// Per-service API endpoints for a deployment
///
/// Defaults follow the standard host layout derived from the deployment
/// domain; each endpoint can be overridden individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEndpoints {
    pub registry_api: String,
    pub datastore_api: String,
    pub prov_api: String,
    pub search_api: String,
}

impl Default for RegistryEndpoints {
    fn default() -> Self {
        Self::for_domain(&AuthConfig::default().domain)
    }
}

impl RegistryEndpoints {
    pub fn for_domain(domain: &str) -> Self {
        Self {
            registry_api: format!("https://registry-api.{}", domain),
            datastore_api: format!("https://data-api.{}", domain),
            prov_api: format!("https://prov-api.{}", domain),
            search_api: format!("https://search.{}", domain),
        }
    }
}

use actix_web::cookie::SameSite;

use crate::error::ConfigError;

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub cors: CorsSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Which storage backend holds users, sessions, tokens and events
#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub backend: StoreBackend,
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    /// Server-level connection, used to create throwaway test databases
    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// Access and refresh credential settings
#[derive(serde::Deserialize, Clone, Debug)]
pub struct JwtSettings {
    pub secret: String,
    #[serde(default = "default_access_expiry")]
    pub access_token_expiry: i64, // seconds
    #[serde(default = "default_refresh_expiry")]
    pub refresh_token_expiry: i64, // seconds
    pub issuer: String,
    pub audience: String,
}

fn default_access_expiry() -> i64 {
    15 * 60
}

fn default_refresh_expiry() -> i64 {
    14 * 24 * 60 * 60
}

/// How the refresh credential travels between client and server
#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Cookie,
    Header,
}

#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    #[default]
    Strict,
    Lax,
    None,
}

impl From<SameSitePolicy> for SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        match policy {
            SameSitePolicy::Strict => SameSite::Strict,
            SameSitePolicy::Lax => SameSite::Lax,
            SameSitePolicy::None => SameSite::None,
        }
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct TransportSettings {
    pub mode: TransportMode,
    pub same_site: SameSitePolicy,
    pub cookie_name: String,
    pub cookie_path: String,
    pub header_name: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            mode: TransportMode::Cookie,
            same_site: SameSitePolicy::Strict,
            cookie_name: "refresh_token".to_string(),
            cookie_path: "/auth".to_string(),
            header_name: "X-Refresh-Token".to_string(),
        }
    }
}

#[derive(serde::Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct CorsSettings {
    /// Empty means same-origin only
    pub allowed_origins: Vec<String>,
    pub exposed_headers: Vec<String>,
}

#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct StoreSettings {
    pub timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { timeout_ms: 2000 }
    }
}

impl StoreSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

impl Settings {
    /// Reject values that would make the service insecure or unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidValue(
                "jwt.secret must be at least 32 bytes".to_string(),
            ));
        }
        if self.jwt.access_token_expiry <= 0 || self.jwt.refresh_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "token expiries must be positive".to_string(),
            ));
        }
        if self.jwt.issuer.is_empty() || self.jwt.audience.is_empty() {
            return Err(ConfigError::MissingRequired("jwt.issuer / jwt.audience".to_string()));
        }
        if self.store.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("store.timeout_ms must be > 0".to_string()));
        }
        if self.transport.mode == TransportMode::Cookie
            && self.transport.same_site == SameSitePolicy::None
        {
            tracing::warn!("SameSite=None refresh cookies are only sent over HTTPS");
        }
        Ok(())
    }
}

/// Load settings from `configuration.*` (optional) layered with `APP_*`
/// environment variables, e.g. `APP_TRANSPORT__MODE=header`.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("cors.allowed_origins")
                .with_list_parse_key("cors.exposed_headers")
                .try_parsing(true),
        )
        .build()?;
    let settings = settings.try_deserialize::<Settings>()?;
    settings.validate()?;
    Ok(settings)
}

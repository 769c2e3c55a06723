//! Configuration management
//!
//! Loads configuration from default values, then a `.env` file if present,
//! then environment variables: `KEYCLOAK_*` for the provider and `APP_*` for
//! the server.

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
};

use axum_keycloak::keycloak::KeycloakConfig;
use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use time::Duration;
use url::Url;

/// Signing keys are stretched from secrets at least this long.
pub const MIN_SECRET_LEN: usize = 32;

/// Longest session inactivity accepted, in days.
pub const MAX_INACTIVITY_DAYS: i64 = 3650;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("invalid url in `{name}`: {source}")]
    Url {
        name: &'static str,
        source: url::ParseError,
    },

    #[error("invalid bind host: {0}")]
    Host(#[from] std::net::AddrParseError),

    #[error("session secret must be at least {MIN_SECRET_LEN} bytes")]
    ShortSecret,

    #[error("`{name}` must start with `/`, got `{value}`")]
    Path { name: &'static str, value: String },

    #[error("`APP_BASE_URL` must be an origin without path, query or fragment, got `{0}`")]
    BaseUrl(Url),

    #[error("`APP_SESSION_INACTIVITY_DAYS` must be between 1 and {MAX_INACTIVITY_DAYS}, got {0}")]
    Inactivity(i64),
}

/// Provider settings, read from `KEYCLOAK_*`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeycloakSettings {
    pub auth_url: String,
    pub realm: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub idp_hint: Option<String>,
}

impl Default for KeycloakSettings {
    fn default() -> Self {
        Self {
            auth_url: "https://login.edgeimpulse.com/auth/".to_string(),
            realm: "master".to_string(),
            client_id: "studio-staging".to_string(),
            client_secret: None,
            idp_hint: Some("okta".to_string()),
        }
    }
}

/// Server settings, read from `APP_*`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub base_url: String,
    pub studio_url: String,
    #[serde(default)]
    pub session_secret: Option<String>,
    pub session_resave: bool,
    pub session_save_uninitialized: bool,
    pub session_secure: bool,
    pub session_cookie_name: String,
    pub session_inactivity_days: i64,
    pub logout_path: String,
    pub admin_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
            studio_url: "http://edgeimpulse.optra.com:4800/sso-login".to_string(),
            session_secret: None,
            session_resave: false,
            session_save_uninitialized: true,
            session_secure: false,
            session_cookie_name: "id".to_string(),
            session_inactivity_days: 1,
            logout_path: "/logout".to_string(),
            admin_path: "/".to_string(),
        }
    }
}

/// Raw settings, before validation.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub keycloak: KeycloakSettings,
    pub server: ServerSettings,
}

impl Settings {
    /// Reads settings from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            keycloak: load_section("KEYCLOAK", &KeycloakSettings::default())?,
            server: load_section("APP", &ServerSettings::default())?,
        })
    }
}

fn load_section<T>(prefix: &str, defaults: &T) -> Result<T, ConfigError>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    let section = Config::builder()
        .add_source(Config::try_from(defaults)?)
        .add_source(Environment::with_prefix(prefix).try_parsing(true))
        .build()?
        .try_deserialize()?;

    Ok(section)
}

/// Session cookie and store behaviour.
#[derive(Clone)]
pub struct SessionSettings {
    pub secret: Option<String>,
    pub resave: bool,
    pub save_uninitialized: bool,
    pub secure: bool,
    pub cookie_name: String,
    pub inactivity: Duration,
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("secret", &self.secret.as_ref().map(|_| "[redacted]"))
            .field("resave", &self.resave)
            .field("save_uninitialized", &self.save_uninitialized)
            .field("secure", &self.secure)
            .field("cookie_name", &self.cookie_name)
            .field("inactivity", &self.inactivity)
            .finish()
    }
}

/// Validated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub addr: SocketAddr,
    pub base_url: Url,
    pub studio_url: Url,
    pub keycloak: KeycloakConfig,
    pub session: SessionSettings,
    pub logout_path: String,
    pub admin_path: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Settings::from_env()?.try_into()
    }

    /// The identity provider alias handed to the studio.
    pub fn idp_hint(&self) -> Option<&str> {
        self.keycloak.idp_hint.as_deref()
    }
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::Url { name, source })
}

fn check_path(name: &'static str, value: String) -> Result<String, ConfigError> {
    if value.starts_with('/') {
        Ok(value)
    } else {
        Err(ConfigError::Path { name, value })
    }
}

/// Redirect URIs are built by joining request paths onto the base, so only
/// an origin survives intact.
fn check_base_url(value: &str) -> Result<Url, ConfigError> {
    let url = parse_url("APP_BASE_URL", value)?;
    if url.path() == "/" && url.query().is_none() && url.fragment().is_none() {
        Ok(url)
    } else {
        Err(ConfigError::BaseUrl(url))
    }
}

fn inactivity(days: i64) -> Result<Duration, ConfigError> {
    if (1..=MAX_INACTIVITY_DAYS).contains(&days) {
        Ok(Duration::days(days))
    } else {
        Err(ConfigError::Inactivity(days))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl TryFrom<Settings> for AppConfig {
    type Error = ConfigError;

    fn try_from(settings: Settings) -> Result<Self, Self::Error> {
        let Settings { keycloak, server } = settings;

        parse_url("KEYCLOAK_AUTH_URL", &keycloak.auth_url)?;

        let secret = non_empty(server.session_secret);
        if secret.as_ref().is_some_and(|secret| secret.len() < MIN_SECRET_LEN) {
            return Err(ConfigError::ShortSecret);
        }

        let host: IpAddr = server.host.parse()?;

        Ok(Self {
            addr: SocketAddr::new(host, server.port),
            base_url: check_base_url(&server.base_url)?,
            studio_url: parse_url("APP_STUDIO_URL", &server.studio_url)?,
            keycloak: KeycloakConfig {
                realm: keycloak.realm,
                auth_server_url: keycloak.auth_url,
                resource: keycloak.client_id,
                secret: non_empty(keycloak.client_secret),
                idp_hint: non_empty(keycloak.idp_hint),
            },
            session: SessionSettings {
                secret,
                resave: server.session_resave,
                save_uninitialized: server.session_save_uninitialized,
                secure: server.session_secure,
                cookie_name: server.session_cookie_name,
                inactivity: inactivity(server.session_inactivity_days)?,
            },
            logout_path: check_path("APP_LOGOUT_PATH", server.logout_path)?,
            admin_path: check_path("APP_ADMIN_PATH", server.admin_path)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::try_from(Settings::default()).unwrap();

        assert_eq!(config.addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.base_url.as_str(), "http://localhost:3000/");
        assert_eq!(config.keycloak.realm, "master");
        assert_eq!(config.keycloak.resource, "studio-staging");
        assert_eq!(config.idp_hint(), Some("okta"));
        assert!(config.keycloak.secret.is_none());
        assert!(config.session.save_uninitialized);
        assert!(!config.session.resave);
        assert_eq!(config.logout_path, "/logout");
        assert_eq!(config.admin_path, "/");
    }

    #[test]
    fn short_session_secret_is_rejected() {
        let mut settings = Settings::default();
        settings.server.session_secret = Some("mySecret".to_string());

        assert!(matches!(
            AppConfig::try_from(settings),
            Err(ConfigError::ShortSecret)
        ));
    }

    #[test]
    fn blank_secrets_are_treated_as_absent() {
        let mut settings = Settings::default();
        settings.server.session_secret = Some(String::new());
        settings.keycloak.client_secret = Some("  ".to_string());

        let config = AppConfig::try_from(settings).unwrap();
        assert!(config.session.secret.is_none());
        assert!(config.keycloak.secret.is_none());
    }

    #[test]
    fn invalid_urls_are_rejected() {
        let mut settings = Settings::default();
        settings.server.studio_url = "not a url".to_string();

        assert!(matches!(
            AppConfig::try_from(settings),
            Err(ConfigError::Url {
                name: "APP_STUDIO_URL",
                ..
            })
        ));
    }

    #[test]
    fn relative_paths_are_rejected() {
        let mut settings = Settings::default();
        settings.server.logout_path = "logout".to_string();

        assert!(matches!(
            AppConfig::try_from(settings),
            Err(ConfigError::Path {
                name: "APP_LOGOUT_PATH",
                ..
            })
        ));
    }

    #[test]
    fn base_url_must_be_an_origin() {
        for base_url in [
            "http://localhost:3000/app",
            "http://localhost:3000/?tenant=a",
            "http://localhost:3000/#top",
        ] {
            let mut settings = Settings::default();
            settings.server.base_url = base_url.to_string();

            assert!(
                matches!(AppConfig::try_from(settings), Err(ConfigError::BaseUrl(_))),
                "{base_url} should be rejected"
            );
        }

        let mut settings = Settings::default();
        settings.server.base_url = "https://app.example.com/".to_string();
        let config = AppConfig::try_from(settings).unwrap();
        assert_eq!(config.base_url.as_str(), "https://app.example.com/");
    }

    #[test]
    fn session_inactivity_is_bounded() {
        for days in [0, -1, MAX_INACTIVITY_DAYS + 1, i64::MAX] {
            let mut settings = Settings::default();
            settings.server.session_inactivity_days = days;

            assert!(matches!(
                AppConfig::try_from(settings),
                Err(ConfigError::Inactivity(rejected)) if rejected == days
            ));
        }

        let mut settings = Settings::default();
        settings.server.session_inactivity_days = MAX_INACTIVITY_DAYS;
        let config = AppConfig::try_from(settings).unwrap();
        assert_eq!(config.session.inactivity, Duration::days(MAX_INACTIVITY_DAYS));
    }

    #[test]
    fn session_secret_is_redacted() {
        let mut settings = Settings::default();
        settings.server.session_secret = Some("a".repeat(MIN_SECRET_LEN));

        let config = AppConfig::try_from(settings).unwrap();
        assert!(!format!("{:?}", config.session).contains("aaaa"));
    }
}

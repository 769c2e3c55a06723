//! A Keycloak implementation of [`IdentityProvider`].
//!
//! Logins go through the realm's OpenID Connect endpoints:
//!
//! - `{realm}/protocol/openid-connect/auth`
//! - `{realm}/protocol/openid-connect/token`
//! - `{realm}/protocol/openid-connect/logout`
//!
//! where `{realm}` is `{auth_server_url}/realms/{realm}`.

use std::{borrow::Cow, fmt};

use async_trait::async_trait;
use oauth2::{
    basic::{
        BasicErrorResponse, BasicRequestTokenError, BasicRevocationErrorResponse,
        BasicTokenIntrospectionResponse, BasicTokenType,
    },
    AsyncHttpClient, AuthUrl, Client, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, ExtraTokenFields, RedirectUrl, Scope, StandardRevocableToken,
    StandardTokenResponse, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::{CodeExchange, Grant, IdentityProvider};

/// Coordinates of a Keycloak realm and the client registered in it.
#[derive(Clone, Deserialize)]
pub struct KeycloakConfig {
    /// Realm name, e.g. `master`.
    pub realm: String,

    /// Base URL of the Keycloak server, e.g. `https://sso.example.com/auth/`.
    pub auth_server_url: String,

    /// Client identifier.
    pub resource: String,

    /// Client secret. Leave unset for public clients.
    pub secret: Option<String>,

    /// Identity provider alias passed as `kc_idp_hint`, skipping Keycloak's own
    /// login page.
    pub idp_hint: Option<String>,
}

impl fmt::Debug for KeycloakConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeycloakConfig")
            .field("realm", &self.realm)
            .field("auth_server_url", &self.auth_server_url)
            .field("resource", &self.resource)
            .field("secret", &self.secret.as_ref().map(|_| "[redacted]"))
            .field("idp_hint", &self.idp_hint)
            .finish()
    }
}

impl KeycloakConfig {
    /// The realm URL all endpoints hang off.
    pub fn realm_url(&self) -> Result<Url, url::ParseError> {
        let base = self.auth_server_url.trim_end_matches('/');
        let realm: String = form_urlencoded::byte_serialize(self.realm.as_bytes()).collect();
        Url::parse(&format!("{base}/realms/{realm}"))
    }

    fn endpoint(&self, name: &str) -> Result<Url, url::ParseError> {
        let realm_url = self.realm_url()?;
        Url::parse(&format!("{realm_url}/protocol/openid-connect/{name}"))
    }
}

/// Extra fields Keycloak adds to its token responses.
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct KeycloakTokenFields {
    /// OpenID Connect identity token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Keycloak's session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<String>,

    /// Lifetime of the refresh token in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<u64>,
}

impl fmt::Debug for KeycloakTokenFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeycloakTokenFields")
            .field("id_token", &self.id_token.as_ref().map(|_| "[redacted]"))
            .field("session_state", &self.session_state)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .finish()
    }
}

impl ExtraTokenFields for KeycloakTokenFields {}

/// Token response returned by Keycloak's token endpoint.
pub type KeycloakTokenResponse = StandardTokenResponse<KeycloakTokenFields, BasicTokenType>;

type KeycloakClient = Client<
    BasicErrorResponse,
    KeycloakTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// An error which can occur while talking to Keycloak.
#[derive(Debug, thiserror::Error)]
pub enum KeycloakError {
    /// A configured or derived URL is not valid.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// The token endpoint rejected the exchange or could not be reached.
    #[error(transparent)]
    TokenRequest(BasicRequestTokenError<<reqwest::Client as AsyncHttpClient<'static>>::Error>),

    /// The HTTP client could not be constructed.
    #[error("could not build http client: {0}")]
    HttpClient(reqwest::Error),
}

/// Keycloak identity provider.
#[derive(Debug, Clone)]
pub struct Keycloak {
    config: KeycloakConfig,
    client: KeycloakClient,
    logout_endpoint: Url,
    http_client: reqwest::Client,
}

impl Keycloak {
    /// Creates a provider for the given realm and client.
    pub fn new(config: KeycloakConfig) -> Result<Self, KeycloakError> {
        let mut client = Client::new(ClientId::new(config.resource.clone()))
            .set_auth_uri(AuthUrl::from_url(config.endpoint("auth")?))
            .set_token_uri(TokenUrl::from_url(config.endpoint("token")?));

        if let Some(secret) = config.secret.as_ref().filter(|secret| !secret.is_empty()) {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }

        let http_client = reqwest::ClientBuilder::new()
            // Following redirects opens the client up to SSRF vulnerabilities.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(KeycloakError::HttpClient)?;

        Ok(Self {
            logout_endpoint: config.endpoint("logout")?,
            config,
            client,
            http_client,
        })
    }

    /// The configuration this provider was built from.
    pub fn config(&self) -> &KeycloakConfig {
        &self.config
    }
}

fn token_type_name(token_type: &BasicTokenType) -> String {
    #[allow(unreachable_patterns)]
    match token_type {
        BasicTokenType::Bearer => "Bearer".to_string(),
        BasicTokenType::Mac => "MAC".to_string(),
        BasicTokenType::Extension(other) => other.clone(),
        _ => "Bearer".to_string(),
    }
}

fn grant_from_token(token: &KeycloakTokenResponse, issued_at: i64) -> Grant {
    let extra = token.extra_fields();

    Grant {
        access_token: token.access_token().secret().clone(),
        token_type: token_type_name(token.token_type()),
        refresh_token: token.refresh_token().map(|t| t.secret().clone()),
        id_token: extra.id_token.clone(),
        scope: token.scopes().map(|scopes| {
            scopes
                .iter()
                .map(|scope| scope.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        }),
        session_state: extra.session_state.clone(),
        issued_at,
        expires_at: token.expires_in().and_then(|expires_in| {
            i64::try_from(expires_in.as_secs())
                .ok()
                .and_then(|secs| issued_at.checked_add(secs))
        }),
    }
}

#[async_trait]
impl IdentityProvider for Keycloak {
    type Error = KeycloakError;

    fn authorize_url(&self, redirect_uri: &str) -> Result<(Url, CsrfToken), Self::Error> {
        let redirect_uri = RedirectUrl::new(redirect_uri.to_string())?;

        let mut request = self
            .client
            .authorize_url(CsrfToken::new_random)
            .set_redirect_uri(Cow::Owned(redirect_uri))
            .add_scope(Scope::new("openid".to_string()));

        if let Some(idp_hint) = self.config.idp_hint.as_deref() {
            request = request.add_extra_param("kc_idp_hint", idp_hint);
        }

        Ok(request.url())
    }

    #[tracing::instrument(level = "debug", skip_all, err)]
    async fn exchange_code(&self, exchange: CodeExchange) -> Result<Grant, Self::Error> {
        let redirect_uri = RedirectUrl::new(exchange.redirect_uri)?;

        let mut request = self
            .client
            .exchange_code(exchange.code)
            .set_redirect_uri(Cow::Owned(redirect_uri))
            .add_extra_param("client_session_state", exchange.session_id);

        if let Some(host) = exchange.session_host {
            request = request.add_extra_param("client_session_host", host);
        }

        let token = request
            .request_async(&self.http_client)
            .await
            .map_err(KeycloakError::TokenRequest)?;

        Ok(grant_from_token(
            &token,
            OffsetDateTime::now_utc().unix_timestamp(),
        ))
    }

    fn logout_url(
        &self,
        redirect_uri: &str,
        id_token_hint: Option<&str>,
    ) -> Result<Url, Self::Error> {
        let mut url = self.logout_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("post_logout_redirect_uri", redirect_uri)
                .append_pair("client_id", &self.config.resource);
            if let Some(id_token_hint) = id_token_hint {
                query.append_pair("id_token_hint", id_token_hint);
            }
        }

        Ok(url)
    }
}

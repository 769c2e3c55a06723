use std::fmt::{self, Debug};

use async_trait::async_trait;
use oauth2::{AuthorizationCode, CsrfToken};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

/// The credential issued by the identity provider once a login completes.
///
/// This is what gets stored in the session and what marks a session as
/// authenticated. Timestamps are unix seconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Bearer token for calling resource servers.
    pub access_token: String,

    /// Token type reported by the provider, usually `Bearer`.
    pub token_type: String,

    /// Refresh token, when the provider issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// OpenID Connect identity token, used as the hint on logout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Space separated scopes granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// The provider's own session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<String>,

    /// When the code was exchanged.
    pub issued_at: i64,

    /// When the access token stops being valid, if the provider said so.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

// Here we've implemented `Debug` manually to avoid accidentally logging tokens.
impl Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grant")
            .field("access_token", &"[redacted]")
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[redacted]"))
            .field("scope", &self.scope)
            .field("session_state", &self.session_state)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Grant {
    /// Creates a bearer grant issued now, with no optional parts.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            id_token: None,
            scope: None,
            session_state: None,
            issued_at: OffsetDateTime::now_utc().unix_timestamp(),
            expires_at: None,
        }
    }

    /// Returns `true` when the grant has an expiry at or before `now`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Returns `true` when the grant has already expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc().unix_timestamp())
    }
}

/// Everything needed to trade an authorization code for a [`Grant`].
#[derive(Debug, Clone)]
pub struct CodeExchange {
    /// The code the provider handed back on the callback.
    pub code: AuthorizationCode,

    /// The exact redirect URI sent with the authorization request.
    pub redirect_uri: String,

    /// Our session identifier, so the provider can later ask us to drop it.
    pub session_id: String,

    /// Host the session lives on, if known.
    pub session_host: Option<String>,
}

/// An external identity provider which can log users in.
///
/// Providers must implement:
///
/// 1. [`authorize_url`](IdentityProvider::authorize_url), where unauthenticated
///    users are sent,
/// 2. [`exchange_code`](IdentityProvider::exchange_code), which turns the
///    callback's code into a [`Grant`] and,
/// 3. [`logout_url`](IdentityProvider::logout_url), where users are sent to end
///    their provider session.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use axum_keycloak::{
///     oauth2::CsrfToken,
///     url::{self, Url},
///     CodeExchange, Grant, IdentityProvider,
/// };
///
/// #[derive(Debug, Clone)]
/// struct Static;
///
/// #[async_trait]
/// impl IdentityProvider for Static {
///     type Error = url::ParseError;
///
///     fn authorize_url(&self, redirect_uri: &str) -> Result<(Url, CsrfToken), Self::Error> {
///         let state = CsrfToken::new_random();
///         let mut url = Url::parse("https://idp.example.com/auth")?;
///         url.query_pairs_mut()
///             .append_pair("redirect_uri", redirect_uri)
///             .append_pair("state", state.secret());
///         Ok((url, state))
///     }
///
///     async fn exchange_code(&self, exchange: CodeExchange) -> Result<Grant, Self::Error> {
///         Ok(Grant::bearer(exchange.code.secret().clone()))
///     }
///
///     fn logout_url(
///         &self,
///         _redirect_uri: &str,
///         _id_token_hint: Option<&str>,
///     ) -> Result<Url, Self::Error> {
///         Url::parse("https://idp.example.com/logout")
///     }
/// }
/// ```
#[async_trait]
pub trait IdentityProvider: Clone + Send + Sync {
    /// An error which can occur while talking to the provider.
    type Error: std::error::Error + Send + Sync;

    /// Builds the URL users are redirected to in order to log in, together
    /// with the CSRF state embedded in it.
    fn authorize_url(&self, redirect_uri: &str) -> Result<(Url, CsrfToken), Self::Error>;

    /// Exchanges an authorization code for a grant.
    async fn exchange_code(&self, exchange: CodeExchange) -> Result<Grant, Self::Error>;

    /// Builds the provider's logout URL.
    fn logout_url(
        &self,
        redirect_uri: &str,
        id_token_hint: Option<&str>,
    ) -> Result<Url, Self::Error>;
}

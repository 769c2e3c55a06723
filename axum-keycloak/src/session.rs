use std::fmt::Debug;

use oauth2::AuthorizationCode;
use tower_sessions::{session, Session};
use url::Url;

use crate::{CodeExchange, Grant, IdentityProvider, NotBefore};

/// Session key holding the serialized [`Grant`].
pub const TOKEN_KEY: &str = "keycloak-token";

pub(crate) const STATE_KEY: &str = "keycloak-state";
pub(crate) const REDIRECT_URI_KEY: &str = "keycloak-redirect-uri";

/// An error type which maps session and provider errors.
#[derive(thiserror::Error)]
pub enum Error<Provider: IdentityProvider> {
    /// A mapping to `tower_sessions::session::Error'.
    #[error(transparent)]
    Session(session::Error),

    /// A mapping to `Provider::Error`.
    #[error(transparent)]
    Provider(Provider::Error),
}

impl<Provider: IdentityProvider> Debug for Error<Provider> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Session(err) => write!(f, "{:?}", err)?,
            Error::Provider(err) => write!(f, "{:?}", err)?,
        };

        Ok(())
    }
}

/// A specialized session tracking whether the client has logged in with the
/// identity provider.
///
/// The session is generic over some provider which implements
/// [`IdentityProvider`]. Logging in is a two step affair: first
/// [`start_login`](Self::start_login) records the pending state and yields
/// the provider URL to send the client to, then
/// [`complete_login`](Self::complete_login) verifies the state the provider
/// echoes back and exchanges the code for a [`Grant`].
///
/// Once a grant is stored the session is authenticated until it expires, the
/// provider's not-before policy moves past it, or [`logout`](Self::logout) is
/// called.
#[derive(Debug, Clone)]
pub struct AuthSession<Provider: IdentityProvider> {
    /// The grant held by the session. `None` when not logged in.
    pub grant: Option<Grant>,

    /// The identity provider.
    pub provider: Provider,

    session: Session,
    base_url: Option<Url>,
}

impl<Provider: IdentityProvider> AuthSession<Provider> {
    /// Returns `true` when the session holds a valid grant.
    pub fn is_authenticated(&self) -> bool {
        self.grant.is_some()
    }

    /// The underlying session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The public base URL of the application, when configured.
    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Records a pending login and returns the provider URL the client should
    /// be redirected to.
    ///
    /// `redirect_uri` is where the provider sends the client back to; it must
    /// carry the `auth_callback` marker so the callback is recognized.
    #[tracing::instrument(level = "debug", skip_all, fields(redirect_uri = %redirect_uri), err)]
    pub async fn start_login(&self, redirect_uri: &Url) -> Result<Url, Error<Provider>> {
        let (authorize_url, state) = self
            .provider
            .authorize_url(redirect_uri.as_str())
            .map_err(Error::Provider)?;

        self.session
            .insert(STATE_KEY, state.secret())
            .await
            .map_err(Error::Session)?;
        self.session
            .insert(REDIRECT_URI_KEY, redirect_uri.as_str())
            .await
            .map_err(Error::Session)?;

        Ok(authorize_url)
    }

    /// Completes a pending login from the provider's callback parameters.
    ///
    /// Returns `None` if there is no pending login or the state does not match
    /// the one issued by [`start_login`](Self::start_login). Provider errors
    /// leave the session without a grant.
    #[tracing::instrument(level = "debug", skip_all, ret, err)]
    pub async fn complete_login(
        &mut self,
        code: String,
        state: &str,
        session_host: Option<String>,
    ) -> Result<Option<Grant>, Error<Provider>> {
        let expected_state: Option<String> =
            self.session.remove(STATE_KEY).await.map_err(Error::Session)?;
        let redirect_uri: Option<String> = self
            .session
            .remove(REDIRECT_URI_KEY)
            .await
            .map_err(Error::Session)?;

        // Ensure the CSRF state has not been tampered with.
        let (Some(expected_state), Some(redirect_uri)) = (expected_state, redirect_uri) else {
            return Ok(None);
        };
        if expected_state != state {
            return Ok(None);
        }

        // Session-fixation mitigation. The session is saved so the provider
        // learns the identifier it can later ask us to revoke.
        self.session.cycle_id().await.map_err(Error::Session)?;
        self.session.save().await.map_err(Error::Session)?;
        let session_id = self
            .session
            .id()
            .map(|id| id.to_string())
            .unwrap_or_default();

        let grant = self
            .provider
            .exchange_code(CodeExchange {
                code: AuthorizationCode::new(code),
                redirect_uri,
                session_id,
                session_host,
            })
            .await
            .map_err(Error::Provider)?;

        self.login(grant.clone()).await?;

        Ok(Some(grant))
    }

    /// Stores the grant, marking the session as authenticated.
    #[tracing::instrument(level = "debug", skip_all, err)]
    pub async fn login(&mut self, grant: Grant) -> Result<(), Error<Provider>> {
        self.session
            .insert(TOKEN_KEY, &grant)
            .await
            .map_err(Error::Session)?;
        self.grant = Some(grant);

        Ok(())
    }

    /// Drops the grant and the whole session, returning the grant that was
    /// held, if any.
    #[tracing::instrument(level = "debug", skip_all, ret, err)]
    pub async fn logout(&mut self) -> Result<Option<Grant>, Error<Provider>> {
        let grant = self.grant.take();
        self.session.flush().await.map_err(Error::Session)?;

        Ok(grant)
    }

    pub(crate) async fn from_session(
        session: Session,
        provider: Provider,
        base_url: Option<Url>,
        not_before: &NotBefore,
    ) -> Result<Self, Error<Provider>> {
        let mut grant: Option<Grant> = session.get(TOKEN_KEY).await.map_err(Error::Session)?;

        if let Some(ref stored) = grant {
            if stored.is_expired() || !not_before.admits(stored) {
                tracing::debug!(
                    expired = stored.is_expired(),
                    "discarding grant no longer honoured"
                );
                grant = None;
                session
                    .remove::<Grant>(TOKEN_KEY)
                    .await
                    .map_err(Error::Session)?;
            }
        }

        Ok(Self {
            grant,
            provider,
            session,
            base_url,
        })
    }
}

//! Routes the identity provider talks to: logout, and Keycloak's admin
//! back-channel callbacks.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use tower_sessions::{session::Id, session_store, SessionStore};

use crate::{
    middleware::{found, public_base},
    AuthSession, IdentityProvider, NotBefore,
};

const LOGOUT_ACTION: &str = "LOGOUT";
const PUSH_NOT_BEFORE_ACTION: &str = "PUSH_NOT_BEFORE";

#[derive(Debug, Clone)]
struct AdminState<Store> {
    store: Store,
    not_before: NotBefore,
}

/// The payload of an admin callback token.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminAction {
    action: String,
    #[serde(default)]
    not_before: i64,
    #[serde(default)]
    adapter_session_ids: Option<Vec<String>>,
}

impl AdminAction {
    // The token's signature is not checked here.
    fn from_token(token: &str, expected: &str) -> Result<Self, AdminError> {
        let payload = token
            .trim()
            .split('.')
            .nth(1)
            .ok_or(AdminError::Malformed)?;
        let payload = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
        let action: Self = serde_json::from_slice(&payload)?;

        if action.action != expected {
            return Err(AdminError::UnexpectedAction(action.action));
        }

        Ok(action)
    }
}

#[derive(Debug, thiserror::Error)]
enum AdminError {
    #[error("admin token is not a compact JWS")]
    Malformed,

    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("unexpected admin action `{0}`")]
    UnexpectedAction(String),

    #[error(transparent)]
    Store(#[from] session_store::Error),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        match self {
            AdminError::Store(err) => {
                tracing::error!(err = %err, "could not delete session");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
            err => {
                tracing::warn!(err = %err, "rejecting admin callback");
                StatusCode::BAD_REQUEST.into_response()
            }
        }
    }
}

/// Creates the router serving the logout route at `logout_path` and the admin
/// callbacks `k_logout` and `k_push_not_before` under `admin_path`.
///
/// `store` must be the store given to the session layer, so sessions the
/// provider asks us to revoke can be deleted. Likewise `not_before` should be
/// shared with [`AuthManagerLayerBuilder::with_not_before`].
///
/// The returned router relies on [`AuthManagerLayer`] being installed around
/// it.
///
/// [`AuthManagerLayerBuilder::with_not_before`]: crate::AuthManagerLayerBuilder::with_not_before
/// [`AuthManagerLayer`]: crate::AuthManagerLayer
pub fn router<Provider, Store>(
    store: Store,
    not_before: NotBefore,
    logout_path: &str,
    admin_path: &str,
) -> Router
where
    Provider: IdentityProvider + 'static,
    Store: SessionStore + Clone,
{
    let admin_path = admin_path.trim_end_matches('/');

    Router::new()
        .route(logout_path, get(self::get::logout::<Provider>))
        .route(
            &format!("{admin_path}/k_logout"),
            post(self::post::k_logout::<Store>),
        )
        .route(
            &format!("{admin_path}/k_push_not_before"),
            post(self::post::k_push_not_before::<Store>),
        )
        .with_state(AdminState { store, not_before })
}

mod get {
    use super::*;

    pub(super) async fn logout<Provider: IdentityProvider>(
        mut auth_session: AuthSession<Provider>,
        headers: HeaderMap,
    ) -> Response {
        let grant = match auth_session.logout().await {
            Ok(grant) => grant,
            Err(err) => {
                tracing::error!(err = %err, "could not log out");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        let redirect_uri = match public_base(auth_session.base_url(), &headers) {
            Ok(redirect_uri) => redirect_uri,
            Err(err) => {
                tracing::error!(err = %err, "could not build post logout redirect uri");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        let id_token_hint = grant.as_ref().and_then(|grant| grant.id_token.as_deref());
        match auth_session
            .provider
            .logout_url(redirect_uri.as_str(), id_token_hint)
        {
            Ok(logout_url) => found(logout_url.as_str()),
            Err(err) => {
                tracing::error!(err = %err, "could not build provider logout url");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

mod post {
    use super::*;

    pub(super) async fn k_logout<Store: SessionStore>(
        State(state): State<AdminState<Store>>,
        body: String,
    ) -> Result<&'static str, AdminError> {
        let action = AdminAction::from_token(&body, LOGOUT_ACTION)?;

        match action.adapter_session_ids {
            Some(session_ids) => {
                for session_id in session_ids {
                    match session_id.parse::<Id>() {
                        Ok(id) => state.store.delete(&id).await?,
                        Err(_) => tracing::warn!(%session_id, "ignoring malformed session id"),
                    }
                }
            }
            None => state.not_before.set(action.not_before),
        }

        Ok("ok")
    }

    pub(super) async fn k_push_not_before<Store: SessionStore>(
        State(state): State<AdminState<Store>>,
        body: String,
    ) -> Result<&'static str, AdminError> {
        let action = AdminAction::from_token(&body, PUSH_NOT_BEFORE_ACTION)?;
        tracing::info!(not_before = action.not_before, "not-before policy pushed");
        state.not_before.set(action.not_before);

        Ok("ok")
    }
}

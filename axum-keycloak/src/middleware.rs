use axum::{
    http::{self, header, HeaderMap, Uri},
    response::{IntoResponse, Response},
};
use url::Url;

use crate::{service::CALLBACK_PARAM, AuthSession, IdentityProvider};

/// A `302 Found` redirect.
pub(crate) fn found(location: &str) -> Response {
    (http::StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// The public URL of the application: the configured base URL, or one derived
/// from the `Host` header.
pub(crate) fn public_base(
    base_url: Option<&Url>,
    headers: &HeaderMap,
) -> Result<Url, url::ParseError> {
    if let Some(base_url) = base_url {
        return Ok(base_url.clone());
    }

    let host = headers
        .get(header::HOST)
        .and_then(|host| host.to_str().ok())
        .unwrap_or("localhost");
    Url::parse(&format!("http://{host}/"))
}

/// The URL the provider should send the client back to after logging in:
/// the original URL with the callback marker appended.
pub(crate) fn callback_url(
    base_url: Option<&Url>,
    original_uri: &Uri,
    headers: &HeaderMap,
) -> Result<Url, url::ParseError> {
    let mut url = public_base(base_url, headers)?.join(original_uri.path())?;
    url.set_query(original_uri.query());
    url.query_pairs_mut().append_pair(CALLBACK_PARAM, "1");

    Ok(url)
}

/// This is intended for internal use only and subject to change in the future
/// without warning!
#[doc(hidden)]
pub async fn redirect_to_provider<Provider: IdentityProvider>(
    auth_session: &AuthSession<Provider>,
    original_uri: &Uri,
    headers: &HeaderMap,
) -> Response {
    let redirect_uri = match callback_url(auth_session.base_url(), original_uri, headers) {
        Ok(redirect_uri) => redirect_uri,
        Err(err) => {
            tracing::error!(err = %err, "could not build provider redirect uri");
            return http::StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match auth_session.start_login(&redirect_uri).await {
        Ok(authorize_url) => found(authorize_url.as_str()),
        Err(err) => {
            tracing::error!(err = %err, "could not start provider login");
            http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Login middleware.
///
/// Requires that the session holds a valid grant. Otherwise the client is
/// redirected to the identity provider's login page and, once the provider
/// sends it back, lands on the originally requested URL.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/protected", get(protected))
///     .route_layer(login_required!(Keycloak))
///     .layer(auth_layer);
/// ```
#[macro_export]
macro_rules! login_required {
    ($provider_type:ty) => {{
        use $crate::axum::{
            extract::{OriginalUri, Request},
            middleware::{from_fn, Next},
        };

        from_fn(
            |auth_session: $crate::AuthSession<$provider_type>,
             OriginalUri(original_uri): OriginalUri,
             req: Request,
             next: Next| async move {
                if auth_session.is_authenticated() {
                    next.run(req).await
                } else {
                    $crate::redirect_to_provider(&auth_session, &original_uri, req.headers())
                        .await
                }
            },
        )
    }};
}

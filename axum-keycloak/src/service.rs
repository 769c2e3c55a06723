use std::{
    borrow::Cow,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use axum::{
    extract::Request,
    http::{self, header, Uri},
    response::{IntoResponse, Response},
};
use time::OffsetDateTime;
use tower_cookies::CookieManager;
use tower_layer::Layer;
use tower_service::Service;
use tower_sessions::{
    service::{CookieController, PlaintextCookie},
    Session, SessionManager, SessionManagerLayer, SessionStore,
};
use tracing::Instrument;
use url::Url;

use crate::{middleware::found, AuthSession, Error, IdentityProvider, NotBefore};

/// Query parameter marking a request as the provider's callback.
pub const CALLBACK_PARAM: &str = "auth_callback";

pub(crate) const CREATED_AT_KEY: &str = "session.created-at";

// Parameters the provider appends to the callback, stripped before resuming.
const PROVIDER_PARAMS: [&str; 5] = [CALLBACK_PARAM, "code", "state", "session_state", "iss"];

#[derive(Debug, Default)]
struct Callback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl Callback {
    fn from_uri(uri: &Uri) -> Option<Self> {
        let query = uri.query()?;
        let mut is_callback = false;
        let mut callback = Callback::default();

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                CALLBACK_PARAM => is_callback = true,
                "code" => callback.code = Some(value.into_owned()),
                "state" => callback.state = Some(value.into_owned()),
                "error" => callback.error = Some(value.into_owned()),
                _ => {}
            }
        }

        is_callback.then_some(callback)
    }
}

/// The originally requested path and query, minus the provider's parameters.
pub(crate) fn resume_uri(uri: &Uri) -> String {
    let retained: Vec<(Cow<'_, str>, Cow<'_, str>)> = uri
        .query()
        .map(|query| {
            form_urlencoded::parse(query.as_bytes())
                .filter(|(key, _)| !PROVIDER_PARAMS.contains(&key.as_ref()))
                .collect()
        })
        .unwrap_or_default();

    if retained.is_empty() {
        uri.path().to_string()
    } else {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(retained)
            .finish();
        format!("{}?{}", uri.path(), query)
    }
}

fn access_denied() -> Response {
    (http::StatusCode::FORBIDDEN, "Access denied").into_response()
}

fn internal_error() -> Response {
    http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

async fn complete_callback<Provider: IdentityProvider>(
    auth_session: &mut AuthSession<Provider>,
    callback: Callback,
    uri: &Uri,
    host: Option<String>,
) -> Response {
    if let Some(error) = callback.error {
        tracing::warn!(error = %error, "provider reported a failed login");
        return access_denied();
    }

    let (Some(code), Some(state)) = (callback.code, callback.state) else {
        tracing::warn!("provider callback without code or state");
        return access_denied();
    };

    match auth_session.complete_login(code, &state, host).await {
        Ok(Some(_)) => found(&resume_uri(uri)),

        Ok(None) => {
            tracing::warn!("provider callback with unexpected state");
            access_denied()
        }

        Err(Error::Provider(err)) => {
            tracing::error!(err = %err, "could not obtain grant from code");
            access_denied()
        }

        Err(err @ Error::Session(_)) => {
            tracing::error!(err = %err, "could not update session");
            internal_error()
        }
    }
}

/// A middleware that provides [`AuthSession`] as a request extension and
/// completes provider callbacks.
#[derive(Debug, Clone)]
pub struct AuthManager<S, Provider: IdentityProvider> {
    inner: S,
    provider: Provider,
    base_url: Option<Url>,
    not_before: NotBefore,
    save_uninitialized: bool,
}

impl<S, Provider> Service<Request> for AuthManager<S, Provider>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Provider: IdentityProvider + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let span = tracing::info_span!("call", authenticated = tracing::field::Empty);

        let provider = self.provider.clone();
        let base_url = self.base_url.clone();
        let not_before = self.not_before.clone();
        let save_uninitialized = self.save_uninitialized;

        // Because the inner service can panic until ready, we need to ensure we only
        // use the ready service.
        //
        // See: https://docs.rs/tower/latest/tower/trait.Service.html#be-careful-when-cloning-inner-services
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(
            async move {
                let Some(session) = req.extensions().get::<Session>().cloned() else {
                    tracing::error!("session not found in request extensions");
                    return Ok(internal_error());
                };

                let mut auth_session =
                    match AuthSession::from_session(session, provider, base_url, &not_before)
                        .await
                    {
                        Ok(auth_session) => auth_session,
                        Err(err) => {
                            tracing::error!(
                                err = %err,
                                "could not create auth session from session"
                            );
                            return Ok(internal_error());
                        }
                    };

                // Building the auth session loaded the record, so an identifier the
                // store no longer knows has been dropped by now.
                if save_uninitialized && auth_session.session().id().is_none() {
                    let created_at = OffsetDateTime::now_utc().unix_timestamp();
                    if let Err(err) = auth_session
                        .session()
                        .insert(CREATED_AT_KEY, created_at)
                        .await
                    {
                        tracing::error!(err = %err, "could not initialize session");
                        return Ok(internal_error());
                    }
                }

                tracing::Span::current().record("authenticated", auth_session.is_authenticated());

                if let Some(callback) = Callback::from_uri(req.uri()) {
                    let host = req
                        .headers()
                        .get(header::HOST)
                        .and_then(|host| host.to_str().ok())
                        .map(str::to_string);
                    let uri = req.uri().clone();

                    return Ok(complete_callback(&mut auth_session, callback, &uri, host).await);
                }

                req.extensions_mut().insert(auth_session);

                inner.call(req).await
            }
            .instrument(span),
        )
    }
}

/// A layer for providing [`AuthSession`] as a request extension.
#[derive(Debug, Clone)]
pub struct AuthManagerLayer<
    Provider: IdentityProvider,
    Sessions: SessionStore,
    C: CookieController = PlaintextCookie,
> {
    provider: Provider,
    session_manager_layer: SessionManagerLayer<Sessions, C>,
    base_url: Option<Url>,
    not_before: NotBefore,
    save_uninitialized: bool,
}

impl<S, Provider: IdentityProvider, Sessions: SessionStore, C: CookieController> Layer<S>
    for AuthManagerLayer<Provider, Sessions, C>
{
    type Service = CookieManager<SessionManager<AuthManager<S, Provider>, Sessions, C>>;

    fn layer(&self, inner: S) -> Self::Service {
        let auth_manager = AuthManager {
            inner,
            provider: self.provider.clone(),
            base_url: self.base_url.clone(),
            not_before: self.not_before.clone(),
            save_uninitialized: self.save_uninitialized,
        };

        self.session_manager_layer.layer(auth_manager)
    }
}

/// Builder for the [`AuthManagerLayer`].
#[derive(Debug, Clone)]
pub struct AuthManagerLayerBuilder<
    Provider: IdentityProvider,
    Sessions: SessionStore,
    C: CookieController = PlaintextCookie,
> {
    provider: Provider,
    session_manager_layer: SessionManagerLayer<Sessions, C>,
    base_url: Option<Url>,
    not_before: Option<NotBefore>,
    save_uninitialized: bool,
}

impl<Provider: IdentityProvider, Sessions: SessionStore, C: CookieController>
    AuthManagerLayerBuilder<Provider, Sessions, C>
{
    /// Create a new [`AuthManagerLayerBuilder`] with the provided identity
    /// provider.
    pub fn new(
        provider: Provider,
        session_manager_layer: SessionManagerLayer<Sessions, C>,
    ) -> Self {
        Self {
            provider,
            session_manager_layer,
            base_url: None,
            not_before: None,
            save_uninitialized: false,
        }
    }

    /// Configure the public URL of the application, used to build the
    /// provider's redirect URIs. If not configured, they are built from the
    /// request's `Host` header over plain HTTP.
    ///
    /// The base URL should be an origin such as `https://app.example.com/`.
    /// Request paths are absolute, so any path on the base URL is replaced.
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Share a not-before policy, typically the one given to
    /// [`routes::router`](crate::routes::router).
    pub fn with_not_before(mut self, not_before: NotBefore) -> Self {
        self.not_before = Some(not_before);
        self
    }

    /// Persist sessions, and issue their cookie, even when nothing was stored
    /// in them yet. Defaults to `false`.
    pub fn with_save_uninitialized(mut self, save_uninitialized: bool) -> Self {
        self.save_uninitialized = save_uninitialized;
        self
    }

    /// Build the [`AuthManagerLayer`].
    pub fn build(self) -> AuthManagerLayer<Provider, Sessions, C> {
        AuthManagerLayer {
            provider: self.provider,
            session_manager_layer: self.session_manager_layer,
            base_url: self.base_url,
            not_before: self.not_before.unwrap_or_default(),
            save_uninitialized: self.save_uninitialized,
        }
    }
}

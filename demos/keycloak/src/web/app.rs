use axum::Router;
use axum_keycloak::{
    keycloak::Keycloak,
    login_required,
    memory_store::MemoryStore,
    routes,
    tower_sessions::{
        cookie::{Key, SameSite},
        service::SignedCookie,
        Expiry, SessionManagerLayer, SessionStore,
    },
    AuthManagerLayerBuilder, IdentityProvider, NotBefore,
};
use sha2::{Digest, Sha512};
use tower_http::trace::TraceLayer;

use crate::{
    settings::{AppConfig, SessionSettings},
    web::{protected, protected::StudioLink, public},
};

pub struct App {
    config: AppConfig,
    keycloak: Keycloak,
}

impl App {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // A missing `.env` file is fine, the environment may carry everything.
        if let Err(err) = dotenvy::dotenv() {
            tracing::debug!(err = %err, "no .env file loaded");
        }

        let config = AppConfig::load()?;
        let keycloak = Keycloak::new(config.keycloak.clone())?;

        Ok(Self { config, keycloak })
    }

    pub async fn serve(self) -> Result<(), Box<dyn std::error::Error>> {
        // The same store backs the session layer and the admin callbacks, so the
        // provider can revoke sessions.
        let session_store = MemoryStore::new();
        let not_before = NotBefore::new();

        let app = router(self.keycloak, &self.config, session_store, not_before);

        let listener = tokio::net::TcpListener::bind(self.config.addr).await?;
        tracing::info!("Example app listening at http://{}", listener.local_addr()?);
        axum::serve(listener, app.into_make_service()).await?;

        Ok(())
    }
}

/// Signing key for the session cookie.
fn signing_key(secret: Option<&str>) -> Key {
    match secret {
        // `Key` wants 64 bytes; SHA-512 stretches any secret to that.
        Some(secret) => Key::from(Sha512::digest(secret.as_bytes()).as_slice()),
        None => {
            tracing::warn!("APP_SESSION_SECRET is not set, sessions will not survive a restart");
            Key::generate()
        }
    }
}

/// Session layer.
///
/// This uses `tower-sessions` to establish a layer that will provide the session
/// as a request extension.
pub fn session_layer<Store: SessionStore>(
    store: Store,
    settings: &SessionSettings,
) -> SessionManagerLayer<Store, SignedCookie> {
    SessionManagerLayer::new(store)
        .with_name(settings.cookie_name.clone())
        .with_secure(settings.secure)
        .with_http_only(true)
        .with_path("/")
        .with_same_site(SameSite::Lax) // Ensure we send the cookie from the provider's redirect.
        .with_always_save(settings.resave)
        .with_expiry(Expiry::OnInactivity(settings.inactivity))
        .with_signed(signing_key(settings.secret.as_deref()))
}

/// The application's routes, wrapped in the auth and trace layers.
pub fn router<Provider: IdentityProvider + 'static>(
    provider: Provider,
    config: &AppConfig,
    session_store: MemoryStore,
    not_before: NotBefore,
) -> Router {
    // Auth service.
    //
    // This combines the session layer with our provider to establish the auth
    // service which will provide the auth session as a request extension.
    let session_layer = session_layer(session_store.clone(), &config.session);
    let auth_layer = AuthManagerLayerBuilder::new(provider, session_layer)
        .with_base_url(config.base_url.clone())
        .with_not_before(not_before.clone())
        .with_save_uninitialized(config.session.save_uninitialized)
        .build();

    let studio = StudioLink {
        url: config.studio_url.clone(),
        idp_hint: config.idp_hint().map(str::to_string),
    };

    protected::router::<Provider>(studio)
        .route_layer(login_required!(Provider))
        .merge(public::router())
        .merge(routes::router::<Provider, _>(
            session_store,
            not_before,
            &config.logout_path,
            &config.admin_path,
        ))
        .layer(auth_layer)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_key_is_derived_from_secret() {
        let secret = "a-secret-of-at-least-thirty-two-bytes";
        assert_eq!(
            signing_key(Some(secret)).master(),
            signing_key(Some(secret)).master()
        );
        assert_ne!(
            signing_key(Some(secret)).master(),
            signing_key(Some("another-secret-of-at-least-thirty-two")).master()
        );
    }

    #[test]
    fn missing_secret_generates_a_key() {
        assert_ne!(signing_key(None).master(), signing_key(None).master());
    }
}

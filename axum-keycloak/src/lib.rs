//! Session-backed Keycloak login for Axum.
//!
//! This crate provides a Tower middleware which gates routes behind an
//! identity provider's login flow. With it, these workflows are made easy:
//!
//! 1. Redirecting unauthenticated clients to the provider,
//! 2. Completing the provider's callback and storing the resulting grant,
//! 3. Accessing the grant within a route,
//! 4. Logging out, locally and at the provider,
//! 5. Honouring the provider's back-channel logout and not-before pushes.
//!
//! Providers are decoupled from the middleware: anything implementing
//! [`IdentityProvider`] is supported. [`Keycloak`](keycloak::Keycloak) is
//! provided.
//!
//! Sessions are provided via [`tower-sessions`](tower_sessions). The session
//! layer is wrapped by [`AuthManagerLayer`], which attaches an
//! [`AuthSession`] to every request and recognizes the provider's callback on
//! any route by its `auth_callback` query parameter.
//!
//! # Example
//!
//! Note that the below example makes use of a memory-based store for
//! demonstration purposes only.
//!
//! ```rust,no_run
//! use axum::{response::IntoResponse, routing::get, Router};
//! use axum_keycloak::{
//!     keycloak::{Keycloak, KeycloakConfig},
//!     login_required,
//!     memory_store::MemoryStore,
//!     routes,
//!     tower_sessions::SessionManagerLayer,
//!     AuthManagerLayerBuilder, AuthSession, NotBefore,
//! };
//!
//! async fn protected(auth_session: AuthSession<Keycloak>) -> impl IntoResponse {
//!     format!("{:?}", auth_session.grant)
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let keycloak = Keycloak::new(KeycloakConfig {
//!         realm: "master".to_string(),
//!         auth_server_url: "https://keycloak.example.com/auth/".to_string(),
//!         resource: "my-client".to_string(),
//!         secret: None,
//!         idp_hint: None,
//!     })?;
//!
//!     let store = MemoryStore::new();
//!     let not_before = NotBefore::new();
//!     let session_layer = SessionManagerLayer::new(store.clone());
//!     let auth_layer = AuthManagerLayerBuilder::new(keycloak, session_layer)
//!         .with_not_before(not_before.clone())
//!         .build();
//!
//!     let app = Router::new()
//!         .route("/protected", get(protected))
//!         .route_layer(login_required!(Keycloak))
//!         .route("/", get(|| async { "Hello, world!" }))
//!         .merge(routes::router::<Keycloak, _>(store, not_before, "/logout", "/"))
//!         .layer(auth_layer);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app.into_make_service()).await?;
//!
//!     Ok(())
//! }
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use middleware::redirect_to_provider;
pub use not_before::NotBefore;
pub use provider::{CodeExchange, Grant, IdentityProvider};
pub use service::{AuthManager, AuthManagerLayer, AuthManagerLayerBuilder, CALLBACK_PARAM};
pub use session::{AuthSession, Error, TOKEN_KEY};

#[doc(hidden)]
pub use axum;
pub use oauth2;
pub use tower_sessions;
pub use tracing;
pub use url;

mod extract;
pub mod keycloak;
pub mod memory_store;
mod middleware;
mod not_before;
mod provider;
pub mod routes;
mod service;
mod session;

#[cfg(test)]
mod testing;

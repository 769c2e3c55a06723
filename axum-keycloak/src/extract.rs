use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use crate::{AuthSession, IdentityProvider};

impl<S, Provider> FromRequestParts<S> for AuthSession<Provider>
where
    S: Send + Sync,
    Provider: IdentityProvider + 'static,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthSession<_>>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Can't extract auth session. Is `AuthManagerLayer` enabled?",
        ))
    }
}

use axum::{routing::get, Router};
use axum_keycloak::IdentityProvider;
use url::Url;

/// Where `/studio` sends authenticated users.
#[derive(Debug, Clone)]
pub struct StudioLink {
    pub url: Url,
    pub idp_hint: Option<String>,
}

impl StudioLink {
    fn location(&self) -> Url {
        let mut url = self.url.clone();
        if let Some(idp_hint) = &self.idp_hint {
            url.query_pairs_mut().append_pair("idp", idp_hint);
        }
        url
    }
}

pub fn router<Provider: IdentityProvider + 'static>(studio: StudioLink) -> Router<()> {
    Router::new()
        .route("/login", get(self::get::login::<Provider>))
        .route("/protected/resource", get(self::get::resource::<Provider>))
        .route("/studio", get(self::get::studio))
        .with_state(studio)
}

mod get {
    use axum::{
        extract::State,
        http::{header, StatusCode},
        response::{Html, IntoResponse},
    };
    use axum_keycloak::{AuthSession, IdentityProvider};

    use super::StudioLink;
    use crate::web::view::{render, Payload, ViewError};

    pub async fn login<Provider: IdentityProvider>(
        auth_session: AuthSession<Provider>,
    ) -> Result<Html<String>, ViewError> {
        let payload = Payload::with_grant(
            auth_session.grant.as_ref(),
            "1. Authentication\n2. Login",
        )?;
        render("index", &payload)
    }

    pub async fn resource<Provider: IdentityProvider>(
        auth_session: AuthSession<Provider>,
    ) -> Result<Html<String>, ViewError> {
        let payload = Payload::with_grant(
            auth_session.grant.as_ref(),
            "1. Access granted to Default Resource\n",
        )?;
        render("index", &payload)
    }

    pub async fn studio(State(studio): State<StudioLink>) -> impl IntoResponse {
        (
            StatusCode::FOUND,
            [(header::LOCATION, studio.location().to_string())],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn studio_location_carries_idp_hint() {
        let studio = StudioLink {
            url: Url::parse("http://studio.test:4800/sso-login").unwrap(),
            idp_hint: Some("okta".to_string()),
        };
        assert_eq!(
            studio.location().as_str(),
            "http://studio.test:4800/sso-login?idp=okta"
        );

        let studio = StudioLink {
            idp_hint: None,
            ..studio
        };
        assert_eq!(studio.location().as_str(), "http://studio.test:4800/sso-login");
    }
}

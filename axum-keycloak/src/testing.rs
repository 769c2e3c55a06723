//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Response},
};
use oauth2::CsrfToken;
use tower_sessions::cookie::Cookie;
use url::Url;

use crate::{CodeExchange, Grant, IdentityProvider};

#[derive(Debug, thiserror::Error)]
#[error("provider rejected the code")]
pub struct Rejected;

/// A provider which accepts the code `good` and rejects everything else.
#[derive(Debug, Clone, Default)]
pub struct FakeProvider {
    pub expires_in: Option<i64>,
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    type Error = Rejected;

    fn authorize_url(&self, redirect_uri: &str) -> Result<(Url, CsrfToken), Self::Error> {
        let state = CsrfToken::new_random();
        let mut url = Url::parse("https://idp.test/auth").expect("static url");
        url.query_pairs_mut()
            .append_pair("client_id", "test-client")
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state.secret());

        Ok((url, state))
    }

    async fn exchange_code(&self, exchange: CodeExchange) -> Result<Grant, Self::Error> {
        if exchange.code.secret() != "good" {
            return Err(Rejected);
        }

        let mut grant = Grant::bearer(format!("access-{}", exchange.session_id));
        grant.id_token = Some("id-token".to_string());
        grant.expires_at = self.expires_in.map(|expires_in| grant.issued_at + expires_in);

        Ok(grant)
    }

    fn logout_url(
        &self,
        redirect_uri: &str,
        id_token_hint: Option<&str>,
    ) -> Result<Url, Self::Error> {
        let mut url = Url::parse("https://idp.test/logout").expect("static url");
        url.query_pairs_mut()
            .append_pair("post_logout_redirect_uri", redirect_uri);
        if let Some(id_token_hint) = id_token_hint {
            url.query_pairs_mut()
                .append_pair("id_token_hint", id_token_hint);
        }

        Ok(url)
    }
}

/// The `name=value` pair of the session cookie set by the response, if any.
pub fn session_cookie(res: &Response<Body>) -> Option<String> {
    res.headers()
        .get(header::SET_COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookie_str| Cookie::parse(cookie_str).ok())
        .map(|cookie| format!("{}={}", cookie.name(), cookie.value()))
}

pub fn location(res: &Response<Body>) -> Option<String> {
    res.headers()
        .get(header::LOCATION)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}

pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

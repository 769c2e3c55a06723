use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use axum_keycloak::Grant;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate<'a> {
    result: Option<&'a str>,
    event: Option<&'a str>,
}

/// Template variables for a single render.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    pub result: Option<String>,
    pub event: Option<String>,
}

impl Payload {
    /// Shows the grant as indented JSON, next to a description of what
    /// happened.
    pub fn with_grant(grant: Option<&Grant>, event: &str) -> Result<Self, ViewError> {
        let result = grant.map(to_pretty_json).transpose()?;

        Ok(Self {
            result,
            event: Some(event.to_string()),
        })
    }
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("no view named `{0}`")]
    NotFound(String),

    #[error(transparent)]
    Template(#[from] askama::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl IntoResponse for ViewError {
    fn into_response(self) -> Response {
        tracing::error!(err = %self, "could not render view");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

/// Renders the named view.
pub fn render(view: &str, payload: &Payload) -> Result<Html<String>, ViewError> {
    match view {
        "index" => {
            let template = IndexTemplate {
                result: payload.result.as_deref(),
                event: payload.event.as_deref(),
            };
            Ok(Html(template.render()?))
        }
        other => Err(ViewError::NotFound(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_without_payload() {
        let Html(body) = render("index", &Payload::default()).unwrap();
        assert!(body.contains("Keycloak Example App"));
        assert!(!body.contains("id=\"output\""));
    }

    #[test]
    fn index_with_grant() {
        let grant = Grant::bearer("some-token");
        let payload =
            Payload::with_grant(Some(&grant), "1. Authentication\n2. Login").unwrap();
        let Html(body) = render("index", &payload).unwrap();

        assert!(body.contains("some-token"));
        assert!(body.contains("1. Authentication\n2. Login"));
        // Keys are indented by four spaces.
        assert!(payload.result.unwrap().contains("\n    "));
    }

    #[test]
    fn unknown_view() {
        let err = render("missing", &Payload::default()).unwrap_err();
        assert!(matches!(err, ViewError::NotFound(name) if name == "missing"));
        assert_eq!(
            ViewError::NotFound("missing".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

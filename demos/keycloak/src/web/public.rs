use axum::{routing::get, Router};

pub fn router() -> Router<()> {
    Router::new().route("/", get(self::get::index))
}

mod get {
    use axum::response::Html;

    use crate::web::view::{render, Payload, ViewError};

    pub async fn index() -> Result<Html<String>, ViewError> {
        render("index", &Payload::default())
    }
}

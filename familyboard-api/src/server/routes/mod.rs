use crate::server::ServerRouter;
use axum::{Router, routing::get};

mod posts;

pub fn routes() -> ServerRouter {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .merge(posts::routes())
}

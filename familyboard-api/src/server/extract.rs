use crate::server::ServerError;
use axum::{
    Json as AxumJson,
    extract::{FromRequest, FromRequestParts, Query as AxumQuery},
    response::{IntoResponse, Response},
};
use axum_extra::TypedHeader;
use headers::ContentType;
use serde::Serialize;

/// JSON body whose rejections and serialization failures become [`ServerError`]s.
#[derive(FromRequest, Debug, Clone, Copy, Default)]
#[from_request(via(AxumJson), rejection(ServerError))]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(json) => (TypedHeader(ContentType::json()), json).into_response(),
            Err(err) => ServerError::JsonResponse(err).into_response(),
        }
    }
}

#[derive(FromRequestParts, Debug, Clone, Default)]
#[from_request(via(AxumQuery), rejection(ServerError))]
pub struct Query<T>(pub T);

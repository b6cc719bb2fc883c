use axum::{http::header, response::IntoResponse, Json};
use utoipa::OpenApi;

use crate::ApiDoc;

/// OpenAPI description of the HTTP surface
#[utoipa::path(
    get,
    path = "/.well-known/openapi.json",
    responses(
        (status = 200, description = "OpenAPI document")
    ),
    tag = "Well-Known"
)]
pub async fn openapi() -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(ApiDoc::openapi()),
    )
}

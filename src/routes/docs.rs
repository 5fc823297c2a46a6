use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

pub const SWAGGER_UI_PATH: &str = "/docs";
pub const OPENAPI_JSON_PATH: &str = "/api-doc/openapi.json";

/// Swagger UI for the quiz API plus the raw OpenAPI document it reads.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::<SharedState>::from(
        SwaggerUi::new(SWAGGER_UI_PATH).url(OPENAPI_JSON_PATH, ApiDoc::openapi()),
    )
    .with_state(state)
}

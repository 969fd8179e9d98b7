use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

const SWAGGER_PATH: &str = "/docs";
const OPENAPI_JSON_PATH: &str = "/api-doc/openapi.json";

/// Swagger UI for the invitation API, backed by the generated OpenAPI document.
pub fn router(state: SharedState) -> Router<SharedState> {
    let swagger: Router<SharedState> = SwaggerUi::new(SWAGGER_PATH)
        .url(OPENAPI_JSON_PATH, ApiDoc::openapi())
        .into();

    swagger.with_state(state)
}

mod execute;
mod languages;

pub use execute::execute_handler;
pub use languages::languages_handler;

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{HttpRequest, HttpResponse, web};
use serde::Serialize;

use crate::engine::EngineError;

#[derive(Serialize)]
struct ErrorResponse {
    reason: &'static str,
    code: u32,
    message: String,
}

impl From<&EngineError> for ErrorResponse {
    fn from(err: &EngineError) -> Self {
        Self {
            reason: err.reason(),
            code: err.code(),
            message: err.public_message(),
        }
    }
}

/// Registers every route of the service
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/execute").route(web::post().to(execute_handler)))
        // Path used by the editor client
        .service(web::resource("/api/projects/execute").route(web::post().to(execute_handler)))
        .service(web::resource("/languages").route(web::get().to(languages_handler)));
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let message = format!("Invalid request: {err}");
    let response = HttpResponse::BadRequest().json(ErrorResponse {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
        message,
    });
    InternalError::from_response(err, response).into()
}

/// Maps a rejected request to its status code and body
fn error_response(err: &EngineError) -> HttpResponse {
    let body = ErrorResponse::from(err);
    match err {
        EngineError::Invalid(_) => HttpResponse::BadRequest().json(body),
        EngineError::ToolchainUnavailable(_) => HttpResponse::UnprocessableEntity().json(body),
        EngineError::Infrastructure(_) => HttpResponse::InternalServerError().json(body),
    }
}

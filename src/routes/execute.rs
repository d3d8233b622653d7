use actix_web::{HttpResponse, Responder, web};

use super::error_response;
use crate::engine::{Engine, EngineError, ExecutionRequest};

pub async fn execute_handler(
    engine: web::Data<Engine>,
    body: web::Json<ExecutionRequest>,
) -> impl Responder {
    match engine.execute(&body).await {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(e) => {
            match &e {
                EngineError::Infrastructure(detail) => {
                    log::error!("Error executing code: {detail}")
                }
                other => log::info!("Rejected execution request: {other}"),
            }
            error_response(&e)
        }
    }
}

use actix_web::{HttpResponse, Responder, web};

use crate::engine::Engine;

pub async fn languages_handler(engine: web::Data<Engine>) -> impl Responder {
    let languages = engine.languages().await;
    log::info!(
        "Reported {} languages, {} available",
        languages.len(),
        languages.iter().filter(|l| l.available).count()
    );
    HttpResponse::Ok().json(languages)
}

use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::routes::{configure, json_error_handler};

pub fn build_server(server_config: ServerConfig, engine: web::Data<Engine>) -> std::io::Result<Server> {
    let json_limit = server_config.max_body_bytes.as_usize();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(engine.clone())
            .app_data(
                web::JsonConfig::default()
                    .limit(json_limit)
                    .error_handler(json_error_handler),
            )
            .wrap(middleware::Logger::default())
            .configure(configure)
    })
    .bind((server_config.bind_address.as_str(), server_config.bind_port))?
    .run();

    log::info!(
        "Listening on {}:{}",
        server_config.bind_address,
        server_config.bind_port
    );

    Ok(server)
}

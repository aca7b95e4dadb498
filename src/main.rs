mod config;
mod errors;
mod handlers;
mod models;
mod service;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use log::info;
use std::path::Path;
use std::sync::Arc;

use crate::config::Settings;
use crate::service::{DrService, Inference};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let settings = Settings::load()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;

    let env = env_logger::Env::default().default_filter_or(settings.log_level.as_str());
    env_logger::Builder::from_env(env).init();

    let service = DrService::new(
        Path::new(&settings.model_path),
        Path::new(&settings.media_root),
    )?;
    let service: Arc<dyn Inference> = Arc::new(service);
    let service = web::Data::from(service);

    info!(
        "DR detection API listening on http://{}:{}",
        settings.host, settings.port
    );

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(service.clone())
            .configure(handlers::configure)
    })
    .bind((settings.host.as_str(), settings.port))?
    .run()
    .await
}

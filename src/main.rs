use actix_cors::Cors;
use actix_files::Files;
use actix_web::middleware::NormalizePath;
use actix_web::web::{Data, JsonConfig};
use actix_web::{App, HttpServer, ResponseError, http::header};
use std::time::Duration;

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod lifecycle;
mod model;
mod models;
mod routes;
mod utils;

use config::Config;
use db::init_db;
use error::ApiError;

use crate::docs::ApiDoc;
use crate::lifecycle::store;
use crate::utils::{schedule_cache, username_filter};
use sqlx::MySqlPool;
use tracing::{error, info};
use tracing_appender::rolling;
use utoipa::OpenApi; // ← needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

/// Expires overdue leave permissions every `every` until the runtime stops.
async fn expiry_sweep(pool: MySqlPool, config: Config, every: Duration) {
    let mut ticker = actix_web::rt::time::interval(every);
    loop {
        ticker.tick().await;
        match store::expire_due(&pool, config.school_now()).await {
            Ok((0, _)) => {}
            Ok((expired, summary)) => info!(expired, ?summary, "Expiry sweep finished"),
            Err(e) => error!(error = %e, "Expiry sweep failed"),
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "absensi.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(config.log_level)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    info!(addr = %config.server_addr, "Server starting...");

    let pool = init_db(&config.database_url).await?;
    schedule_cache::init(Duration::from_secs(config.schedule_cache_ttl_secs));

    let pool_for_filter_warmup = pool.clone();
    actix_web::rt::spawn(async move {
        if let Err(e) = username_filter::warmup_username_filter(&pool_for_filter_warmup, 500).await
        {
            error!(error = %e, "Failed to warmup username filter");
        }
    });

    if config.expiry_sweep_secs > 0 {
        actix_web::rt::spawn(expiry_sweep(
            pool.clone(),
            config.clone(),
            Duration::from_secs(config.expiry_sweep_secs),
        ));
    } else {
        info!("Leave permission expiry sweep disabled");
    }

    let server_addr = config.server_addr.clone();

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&config.cors_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
            .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE])
            .max_age(3600);

        let json_config = JsonConfig::default()
            .limit(256 * 1024)
            .error_handler(|err, _req| {
                let message = format!("Invalid JSON body: {err}");
                actix_web::error::InternalError::from_response(
                    err,
                    ApiError::BadRequest(message).error_response(),
                )
                .into()
            });

        let config_data = config.clone();

        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .wrap(cors)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // ← important: wildcard {_:.*} to match JS/CSS files
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .service(Files::new("/uploads", &config.upload_dir))
            .app_data(json_config)
            .app_data(Data::new(pool.clone()))
            .app_data(Data::new(config.clone()))
            // Configure auth + protected routes with rate limiting
            .configure(move |cfg| routes::configure(cfg, config_data))
    })
    .bind(server_addr)?
    .run()
    .await?;

    Ok(())
}

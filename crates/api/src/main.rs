mod api;
mod auth;
mod errors;
mod observability;

use actix_cors::Cors;
use actix_web::{
    App, HttpServer,
    http::header,
    middleware::{Compress, DefaultHeaders},
    web,
};
use anyhow::Result;
use dotenvy::dotenv;
use semantic_video_core::blob::{BlobStore, S3BlobStore};
use semantic_video_core::config::AppConfig;
use semantic_video_core::jobstore::{JobStore, PostgresJobStore};
use semantic_video_core::queue::{MessageQueue, NatsMessageQueue};
use std::sync::Arc;
use tracing::info;
use utoipa::OpenApi;
use utoipa_actix_web::AppExt;
use utoipa_swagger_ui::SwaggerUi;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(OpenApi)]
#[openapi(info(title = "Video Pipeline API"))]
struct ApiDoc;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env()?;
    let prometheus = observability::init_observability(&config.observability)?;

    let hostname = config.server.hostname.clone();
    let port = config.server.port;
    let address = format!("http://{}:{}", hostname, port);
    let shutdown_timeout = config.server.shutdown_timeout_secs.unwrap_or(30);

    let postgres_job_store = PostgresJobStore::connect(&config.database).await?;
    let pg_pool = postgres_job_store.pool().clone();
    let job_store: Arc<dyn JobStore> = Arc::new(postgres_job_store);

    let s3_client = S3BlobStore::initialize_client(&config.blob_store).await;
    let blob_store: Arc<dyn BlobStore> = Arc::new(S3BlobStore::new(s3_client.clone(), &config.blob_store));

    let message_queue: Arc<dyn MessageQueue> = Arc::new(NatsMessageQueue::connect(&config.queue).await?);
    let nats_health_client = async_nats::connect(&config.queue.queue_url).await?;

    let cors_origins = config.server.cors_allowed_origins.clone();
    let blob_config = config.blob_store.clone();
    let owner_header = header::HeaderName::from_static("x-owner-id");

    let server = HttpServer::new(move || {
        let cors = if cors_origins.is_empty() {
            Cors::default()
                .allowed_origin(&address)
                .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                .allowed_headers(vec![header::CONTENT_TYPE, header::ACCEPT, owner_header.clone()])
                .max_age(3600)
        } else {
            let mut cors = Cors::default()
                .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                .allowed_headers(vec![header::CONTENT_TYPE, header::ACCEPT, owner_header.clone()])
                .max_age(3600);
            for origin in &cors_origins {
                cors = cors.allowed_origin(origin);
            }
            cors
        };

        let security_headers = DefaultHeaders::new()
            .add(("X-Content-Type-Options", "nosniff"))
            .add(("X-Frame-Options", "DENY"))
            .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

        App::new()
            .wrap(prometheus.clone())
            .wrap(cors)
            .wrap(security_headers)
            .wrap(Compress::default())
            .app_data(web::Data::new(job_store.clone()))
            .app_data(web::Data::new(blob_store.clone()))
            .app_data(web::Data::new(message_queue.clone()))
            .app_data(web::Data::new(blob_config.clone()))
            .app_data(web::Data::new(pg_pool.clone()))
            .app_data(web::Data::new(s3_client.clone()))
            .app_data(web::Data::new(nats_health_client.clone()))
            .into_utoipa_app()
            .openapi(ApiDoc::openapi())
            .service(api::videos::initiate_upload)
            .service(api::videos::complete_upload)
            .service(api::analysis_jobs::get_analysis_job)
            .service(api::analysis_jobs::export_analysis_job_pdf)
            .service(api::sessions::create_session)
            .service(api::sessions::list_sessions)
            .service(api::sessions::delete_session)
            .service(api::sessions::bulk_delete_sessions)
            .openapi_service(|api| SwaggerUi::new("/swagger-ui/{_:.*}").url("/api/openapi.json", api))
            .into_app()
            .service(api::health::liveness)
            .service(api::health::readiness)
    });

    info!("server running at http://{}:{}", hostname, port);
    server
        .bind((hostname, port))?
        .shutdown_timeout(shutdown_timeout)
        .run()
        .await?;

    info!("Shutting down gracefully...");

    Ok(())
}

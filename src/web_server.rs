use crate::config::AppConfig;
use crate::error::AppError;
use crate::images::ImageDto;
use crate::pagination::{PageRequest, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::service::ImageService;
use actix_web::{http::header, middleware::Logger, web, App, HttpRequest, HttpResponse, HttpServer};
use serde::Deserialize;
use std::sync::Arc;

const ENTITY_API_URL: &str = "/api/images";

#[derive(Deserialize, Debug)]
struct SearchParams {
    #[serde(default)]
    query: String,
    size: Option<usize>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ReconcileParams {
    #[serde(default)]
    dry_run: bool,
}

async fn list_images(
    service: web::Data<ImageService>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let page = PageRequest::parse(req.query_string())?;
    let (images, total) = service.find_page(page).await?;
    Ok(HttpResponse::Ok()
        .insert_header(("X-Total-Count", total.to_string()))
        .json(images))
}

async fn create_image(
    service: web::Data<ImageService>,
    body: web::Json<ImageDto>,
) -> Result<HttpResponse, AppError> {
    let created = service.create(body.into_inner()).await?;
    log::info!("Created image {}", created.id);
    Ok(HttpResponse::Created()
        .insert_header((header::LOCATION, format!("{}/{}", ENTITY_API_URL, created.id)))
        .json(created))
}

async fn get_image(
    service: web::Data<ImageService>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let image = service.find_one(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(image))
}

async fn update_image(
    service: web::Data<ImageService>,
    path: web::Path<i64>,
    body: web::Json<ImageDto>,
) -> Result<HttpResponse, AppError> {
    let updated = service.update(path.into_inner(), body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(updated))
}

async fn patch_image(
    service: web::Data<ImageService>,
    path: web::Path<i64>,
    body: web::Json<ImageDto>,
) -> Result<HttpResponse, AppError> {
    let updated = service
        .partial_update(path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(updated))
}

async fn delete_image(
    service: web::Data<ImageService>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    service.delete(id).await?;
    log::info!("Deleted image {}", id);
    Ok(HttpResponse::NoContent().finish())
}

async fn search_images(
    service: web::Data<ImageService>,
    params: web::Query<SearchParams>,
) -> Result<HttpResponse, AppError> {
    let size = params.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let images = service.search(&params.query, size).await?;
    Ok(HttpResponse::Ok().json(images))
}

async fn method_not_allowed() -> Result<HttpResponse, AppError> {
    Err(AppError::MethodNotAllowed)
}

async fn health(service: web::Data<ImageService>) -> HttpResponse {
    let (records, indexed, pending) = futures::join!(
        service.store().count(),
        service.searcher().count_images(),
        service.store().pending_count(),
    );

    match (records, indexed, pending) {
        (Ok(records), Ok(indexed), Ok(pending)) => HttpResponse::Ok().json(serde_json::json!({
            "status": "UP",
            "records": records,
            "indexed": indexed,
            "pendingSync": pending,
        })),
        (records, indexed, pending) => {
            let errors: Vec<String> = [records.err(), indexed.err(), pending.err()]
                .into_iter()
                .flatten()
                .map(|e| e.to_string())
                .collect();
            log::warn!("Health check failed: {:?}", errors);
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "DOWN",
                "errors": errors,
            }))
        }
    }
}

async fn sync_status(service: web::Data<ImageService>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(service.bridge().status().await?))
}

async fn reconcile(
    service: web::Data<ImageService>,
    params: web::Query<ReconcileParams>,
) -> Result<HttpResponse, AppError> {
    let report = service.bridge().reconcile(!params.dry_run).await?;
    Ok(HttpResponse::Ok().json(report))
}

/// Registers every route plus extractor settings. Shared by the server and
/// the HTTP tests.
pub fn configure(cfg: &mut web::ServiceConfig, max_body_bytes: usize) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(max_body_bytes)
            .error_handler(|err, _req| AppError::InvalidRequest(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| AppError::InvalidRequest(err.to_string()).into()),
    )
    .service(
        web::resource(ENTITY_API_URL)
            .route(web::get().to(list_images))
            .route(web::post().to(create_image))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/api/images/{id}")
            .route(web::get().to(get_image))
            .route(web::put().to(update_image))
            .route(web::patch().to(patch_image))
            .route(web::delete().to(delete_image))
            .default_service(web::to(method_not_allowed)),
    )
    .service(web::resource("/api/_search/images").route(web::get().to(search_images)))
    .service(web::resource("/management/health").route(web::get().to(health)))
    .service(web::resource("/management/sync").route(web::get().to(sync_status)))
    .service(web::resource("/management/sync/reconcile").route(web::post().to(reconcile)));
}

pub async fn start_web_server(config: Arc<AppConfig>, service: ImageService) -> std::io::Result<()> {
    let port = config.web_port;
    let max_body_bytes = config.max_body_bytes;
    let service_data = web::Data::new(service);

    log::info!("Starting web server on port: {}", port);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(service_data.clone())
            .configure(|cfg| configure(cfg, max_body_bytes))
    })
    .bind(format!("0.0.0.0:{}", port))?
    .run()
    .await
}

use crate::errors::ApiError;
use crate::models::{
    ApiInfo, ClassInfo, HealthResponse, ModelInfoResponse, PredictResponse,
};
use crate::service::Inference;
use actix_multipart::Multipart;
use actix_web::http::header::ContentType;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use log::{debug, error};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const HOME_PAGE: &str = include_str!("../templates/home.html");

struct UploadedImage {
    bytes: Vec<u8>,
    content_type: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/")
            .route(web::get().to(home_page))
            .route(web::post().to(api_info)),
    )
    .service(web::resource("/predict/").route(web::post().to(predict)))
    .service(web::resource("/health/").route(web::get().to(health)))
    .service(web::resource("/model-info/").route(web::get().to(model_info)));
}

async fn home_page() -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(HOME_PAGE)
}

async fn api_info() -> HttpResponse {
    HttpResponse::Ok().json(ApiInfo {
        message: "DR Detection API",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn predict(
    service: web::Data<dyn Inference>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let upload = read_image_field(&mut payload).await?;
    debug!(
        "Accepted upload: {} ({} bytes)",
        upload.content_type,
        upload.bytes.len()
    );

    // Inference is CPU bound; keep it off the async workers.
    let service = service.clone();
    let outcome = web::block(move || service.process_image(&upload.bytes))
        .await
        .map_err(|err| {
            error!("Inference worker failed: {err}");
            ApiError::Unexpected
        })?;

    let prediction = outcome.map_err(|err| {
        error!("Prediction failed: {err}");
        ApiError::Prediction(err.to_string())
    })?;

    Ok(HttpResponse::Ok().json(PredictResponse::from_prediction(prediction)))
}

async fn health(service: web::Data<dyn Inference>) -> HttpResponse {
    let model_loaded = service.model_loaded();
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        model_loaded,
        demo_mode: !model_loaded,
    })
}

async fn model_info(service: web::Data<dyn Inference>) -> HttpResponse {
    let model_loaded = service.model_loaded();
    let classes = service
        .class_labels()
        .iter()
        .map(|label| ClassInfo {
            name: (*label).to_string(),
            description: crate::models::describe_class(label),
        })
        .collect();

    HttpResponse::Ok().json(ModelInfoResponse {
        model_type: "Convolutional Neural Network",
        input_shape: [224, 224, 3],
        classes,
        model_loaded,
        demo_mode: !model_loaded,
    })
}

/// Pulls the `image` field out of the multipart payload. Validation order is
/// fixed: field presence, then declared content type, then size (checked
/// while streaming so an oversized body is cut off early). Other fields are
/// drained and ignored.
async fn read_image_field(payload: &mut Multipart) -> Result<UploadedImage, ApiError> {
    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|err| {
            error!("Malformed multipart payload: {err}");
            ApiError::Unexpected
        })?;

        if field.name() != "image" {
            while let Some(chunk) = field.next().await {
                chunk.map_err(|err| {
                    error!("Malformed multipart payload: {err}");
                    ApiError::Unexpected
                })?;
            }
            continue;
        }

        let content_type = field.content_type().to_string();
        if !content_type.starts_with("image/") {
            return Err(ApiError::InvalidFileType);
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|err| {
                error!("Failed to read upload: {err}");
                ApiError::Unexpected
            })?;
            if bytes.len() + data.len() > MAX_UPLOAD_BYTES {
                return Err(ApiError::FileTooLarge);
            }
            bytes.extend_from_slice(&data);
        }

        return Ok(UploadedImage {
            bytes,
            content_type,
        });
    }

    Err(ApiError::MissingImage)
}

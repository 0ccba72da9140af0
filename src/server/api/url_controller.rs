use axum::{Json, Router, routing::post};
use tracing::{debug, error};
use validator::Validate;

use crate::server::{
    dtos::url_dto::{
        EncodedUrlResponse, GenerateMultiUrlRequest, GenerateMultiUrlResponse, GenerateUrlRequest,
        GenerateUrlResponse,
    },
    error::{AppResult, Error},
    services::UrlGenerator,
};

pub struct UrlController;

impl UrlController {
    pub fn app() -> Router {
        Router::new()
            .route("/generate_url", post(Self::generate_url))
            .route("/generate_urls", post(Self::generate_urls))
            .route(
                "/generate_encrypted_or_encoded_url",
                post(Self::generate_encrypted_or_encoded_url),
            )
    }

    async fn generate_url(
        Json(request): Json<GenerateUrlRequest>,
    ) -> AppResult<Json<GenerateUrlResponse>> {
        Ok(Json(GenerateUrlResponse {
            url: Self::generate_single(request)?,
        }))
    }

    // deprecated, same as generate_url with the old response field
    async fn generate_encrypted_or_encoded_url(
        Json(request): Json<GenerateUrlRequest>,
    ) -> AppResult<Json<EncodedUrlResponse>> {
        debug!("deprecated /generate_encrypted_or_encoded_url called");
        Ok(Json(EncodedUrlResponse {
            encoded_url: Self::generate_single(request)?,
        }))
    }

    async fn generate_urls(
        Json(request): Json<GenerateMultiUrlRequest>,
    ) -> AppResult<Json<GenerateMultiUrlResponse>> {
        request.validate().map_err(|e| {
            error!("invalid generate_urls request: {}", e);
            Error::BadRequest(e.to_string())
        })?;

        let generator = UrlGenerator::new(
            request.mediaflow_proxy_url,
            request.api_password,
            request.expiration,
            request.ip.map(|ip| ip.to_string()),
        );

        Ok(Json(GenerateMultiUrlResponse {
            urls: generator.generate_all(&request.urls)?,
        }))
    }

    fn generate_single(request: GenerateUrlRequest) -> AppResult<String> {
        request.validate().map_err(|e| {
            error!("invalid generate_url request: {}", e);
            Error::BadRequest(e.to_string())
        })?;

        let generator = UrlGenerator::new(
            request.mediaflow_proxy_url,
            request.api_password,
            request.expiration,
            request.ip.map(|ip| ip.to_string()),
        );

        Ok(generator.generate(&request.item)?)
    }
}

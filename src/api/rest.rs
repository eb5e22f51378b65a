//! Axum REST API handlers

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::config::ServerConfig;
use crate::error::OcrError;
use crate::service::OcrService;
use crate::utils::image::{decode_base64_image, is_supported_image_type};

use super::dto::*;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Application state shared across handlers
pub struct AppState {
    pub service: Arc<OcrService>,
    pub start_time: Instant,
}

/// Create the REST API router
pub fn create_rest_router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(index_handler))
        // Recognition
        .route("/ocr", post(ocr_handler))
        .route("/api/ocr", post(ocr_handler))
        // System endpoints
        .route("/health", get(health_handler))
        .route("/api/ocr/health", get(health_handler))
        .method_not_allowed_fallback(method_not_allowed_handler)
        .fallback(not_found_handler)
        // Middleware
        .layer(DefaultBodyLimit::max(server.body_limit_mb * 1024 * 1024))
        .layer(middleware::from_fn_with_state(
            Duration::from_secs(server.request_timeout_secs),
            request_timeout,
        ))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Answer 504 with the error envelope when a request outlives `limit`.
///
/// The blocking recognition task keeps running; only the response is abandoned.
async fn request_timeout(State(limit): State<Duration>, request: Request, next: Next) -> Response {
    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!("Request timed out after {:?}", limit);
            api_error(
                StatusCode::GATEWAY_TIMEOUT,
                "OCR service timeout - request took too long",
                "TIMEOUT",
            )
            .into_response()
        }
    }
}

fn api_error(status: StatusCode, message: &str, code: &str) -> ApiError {
    (status, Json(ErrorResponse::new(message, code)))
}

fn missing_image() -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "No Image Provided", "MISSING_IMAGE")
}

/// Map a core failure to its HTTP status.
fn ocr_error(e: &OcrError) -> ApiError {
    let status = match e {
        OcrError::Decode(_) | OcrError::UnknownVariant { .. } => StatusCode::BAD_REQUEST,
        OcrError::Construction { .. } => StatusCode::SERVICE_UNAVAILABLE,
        OcrError::Recognition { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if e.is_caller_error() {
        warn!("Rejected OCR request: {}", e);
    } else {
        error!("OCR request failed: {}", e);
    }
    api_error(status, &e.to_string(), e.code())
}

/// Recognition handler
///
/// Accepts either a multipart upload (`image` file plus optional `model`
/// field) or a JSON body `{"image": "<base64>", "model": "..."}`.
async fn ocr_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<OcrResponse>, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let (image_data, variant) = if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|r| api_error(r.status(), &r.body_text(), "MULTIPART_ERROR"))?;
        read_multipart(multipart).await?
    } else if content_type.starts_with("application/json") {
        let Json(body) = Json::<OcrJsonRequest>::from_request(request, &state)
            .await
            .map_err(|r| api_error(r.status(), &r.body_text(), "INVALID_JSON"))?;
        let encoded = body
            .image
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(missing_image)?;
        let image_data = decode_base64_image(&encoded).map_err(|e| {
            api_error(StatusCode::BAD_REQUEST, &format!("{:#}", e), "INVALID_BASE64")
        })?;
        (image_data, body.model)
    } else {
        return Err(api_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Expected multipart/form-data or application/json",
            "UNSUPPORTED_MEDIA_TYPE",
        ));
    };

    let variant = variant
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let result = state
        .service
        .recognize(image_data, variant)
        .await
        .map_err(|e| ocr_error(&e))?;

    Ok(Json(OcrResponse {
        success: true,
        variant: result.variant,
        result: result.regions,
        inference_time_ms: result.inference_time_ms,
    }))
}

async fn read_multipart(mut multipart: Multipart) -> Result<(Vec<u8>, Option<String>), ApiError> {
    let mut image_data: Option<Vec<u8>> = None;
    let mut variant: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(e.status(), &e.body_text(), "MULTIPART_ERROR"))?
    {
        let name = field.name().unwrap_or("").to_string();

        if name == "image" {
            if let Some(content_type) = field.content_type() {
                if !is_supported_image_type(content_type) {
                    return Err(api_error(
                        StatusCode::BAD_REQUEST,
                        "Invalid file type. Only image files are allowed.",
                        "UNSUPPORTED_IMAGE_TYPE",
                    ));
                }
            }
            image_data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| api_error(e.status(), &e.body_text(), "READ_ERROR"))?
                    .to_vec(),
            );
        } else if name == "model" || name == "variant" {
            variant = Some(
                field
                    .text()
                    .await
                    .map_err(|e| api_error(e.status(), &e.body_text(), "READ_ERROR"))?,
            );
        }
    }

    let image_data = image_data.filter(|d| !d.is_empty()).ok_or_else(missing_image)?;
    Ok((image_data, variant))
}

/// Health check
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let runtime = state.service.describe_runtime();
    let variants_loaded = state
        .service
        .variants()
        .into_iter()
        .filter(|v| v.loaded)
        .map(|v| v.id)
        .collect();

    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        device: runtime.device,
        accelerator_available: runtime.accelerator_available,
        accelerator_count: runtime.accelerator_count,
        runtime_loaded: runtime.runtime_loaded,
        variants_loaded,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Service description
async fn index_handler(State(state): State<Arc<AppState>>) -> Json<ServiceInfoResponse> {
    Json(ServiceInfoResponse {
        name: "roocr".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        default_variant: state.service.default_variant().to_string(),
        endpoints: vec![
            EndpointDto::new("GET", "/health", "Service and device status"),
            EndpointDto::new(
                "POST",
                "/ocr",
                "Recognize text (multipart 'image' or JSON base64 'image')",
            ),
            EndpointDto::new("POST", "/api/ocr", "Alias of /ocr"),
            EndpointDto::new("GET", "/api/ocr/health", "Alias of /health"),
        ],
        variants: state.service.variants(),
    })
}

async fn not_found_handler() -> ApiError {
    api_error(StatusCode::NOT_FOUND, "Endpoint not found", "NOT_FOUND")
}

async fn method_not_allowed_handler() -> ApiError {
    api_error(
        StatusCode::METHOD_NOT_ALLOWED,
        "Method not allowed for this endpoint",
        "METHOD_NOT_ALLOWED",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, VariantConfig};
    use crate::engine::{
        ComputeDevice, DeviceSelection, EngineFactory, EngineRegistry, OcrEngine, PixelBuffer,
        RecognizeOptions, TextRegion,
    };
    use axum::body::Body;
    use base64::Engine;
    use http_body_util::BodyExt;
    use std::io::Cursor;
    use tower::ServiceExt;

    struct FixedEngine;

    impl OcrEngine for FixedEngine {
        fn recognize(
            &mut self,
            _image: &PixelBuffer,
            _options: &RecognizeOptions,
        ) -> anyhow::Result<Vec<TextRegion>> {
            Ok(vec![TextRegion {
                bbox: [[10.0, 40.0], [90.0, 40.0], [90.0, 60.0], [10.0, 60.0]],
                text: "TEST".to_string(),
                confidence: 0.98,
            }])
        }
    }

    struct TestFactory {
        fail: bool,
        delay: Duration,
    }

    impl EngineFactory for TestFactory {
        fn build(
            &self,
            _variant_id: &str,
            _config: &VariantConfig,
            _device: ComputeDevice,
        ) -> anyhow::Result<Box<dyn OcrEngine>> {
            std::thread::sleep(self.delay);
            if self.fail {
                anyhow::bail!("detection model not found");
            }
            Ok(Box::new(FixedEngine))
        }
    }

    fn app_with(fail: bool, server: ServerConfig) -> Router {
        app_with_factory(
            TestFactory {
                fail,
                delay: Duration::ZERO,
            },
            server,
        )
    }

    fn app_with_factory(factory: TestFactory, server: ServerConfig) -> Router {
        let config = Config::default();
        let registry =
            EngineRegistry::new(&config, ComputeDevice::GeneralPurpose, Arc::new(factory))
                .unwrap();
        let selection = DeviceSelection {
            device: ComputeDevice::GeneralPurpose,
            runtime_loaded: true,
            accelerator_available: false,
            accelerator_count: 0,
        };
        let service = OcrService::new(Arc::new(registry), selection, "standard");
        let state = Arc::new(AppState {
            service: Arc::new(service),
            start_time: Instant::now(),
        });
        create_rest_router(state, &server)
    }

    fn app() -> Router {
        app_with(false, ServerConfig::default())
    }

    fn png() -> Vec<u8> {
        let image = image::RgbImage::from_pixel(100, 100, image::Rgb([255, 255, 255]));
        let mut buffer = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut buffer, image::ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    const BOUNDARY: &str = "roocr-test-boundary";

    fn multipart_body(image: Option<(&str, Vec<u8>)>, model: Option<&str>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some((content_type, data)) = image {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\n\
                     Content-Disposition: form-data; name=\"image\"; filename=\"test.png\"\r\n\
                     Content-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(&data);
            body.extend_from_slice(b"\r\n");
        }
        if let Some(model) = model {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\n\
                     Content-Disposition: form-data; name=\"model\"\r\n\r\n{model}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn multipart_request(path: &str, body: Vec<u8>) -> Request {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(path: &str, body: serde_json::Value) -> Request {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: Router, request: Request) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let body = multipart_body(Some(("image/png", png())), Some("ocr"));
        let (status, json) = send(app(), multipart_request("/ocr", body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["variant"], "standard");
        assert_eq!(json["result"][0]["text"], "TEST");
        assert_eq!(json["result"][0]["bbox"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_json_base64_with_data_url() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png());
        let body = serde_json::json!({
            "image": format!("data:image/png;base64,{}", encoded),
            "variant": "high-accuracy",
        });
        let (status, json) = send(app(), json_request("/api/ocr", body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["variant"], "high-accuracy");
        assert!(json["inference_time_ms"].is_u64());
    }

    #[tokio::test]
    async fn test_missing_image() {
        let body = serde_json::json!({"model": "ocr"});
        let (status, json) = send(app(), json_request("/ocr", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "No Image Provided");
        assert_eq!(json["code"], "MISSING_IMAGE");

        let body = multipart_body(None, Some("ocr"));
        let (status, json) = send(app(), multipart_request("/ocr", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "MISSING_IMAGE");
    }

    #[tokio::test]
    async fn test_invalid_base64() {
        let body = serde_json::json!({"image": "%%% not base64 %%%"});
        let (status, json) = send(app(), json_request("/ocr", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "INVALID_BASE64");
    }

    #[tokio::test]
    async fn test_undecodable_image() {
        let body = multipart_body(Some(("image/jpeg", b"not really a jpeg".to_vec())), None);
        let (status, json) = send(app(), multipart_request("/ocr", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "DECODE_FAILED");
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn test_unknown_variant() {
        let body = multipart_body(Some(("image/png", png())), Some("nonexistent"));
        let (status, json) = send(app(), multipart_request("/ocr", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "UNKNOWN_VARIANT");
        let message = json["error"].as_str().unwrap();
        assert!(message.contains("Valid options: high-accuracy, standard"));
    }

    #[tokio::test]
    async fn test_rejected_upload_type() {
        let body = multipart_body(Some(("application/pdf", b"%PDF-1.4".to_vec())), None);
        let (status, json) = send(app(), multipart_request("/ocr", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "UNSUPPORTED_IMAGE_TYPE");
    }

    #[tokio::test]
    async fn test_unsupported_body() {
        let request = Request::builder()
            .method("POST")
            .uri("/ocr")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hello"))
            .unwrap();
        let (status, json) = send(app(), request).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(json["code"], "UNSUPPORTED_MEDIA_TYPE");
    }

    #[tokio::test]
    async fn test_engine_unavailable() {
        let body = multipart_body(Some(("image/png", png())), None);
        let app = app_with(true, ServerConfig::default());
        let (status, json) = send(app, multipart_request("/ocr", body)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["code"], "ENGINE_UNAVAILABLE");
        assert!(json["error"].as_str().unwrap().contains("detection model not found"));
    }

    #[tokio::test]
    async fn test_body_limit() {
        let server = ServerConfig {
            body_limit_mb: 1,
            ..ServerConfig::default()
        };
        let body = serde_json::json!({"image": "A".repeat(2 * 1024 * 1024)});
        let (status, _) = send(app_with(false, server), json_request("/ocr", body)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let request = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let (status, json) = send(app(), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Endpoint not found");
    }

    #[tokio::test]
    async fn test_wrong_method_gets_error_envelope() {
        let request = Request::builder().uri("/ocr").body(Body::empty()).unwrap();
        let (status, json) = send(app(), request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "METHOD_NOT_ALLOWED");
    }

    #[tokio::test]
    async fn test_slow_request_times_out_with_error_envelope() {
        let server = ServerConfig {
            request_timeout_secs: 1,
            ..ServerConfig::default()
        };
        let factory = TestFactory {
            fail: false,
            delay: Duration::from_millis(1500),
        };
        let body = multipart_body(Some(("image/png", png())), None);
        let (status, json) =
            send(app_with_factory(factory, server), multipart_request("/ocr", body)).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "TIMEOUT");
        assert!(json["error"].as_str().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_health_reports_device_and_loaded_variants() {
        let app = app();

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, json) = send(app.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["healthy"], true);
        assert_eq!(json["device"], "cpu");
        assert_eq!(json["accelerator_available"], false);
        assert_eq!(json["variants_loaded"].as_array().unwrap().len(), 0);

        let body = multipart_body(Some(("image/png", png())), None);
        let (status, _) = send(app.clone(), multipart_request("/ocr", body)).await;
        assert_eq!(status, StatusCode::OK);

        let request = Request::builder().uri("/api/ocr/health").body(Body::empty()).unwrap();
        let (_, json) = send(app, request).await;
        assert_eq!(json["variants_loaded"][0], "standard");
    }

    #[tokio::test]
    async fn test_index_lists_variants() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, json) = send(app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["default_variant"], "standard");
        assert_eq!(json["variants"].as_array().unwrap().len(), 2);
    }
}

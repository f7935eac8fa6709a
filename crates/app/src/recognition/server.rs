//! Actix Web preview server exposing the MJPEG stream and the engine API.
//!
//! Every engine call may block on a lock, a camera or a model, so handlers run
//! them through `web::block` and each viewer's frame loop gets its own thread.

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use ml_core::FrameLabel;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::recognition::{
    data::StreamChunk,
    engine::RecognitionEngine,
    lifecycle::CameraStatus,
    single_frame::decode_data_url,
    telemetry,
};

/// Frames buffered between a stream worker and its HTTP response.
const STREAM_CHANNEL_DEPTH: usize = 2;

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    pub(crate) engine: RecognitionEngine,
}

#[derive(Deserialize)]
struct PredictRequest {
    #[serde(default)]
    image_data_url: Option<String>,
}

#[derive(Serialize)]
struct PredictResponse {
    prediction: String,
    confidence: f32,
}

/// Serve until the server is stopped (Ctrl+C), then release the engine.
pub fn run_server(engine: RecognitionEngine, bind: &str) -> Result<()> {
    let server_engine = engine.clone();
    let bind = bind.to_string();
    actix_web::rt::System::new().block_on(async move {
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(ServerState {
                    engine: server_engine.clone(),
                }))
                .configure(routes)
        })
        .bind(bind.as_str())
        .with_context(|| format!("failed to bind preview server to {bind}"))?;
        info!(%bind, "preview server listening");
        server.run().await.context("HTTP server error")
    })?;
    engine.release();
    Ok(())
}

pub(crate) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/video_feed", web::get().to(video_feed))
        .route("/prediction", web::get().to(prediction))
        .route("/signs", web::get().to(signs))
        .route("/predict", web::post().to(predict))
        .route("/session/start", web::post().to(session_start))
        .route("/session/end", web::post().to(session_end))
        .route("/metrics", web::get().to(metrics_handler));
}

/// Stream annotated frames as `multipart/x-mixed-replace`.
async fn video_feed(state: web::Data<ServerState>) -> HttpResponse {
    let (tx, mut rx) = mpsc::channel::<StreamChunk>(STREAM_CHANNEL_DEPTH);
    let engine = state.engine.clone();
    let worker = telemetry::spawn_thread("signsight-stream", move || {
        let _span = tracing::info_span!("stream.worker").entered();
        for chunk in engine.stream_frames() {
            if tx.blocking_send(chunk).is_err() {
                debug!("viewer disconnected");
                break;
            }
        }
    });
    if let Err(err) = worker {
        error!("failed to spawn stream worker: {err}");
        return HttpResponse::InternalServerError().finish();
    }

    let body = stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Bytes, actix_web::Error>(Bytes::from(chunk.multipart()));
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "multipart/x-mixed-replace; boundary=frame"))
        .streaming(body)
}

async fn prediction(state: web::Data<ServerState>) -> HttpResponse {
    let engine = state.engine.clone();
    match web::block(move || engine.get_stable_prediction()).await {
        Ok(prediction) => HttpResponse::Ok().json(prediction),
        Err(err) => internal_error(err),
    }
}

async fn signs(state: web::Data<ServerState>) -> HttpResponse {
    let engine = state.engine.clone();
    match web::block(move || engine.get_available_signs()).await {
        Ok(signs) => HttpResponse::Ok().json(signs),
        Err(err) => internal_error(err),
    }
}

/// Classify one submitted frame.
async fn predict(
    state: web::Data<ServerState>,
    request: web::Json<PredictRequest>,
) -> HttpResponse {
    let Some(url) = request
        .into_inner()
        .image_data_url
        .filter(|url| !url.trim().is_empty())
    else {
        return HttpResponse::BadRequest().json(json!({ "error": FrameLabel::NoImage.as_str() }));
    };
    let bytes = match decode_data_url(&url) {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!("rejecting submitted frame: {err}");
            return HttpResponse::BadRequest().json(json!({ "error": "Could not decode image." }));
        }
    };
    if image::guess_format(&bytes).is_err() {
        return HttpResponse::BadRequest().json(json!({ "error": "Could not decode image." }));
    }

    let engine = state.engine.clone();
    let prediction = match web::block(move || engine.predict_image_bytes(&bytes)).await {
        Ok(prediction) => prediction,
        Err(err) => return internal_error(err),
    };
    let body = PredictResponse {
        prediction: prediction.sign,
        confidence: prediction.confidence,
    };
    if body.prediction == FrameLabel::InitializationError.as_str() {
        HttpResponse::ServiceUnavailable().json(body)
    } else {
        HttpResponse::Ok().json(body)
    }
}

async fn session_start(state: web::Data<ServerState>) -> HttpResponse {
    let engine = state.engine.clone();
    match web::block(move || engine.initialize()).await {
        Ok(Ok(status)) => {
            let camera = match status {
                CameraStatus::Open => "open",
                CameraStatus::Disabled => "disabled",
                CameraStatus::Unavailable => "unavailable",
            };
            HttpResponse::Ok().json(json!({ "status": "ready", "camera": camera }))
        }
        Ok(Err(err)) => HttpResponse::ServiceUnavailable().json(json!({ "error": err.to_string() })),
        Err(err) => internal_error(err),
    }
}

async fn session_end(state: web::Data<ServerState>) -> HttpResponse {
    let engine = state.engine.clone();
    match web::block(move || engine.release()).await {
        Ok(()) => HttpResponse::Ok().json(json!({ "status": "offline" })),
        Err(err) => internal_error(err),
    }
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

fn internal_error(err: impl std::fmt::Display) -> HttpResponse {
    error!("request failed: {err}");
    HttpResponse::InternalServerError().json(json!({ "error": err.to_string() }))
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, sync::Arc};

    use actix_web::{http::StatusCode, test};
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use image::{ImageFormat, Rgb, RgbImage};
    use serde_json::Value;

    use super::*;
    use crate::recognition::{
        config::{CameraMode, EngineSettings},
        testing::FakeFactory,
    };

    fn state() -> web::Data<ServerState> {
        let settings = EngineSettings {
            camera: CameraMode::Disabled,
            ..EngineSettings::default()
        };
        let engine = RecognitionEngine::new(Arc::new(FakeFactory::confident()), settings);
        web::Data::new(ServerState { engine })
    }

    fn jpeg_data_url() -> String {
        let image = RgbImage::from_pixel(16, 16, Rgb([10, 200, 30]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .unwrap();
        format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes))
    }

    #[actix_web::test]
    async fn predict_returns_label_and_confidence() {
        let app = test::init_service(App::new().app_data(state()).configure(routes)).await;
        let request = test::TestRequest::post()
            .uri("/predict")
            .set_json(json!({ "image_data_url": jpeg_data_url() }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["prediction"], "A");
        assert!(body["confidence"].as_f64().unwrap() > 0.9);
    }

    #[actix_web::test]
    async fn predict_rejects_bad_payloads() {
        let app = test::init_service(App::new().app_data(state()).configure(routes)).await;
        for payload in [
            json!({}),
            json!({ "image_data_url": "data:image/png;base64,@@" }),
            json!({ "image_data_url": format!("data:image/png;base64,{}", STANDARD.encode(b"text")) }),
        ] {
            let request = test::TestRequest::post()
                .uri("/predict")
                .set_json(payload)
                .to_request();
            let response = test::call_service(&app, request).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body: Value = test::read_body_json(response).await;
            assert!(body["error"].is_string());
        }
    }

    #[actix_web::test]
    async fn session_lifecycle_round_trip() {
        let state = state();
        let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

        let request = test::TestRequest::post().uri("/session/start").to_request();
        let body: Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["camera"], "disabled");
        assert!(state.engine.is_initialized());

        let request = test::TestRequest::get().uri("/signs").to_request();
        let body: Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body, json!(["A", "B", "C"]));

        let request = test::TestRequest::post().uri("/session/end").to_request();
        let body: Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["status"], "offline");

        let request = test::TestRequest::get().uri("/prediction").to_request();
        let body: Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["sign"], "Offline");
        assert_eq!(body["confidence"], 0.0);
    }
}

//! HTTP surface of the feed: query, stream, export and health endpoints.
use crate::service::{DistributionService, event_stream};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use log::{error, info};
use serde::Serialize;
use spot_common::Result;
use spot_common::net::{DATA_PATH, EXPORT_PATH, HEALTH_PATH, STREAM_PATH};
use spot_common::wire::DataResponse;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Error body of the export endpoint when the log has no rows.
pub const EXPORT_MISSING: &str = "CSV file not found";

type SharedService = Arc<DistributionService>;

/// Router with every endpoint and permissive CORS.
pub fn router(service: SharedService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(DATA_PATH, get(data))
        .route(STREAM_PATH, get(stream))
        .route(EXPORT_PATH, get(download))
        .route(HEALTH_PATH, get(health))
        .layer(cors)
        .with_state(service)
}

/// Serve `service` on `listener` until the process ends.
pub async fn serve(listener: TcpListener, service: SharedService) -> Result<()> {
    info!("HTTP server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(service)).await?;
    Ok(())
}

async fn data(State(service): State<SharedService>) -> Json<DataResponse> {
    match tokio::task::spawn_blocking(move || service.query()).await {
        Ok(response) => Json(response),
        Err(e) => {
            error!("Query task failed: {}", e);
            Json(DataResponse::failure(format!("query task failed: {e}")))
        }
    }
}

async fn stream(State(service): State<SharedService>) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let events = event_stream(service.live(), service.heartbeat()).map(|event| {
        Ok(match event.to_json() {
            Ok(json) => Event::default().data(json),
            Err(e) => {
                error!("Failed to encode stream event: {}", e);
                Event::default().comment("encode error")
            }
        })
    });
    Sse::new(events)
}

async fn download(State(service): State<SharedService>) -> Response {
    let name = service.export_name();
    match tokio::task::spawn_blocking(move || service.export()).await {
        Ok(Ok(Some(bytes))) => (
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{name}\"")),
            ],
            bytes,
        )
            .into_response(),
        Ok(Ok(None)) => (StatusCode::NOT_FOUND, Json(DataResponse::failure(EXPORT_MISSING))).into_response(),
        Ok(Err(e)) => {
            error!("Export failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(DataResponse::failure(e.to_string()))).into_response()
        }
        Err(e) => {
            error!("Export task failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(DataResponse::failure(e.to_string()))).into_response()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    version: &'static str,
    revision: u64,
    has_quote: bool,
    last_error: Option<String>,
}

async fn health(State(service): State<SharedService>) -> Json<Health> {
    let snapshot = service.live().snapshot();
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        revision: snapshot.revision,
        has_quote: snapshot.quote.is_some(),
        last_error: snapshot.error.clone(),
    })
}

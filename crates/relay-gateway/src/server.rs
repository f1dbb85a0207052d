//! Webhook HTTP server
//!
//! Maps relay outcomes onto the status contract Event Grid expects:
//! rejected handshakes and undecodable bodies are 400, anything that fails
//! after that is 500 so the provider retries, and unrouted events are 200.

use crate::admin_api::admin_routes;
use crate::webhook::{CALLBACK_HEADER, EVENT_TYPE_HEADER, ORIGIN_HEADER};
use crate::{Outcome, Relay};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{options, post};
use axum::{Json, Router};
use bytes::Bytes;
use relay_core::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Path of the Azure Event Grid blob storage webhook
pub const AZURE_BLOB_STORAGE_PATH: &str = "/azure/event-grid/blob-storage";

/// Build the full application router
pub fn router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route(
            AZURE_BLOB_STORAGE_PATH,
            options(azure_handshake).post(azure_delivery),
        )
        .route("/google/pubsub/cloud-storage", post(not_implemented))
        .route("/aws/sqs/s3", post(not_implemented))
        .merge(admin_routes())
        .layer(middleware::from_fn(request_span))
        .with_state(relay)
}

/// Bind `listen` and serve until ctrl-c or SIGTERM
pub async fn serve(relay: Arc<Relay>, listen: &str) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| RelayError::Internal(format!("failed to bind {}: {}", listen, e)))?;
    info!(listen, "HTTP server started");

    axum::serve(listener, router(relay))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| RelayError::Internal(format!("server error: {}", e)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

/// Wrap every request in a span carrying a fresh request id
async fn request_span(request: Request, next: Next) -> Response {
    let request_id = Uuid::now_v7();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let span = info_span!("request", %request_id, %method, path = %path);

    let start = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;

    span.in_scope(|| {
        info!(
            status = response.status().as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "request"
        )
    });
    response
}

/// HTTP status for a failed delivery or handshake
pub fn status_for(error: &RelayError) -> StatusCode {
    if error.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn error_response(error: &RelayError) -> Response {
    let status = status_for(error);
    let body = if status == StatusCode::BAD_REQUEST {
        "bad request"
    } else {
        "internal server error"
    };
    (status, body).into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn azure_handshake(State(relay): State<Arc<Relay>>, headers: HeaderMap) -> Response {
    let origin = header(&headers, ORIGIN_HEADER);
    let callback_url = header(&headers, CALLBACK_HEADER);

    match relay.handle_handshake(origin, callback_url).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e),
    }
}

async fn azure_delivery(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let event_type = header(&headers, EVENT_TYPE_HEADER);
    let origin = header(&headers, ORIGIN_HEADER);
    let deadline = relay.config().server.request_timeout;

    let result =
        match tokio::time::timeout(deadline, relay.handle_delivery(event_type, origin, &body)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::timeout(
                "handle delivery",
                deadline.as_millis() as u64,
            )),
        };

    match result {
        Ok(Outcome::Validated(Some(response))) => Json(response).into_response(),
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => {
            if matches!(e, RelayError::Timeout { .. }) {
                error!(error = %e, "Delivery exceeded the request deadline");
            }
            error_response(&e)
        }
    }
}

async fn not_implemented() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}

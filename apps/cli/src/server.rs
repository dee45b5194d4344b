//! HTTP read endpoint: `GET /product/:id`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use dataflow_shared::{DataflowError, ErrorCode, Product, ProductStore};

type SharedStore = Arc<dyn ProductStore>;

/// Build the read router over `store`.
pub(crate) fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/product/:id", get(get_product))
        .with_state(store)
}

/// Serve until `shutdown` is cancelled, then drain open connections.
pub(crate) async fn serve(
    address: &str,
    store: SharedStore,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!(address = %listener.local_addr()?, "serving products");

    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("server stopped");
    Ok(())
}

async fn get_product(
    State(store): State<SharedStore>,
    Path(raw_id): Path<String>,
) -> Result<Json<Product>, ApiError> {
    let id = raw_id
        .parse::<u32>()
        .map_err(|_| ApiError(DataflowError::validation("Invalid ID format")))?;

    let product = store.find_by_id(id).await.map_err(ApiError)?;
    Ok(Json(product))
}

/// Maps a [`DataflowError`] onto a status code and `{"error": ..}` body.
/// Internal details are logged, never returned.
struct ApiError(DataflowError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.code() {
            ErrorCode::Invalid => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Internal => {
                error!(error = %self.0, "lookup failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.0.public_message() }))).into_response()
    }
}

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::extract::{parse_id, ApiJson};
use crate::engine::allocation::allocate_tracking_number;
use crate::engine::allocator::{normalize_scheme, validate_scheme, Allocation};
use crate::error::AppError;
use crate::models::courier::{CourierPartner, TrackingMode, TrackingScheme};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(create_courier).get(list_couriers))
        .route(
            "/couriers/:id",
            get(get_courier).put(update_courier).delete(delete_courier),
        )
        .route(
            "/couriers/:id/increment-tracking-number",
            post(increment_tracking_number),
        )
}

fn courier_id(raw: &str) -> Result<Uuid, AppError> {
    parse_id(raw, AppError::courier_not_found)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourierRequest {
    pub name: String,
    pub scheme: TrackingScheme,
}

impl CourierRequest {
    fn validated(self) -> Result<(String, TrackingScheme), AppError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("name cannot be empty".to_string()));
        }
        let scheme = normalize_scheme(self.scheme);
        validate_scheme(&scheme)?;
        Ok((name.to_string(), scheme))
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IncrementRequest {
    #[serde(default)]
    pub is_express_mode: bool,
}

async fn create_courier(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<CourierRequest>,
) -> Result<Json<CourierPartner>, AppError> {
    let (name, scheme) = payload.validated()?;

    let now = Utc::now();
    let courier = CourierPartner {
        id: Uuid::new_v4(),
        name,
        scheme,
        created_at: now,
        updated_at: now,
    };

    let courier = state.store.insert_courier(courier).await?;
    tracing::info!(courier_id = %courier.id, name = %courier.name, "courier created");
    Ok(Json(courier))
}

async fn list_couriers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CourierPartner>>, AppError> {
    Ok(Json(state.store.list_couriers().await?))
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CourierPartner>, AppError> {
    let id = courier_id(&id)?;
    Ok(Json(state.store.get_courier(id).await?))
}

async fn update_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<CourierRequest>,
) -> Result<Json<CourierPartner>, AppError> {
    let id = courier_id(&id)?;
    let (name, scheme) = payload.validated()?;

    let courier = state.store.update_courier(id, name, scheme).await?;
    tracing::info!(courier_id = %courier.id, "courier reconfigured");
    Ok(Json(courier))
}

async fn delete_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = courier_id(&id)?;
    state.store.delete_courier(id).await?;
    tracing::info!(courier_id = %id, "courier deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn increment_tracking_number(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Allocation>, AppError> {
    let id = courier_id(&id)?;
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        IncrementRequest::default()
    } else {
        serde_json::from_slice::<IncrementRequest>(&body)
            .map_err(|err| AppError::BadRequest(format!("invalid body: {err}")))?
    };

    let issued = allocate_tracking_number(
        &state,
        id,
        TrackingMode::from_flag(request.is_express_mode),
    )
    .await?;

    Ok(Json(issued.allocation))
}

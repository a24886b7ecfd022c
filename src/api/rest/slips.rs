use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::extract::{parse_id, ApiJson, ApiQuery};
use crate::engine::slips::{create_slip, validate_weight, NewSlip};
use crate::error::AppError;
use crate::models::slip::CourierSlip;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/slips", post(post_slip).get(list_slips))
        .route("/slips/:id", get(get_slip))
        .route("/slips/:id/weight", patch(record_weight))
}

fn slip_id(raw: &str) -> Result<Uuid, AppError> {
    parse_id(raw, || AppError::NotFound(format!("slip {raw} not found")))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlipFilter {
    pub courier_id: Option<Uuid>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightRequest {
    pub weight_kg: f64,
}

async fn post_slip(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<NewSlip>,
) -> Result<Json<CourierSlip>, AppError> {
    Ok(Json(create_slip(&state, payload).await?))
}

async fn list_slips(
    State(state): State<Arc<AppState>>,
    ApiQuery(filter): ApiQuery<SlipFilter>,
) -> Result<Json<Vec<CourierSlip>>, AppError> {
    Ok(Json(state.store.list_slips(filter.courier_id).await?))
}

async fn get_slip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CourierSlip>, AppError> {
    let id = slip_id(&id)?;
    Ok(Json(state.store.get_slip(id).await?))
}

async fn record_weight(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<WeightRequest>,
) -> Result<Json<CourierSlip>, AppError> {
    let id = slip_id(&id)?;
    validate_weight(payload.weight_kg)?;

    let slip = state.store.set_slip_weight(id, payload.weight_kg).await?;
    tracing::info!(slip_id = %id, weight_kg = payload.weight_kg, "box weight recorded");
    Ok(Json(slip))
}

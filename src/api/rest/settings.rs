use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::api::rest::extract::ApiJson;
use crate::error::AppError;
use crate::models::settings::ExpressModeSetting;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/settings/express-mode",
        get(get_express_mode).put(set_express_mode),
    )
}

#[derive(Deserialize)]
pub struct ExpressModeRequest {
    pub enabled: bool,
}

async fn get_express_mode(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ExpressModeSetting>, AppError> {
    Ok(Json(state.store.express_mode().await?))
}

async fn set_express_mode(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<ExpressModeRequest>,
) -> Result<Json<ExpressModeSetting>, AppError> {
    let setting = state.store.set_express_mode(payload.enabled).await?;
    tracing::info!(enabled = setting.enabled, "express mode toggled");
    Ok(Json(setting))
}

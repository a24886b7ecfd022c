use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::TrackingMode;

/// A shipment slip. `tracking_id` is copied at creation time and never
/// follows later counter changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourierSlip {
    pub id: Uuid,
    pub courier_id: Uuid,
    pub tracking_id: String,
    pub mode: TrackingMode,
    pub receiver_name: String,
    pub receiver_address: String,
    pub receiver_phone: Option<String>,
    pub weight_kg: Option<f64>,
    pub created_at: DateTime<Utc>,
}

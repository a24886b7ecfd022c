use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::TrackingMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEvent {
    pub courier_id: Uuid,
    pub mode: TrackingMode,
    pub new_number: i64,
    pub tracking_id: String,
    pub remaining_count: i64,
    pub is_low: bool,
    pub allocated_at: DateTime<Utc>,
}

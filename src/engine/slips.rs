use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::allocation::allocate_tracking_number;
use crate::error::AppError;
use crate::models::courier::TrackingMode;
use crate::models::slip::CourierSlip;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSlip {
    pub courier_id: Uuid,
    pub receiver_name: String,
    pub receiver_address: String,
    #[serde(default)]
    pub receiver_phone: Option<String>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    /// Overrides the global express toggle when present.
    #[serde(default)]
    pub is_express_mode: Option<bool>,
    /// Only for custom couriers.
    #[serde(default)]
    pub tracking_id: Option<String>,
}

pub fn validate_weight(weight_kg: f64) -> Result<(), AppError> {
    if !weight_kg.is_finite() || weight_kg <= 0.0 {
        return Err(AppError::BadRequest("weightKg must be > 0".to_string()));
    }
    Ok(())
}

fn required(field: &str, value: String) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

/// Creates a slip, drawing its tracking number unless the courier is custom.
///
/// Everything that can be rejected is checked before a number is drawn. If
/// persisting the slip fails afterwards the number stays consumed.
pub async fn create_slip(state: &AppState, request: NewSlip) -> Result<CourierSlip, AppError> {
    let receiver_name = required("receiverName", request.receiver_name)?;
    let receiver_address = required("receiverAddress", request.receiver_address)?;
    let receiver_phone = request
        .receiver_phone
        .map(|phone| phone.trim().to_string())
        .filter(|phone| !phone.is_empty());
    if let Some(weight_kg) = request.weight_kg {
        validate_weight(weight_kg)?;
    }

    let courier = state.store.get_courier(request.courier_id).await?;

    let mode = match request.is_express_mode {
        Some(flag) => TrackingMode::from_flag(flag),
        None => TrackingMode::from_flag(state.store.express_mode().await?.enabled),
    };

    let tracking_id = if courier.scheme.is_manual() {
        let manual = request.tracking_id.ok_or_else(|| {
            AppError::BadRequest("trackingId is required for custom couriers".to_string())
        })?;
        required("trackingId", manual)?
    } else {
        if request.tracking_id.is_some() {
            return Err(AppError::BadRequest(
                "trackingId is assigned automatically for this courier".to_string(),
            ));
        }
        allocate_tracking_number(state, courier.id, mode)
            .await?
            .tracking_id
    };

    let slip = state
        .store
        .insert_slip(CourierSlip {
            id: Uuid::new_v4(),
            courier_id: courier.id,
            tracking_id,
            mode,
            receiver_name,
            receiver_address,
            receiver_phone,
            weight_kg: request.weight_kg,
            created_at: Utc::now(),
        })
        .await?;

    state
        .metrics
        .slips_created_total
        .with_label_values(&[mode.as_str()])
        .inc();
    info!(
        slip_id = %slip.id,
        courier_id = %slip.courier_id,
        tracking_id = %slip.tracking_id,
        "slip created"
    );

    Ok(slip)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{create_slip, NewSlip};
    use crate::engine::allocator::OverflowPolicy;
    use crate::error::AppError;
    use crate::models::courier::{CourierPartner, TrackingMode, TrackingRange, TrackingScheme};
    use crate::state::AppState;
    
    fn state() -> AppState {
        AppState::in_memory(16, OverflowPolicy::Reject)
    }

    async fn seed(state: &AppState, scheme: TrackingScheme) -> Uuid {
        state
            .store
            .insert_courier(CourierPartner {
                id: Uuid::new_v4(),
                name: "Shree Maruti".to_string(),
                scheme,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap()
            .id
    }

    fn sequential(prefix: &str, current: i64) -> TrackingScheme {
        TrackingScheme::Sequential {
            standard: TrackingRange {
                prefix: Some(prefix.to_string()),
                start: 1,
                current,
                end: 5000,
            },
            express: None,
        }
    }

    fn request(courier_id: Uuid) -> NewSlip {
        NewSlip {
            courier_id,
            receiver_name: " Asha Patel ".to_string(),
            receiver_address: "4 Ring Road, Surat".to_string(),
            receiver_phone: None,
            weight_kg: Some(1.5),
            is_express_mode: None,
            tracking_id: None,
        }
    }

    #[tokio::test]
    async fn sequential_courier_slip_gets_next_number() {
        let state = state();
        let id = seed(&state, sequential("SM", 1000)).await;

        let slip = create_slip(&state, request(id)).await.unwrap();

        assert_eq!(slip.tracking_id, "SM1001");
        assert_eq!(slip.receiver_name, "Asha Patel");
        assert_eq!(slip.mode, TrackingMode::Standard);
    }

    #[tokio::test]
    async fn manual_courier_slip_uses_operator_tracking_id() {
        let state = state();
        let id = seed(&state, TrackingScheme::Manual).await;

        let mut req = request(id);
        req.tracking_id = Some("  LOCAL-77 ".to_string());
        let slip = create_slip(&state, req).await.unwrap();

        assert_eq!(slip.tracking_id, "LOCAL-77");
    }

    #[tokio::test]
    async fn manual_courier_without_tracking_id_creates_nothing() {
        let state = state();
        let id = seed(&state, TrackingScheme::Manual).await;

        let err = create_slip(&state, request(id)).await.unwrap_err();

        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(state.store.count_slips().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn invalid_request_does_not_burn_a_number() {
        let state = state();
        let id = seed(&state, sequential("SM", 1000)).await;

        let mut bad = request(id);
        bad.weight_kg = Some(0.0);
        assert!(create_slip(&state, bad).await.is_err());

        let courier = state.store.get_courier(id).await.unwrap();
        assert_eq!(courier.range(TrackingMode::Standard).unwrap().current, 1000);
    }

    #[tokio::test]
    async fn global_express_toggle_applies_when_request_is_silent() {
        let state = state();
        let id = seed(&state, sequential("SM", 1000)).await;
        state.store.set_express_mode(true).await.unwrap();

        let err = create_slip(&state, request(id)).await.unwrap_err();

        assert!(matches!(err, AppError::ExpressNotConfigured));
    }
}

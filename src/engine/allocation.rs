use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::allocator::{format_tracking_id, Allocation};
use crate::error::AppError;
use crate::models::courier::TrackingMode;
use crate::models::event::TrackingEvent;
use crate::state::AppState;

/// A number drawn from a courier's range together with its printable form.
#[derive(Debug, Clone)]
pub struct IssuedNumber {
    pub allocation: Allocation,
    pub tracking_id: String,
}

/// Draws the next tracking number for a courier and publishes the result.
///
/// Not retried on failure: a storage error after the commit reached the
/// database would otherwise skip a number.
pub async fn allocate_tracking_number(
    state: &AppState,
    courier_id: Uuid,
    mode: TrackingMode,
) -> Result<IssuedNumber, AppError> {
    let outcome = match state
        .store
        .allocate(courier_id, mode, state.overflow_policy)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            state
                .metrics
                .allocation_failures_total
                .with_label_values(&[err.reason()])
                .inc();
            warn!(
                courier_id = %courier_id,
                mode = mode.as_str(),
                error = %err,
                "tracking number allocation failed"
            );
            return Err(err);
        }
    };

    let allocation = outcome.allocation;
    let tracking_id = format_tracking_id(&outcome.courier, mode, allocation.new_number);

    state
        .metrics
        .tracking_numbers_allocated_total
        .with_label_values(&[mode.as_str()])
        .inc();
    let courier_label = courier_id.to_string();
    state
        .metrics
        .tracking_numbers_remaining
        .with_label_values(&[courier_label.as_str(), mode.as_str()])
        .set(allocation.remaining_count);

    if allocation.remaining_count < 0 {
        warn!(
            courier_id = %courier_id,
            mode = mode.as_str(),
            new_number = allocation.new_number,
            remaining_count = allocation.remaining_count,
            "allocated past the end of the configured range"
        );
    } else if allocation.is_low {
        warn!(
            courier_id = %courier_id,
            mode = mode.as_str(),
            remaining_count = allocation.remaining_count,
            "tracking range running low"
        );
    }

    if allocation.is_low {
        state
            .metrics
            .low_capacity_warnings_total
            .with_label_values(&[mode.as_str()])
            .inc();
    }

    info!(
        courier_id = %courier_id,
        mode = mode.as_str(),
        tracking_id = %tracking_id,
        remaining_count = allocation.remaining_count,
        "tracking number allocated"
    );

    let _ = state.tracking_events_tx.send(TrackingEvent {
        courier_id,
        mode,
        new_number: allocation.new_number,
        tracking_id: tracking_id.clone(),
        remaining_count: allocation.remaining_count,
        is_low: allocation.is_low,
        allocated_at: Utc::now(),
    });

    Ok(IssuedNumber {
        allocation,
        tracking_id,
    })
}

//! Persistence seam for couriers, slips and the express-mode setting.
//!
//! Every backend must make [`CourierStore::allocate`] atomic per courier:
//! two concurrent calls for the same courier and mode never observe the same
//! counter value.

pub mod memory;
pub mod postgres;
pub mod retry;

use async_trait::async_trait;
use uuid::Uuid;

use crate::engine::allocator::{Allocation, OverflowPolicy};
use crate::error::AppError;
use crate::models::courier::{CourierPartner, TrackingMode, TrackingScheme};
use crate::models::settings::ExpressModeSetting;
use crate::models::slip::CourierSlip;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Courier record after a successful allocation, plus the issued number.
#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    pub courier: CourierPartner,
    pub allocation: Allocation,
}

#[async_trait]
pub trait CourierStore: Send + Sync {
    /// Backend name for logs and `/health`.
    fn name(&self) -> &'static str;

    async fn insert_courier(&self, courier: CourierPartner) -> Result<CourierPartner, AppError>;

    async fn get_courier(&self, id: Uuid) -> Result<CourierPartner, AppError>;

    /// All couriers ordered by name.
    async fn list_couriers(&self) -> Result<Vec<CourierPartner>, AppError>;

    /// Replaces name and scheme. A counter that would move backwards is a
    /// `Conflict` and nothing is written.
    async fn update_courier(
        &self,
        id: Uuid,
        name: String,
        scheme: TrackingScheme,
    ) -> Result<CourierPartner, AppError>;

    async fn delete_courier(&self, id: Uuid) -> Result<(), AppError>;

    async fn count_couriers(&self) -> Result<usize, AppError>;

    /// Draws the next number for `mode`, persisting it before returning.
    async fn allocate(
        &self,
        id: Uuid,
        mode: TrackingMode,
        policy: OverflowPolicy,
    ) -> Result<AllocationOutcome, AppError>;
}

#[async_trait]
pub trait SlipStore: Send + Sync {
    /// Fails with `Conflict` if the tracking ID is already on a slip.
    async fn insert_slip(&self, slip: CourierSlip) -> Result<CourierSlip, AppError>;

    async fn get_slip(&self, id: Uuid) -> Result<CourierSlip, AppError>;

    /// Newest first, optionally restricted to one courier.
    async fn list_slips(&self, courier_id: Option<Uuid>) -> Result<Vec<CourierSlip>, AppError>;

    async fn set_slip_weight(&self, id: Uuid, weight_kg: f64) -> Result<CourierSlip, AppError>;

    async fn count_slips(&self) -> Result<usize, AppError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn express_mode(&self) -> Result<ExpressModeSetting, AppError>;

    async fn set_express_mode(&self, enabled: bool) -> Result<ExpressModeSetting, AppError>;
}

pub trait Store: CourierStore + SlipStore + SettingsStore {}

impl<T> Store for T where T: CourierStore + SlipStore + SettingsStore {}

pub(crate) fn slip_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("slip {id} not found"))
}

pub(crate) fn duplicate_tracking_id(tracking_id: &str) -> AppError {
    AppError::Conflict(format!("tracking id {tracking_id} is already in use"))
}

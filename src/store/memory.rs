use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::engine::allocator::{self, OverflowPolicy};
use crate::error::AppError;
use crate::models::courier::{CourierPartner, TrackingMode, TrackingScheme};
use crate::models::settings::ExpressModeSetting;
use crate::models::slip::CourierSlip;
use crate::store::{
    duplicate_tracking_id, slip_not_found, AllocationOutcome, CourierStore, SettingsStore,
    SlipStore,
};

/// Process-local backend. Allocation runs while holding the courier's shard
/// write lock, so calls for one courier are serialized.
#[derive(Default)]
pub struct MemoryStore {
    couriers: DashMap<Uuid, CourierPartner>,
    slips: DashMap<Uuid, CourierSlip>,
    tracking_ids: DashMap<String, Uuid>,
    express_mode: RwLock<ExpressModeSetting>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CourierStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert_courier(&self, courier: CourierPartner) -> Result<CourierPartner, AppError> {
        match self.couriers.entry(courier.id) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "courier {} already exists",
                courier.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(courier.clone());
                Ok(courier)
            }
        }
    }

    async fn get_courier(&self, id: Uuid) -> Result<CourierPartner, AppError> {
        self.couriers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(AppError::courier_not_found)
    }

    async fn list_couriers(&self) -> Result<Vec<CourierPartner>, AppError> {
        let mut couriers: Vec<CourierPartner> = self
            .couriers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        couriers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(couriers)
    }

    async fn update_courier(
        &self,
        id: Uuid,
        name: String,
        scheme: TrackingScheme,
    ) -> Result<CourierPartner, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(AppError::courier_not_found)?;

        allocator::check_no_rewind(&courier, &scheme)?;
        courier.name = name;
        courier.scheme = scheme;
        courier.updated_at = Utc::now();

        Ok(courier.clone())
    }

    async fn delete_courier(&self, id: Uuid) -> Result<(), AppError> {
        self.couriers
            .remove(&id)
            .map(|_| ())
            .ok_or_else(AppError::courier_not_found)
    }

    async fn count_couriers(&self) -> Result<usize, AppError> {
        Ok(self.couriers.len())
    }

    async fn allocate(
        &self,
        id: Uuid,
        mode: TrackingMode,
        policy: OverflowPolicy,
    ) -> Result<AllocationOutcome, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(AppError::courier_not_found)?;

        let allocation = allocator::advance(courier.value_mut(), mode, policy)?;
        courier.updated_at = Utc::now();

        Ok(AllocationOutcome {
            courier: courier.clone(),
            allocation,
        })
    }
}

#[async_trait]
impl SlipStore for MemoryStore {
    async fn insert_slip(&self, slip: CourierSlip) -> Result<CourierSlip, AppError> {
        match self.tracking_ids.entry(slip.tracking_id.clone()) {
            Entry::Occupied(_) => Err(duplicate_tracking_id(&slip.tracking_id)),
            Entry::Vacant(slot) => {
                slot.insert(slip.id);
                self.slips.insert(slip.id, slip.clone());
                Ok(slip)
            }
        }
    }

    async fn get_slip(&self, id: Uuid) -> Result<CourierSlip, AppError> {
        self.slips
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| slip_not_found(id))
    }

    async fn list_slips(&self, courier_id: Option<Uuid>) -> Result<Vec<CourierSlip>, AppError> {
        let mut slips: Vec<CourierSlip> = self
            .slips
            .iter()
            .filter(|entry| courier_id.is_none_or(|id| entry.courier_id == id))
            .map(|entry| entry.value().clone())
            .collect();
        slips.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(slips)
    }

    async fn set_slip_weight(&self, id: Uuid, weight_kg: f64) -> Result<CourierSlip, AppError> {
        let mut slip = self.slips.get_mut(&id).ok_or_else(|| slip_not_found(id))?;
        slip.weight_kg = Some(weight_kg);
        Ok(slip.clone())
    }

    async fn count_slips(&self) -> Result<usize, AppError> {
        Ok(self.slips.len())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn express_mode(&self) -> Result<ExpressModeSetting, AppError> {
        Ok(self.express_mode.read().await.clone())
    }

    async fn set_express_mode(&self, enabled: bool) -> Result<ExpressModeSetting, AppError> {
        let mut setting = self.express_mode.write().await;
        setting.enabled = enabled;
        setting.updated_at = Utc::now();
        Ok(setting.clone())
    }
}

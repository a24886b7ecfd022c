//! PostgreSQL backend.
//!
//! Allocation is one conditional `UPDATE ... RETURNING`, so the row lock taken
//! by the update is what serializes concurrent callers. When no row comes
//! back, a follow-up read explains why.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::engine::allocator::{self, Allocation, OverflowPolicy};
use crate::error::AppError;
use crate::models::courier::{CourierPartner, TrackingMode, TrackingRange, TrackingScheme};
use crate::models::settings::ExpressModeSetting;
use crate::models::slip::CourierSlip;
use crate::store::retry::{with_backoff, READ_ATTEMPTS};
use crate::store::{
    duplicate_tracking_id, slip_not_found, AllocationOutcome, CourierStore, SettingsStore,
    SlipStore,
};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const SCHEMA_LOCK_KEY: i64 = 0x636f_7572_6965_72;

macro_rules! courier_columns {
    () => {
        "id, name, is_custom_courier, \
         prefix, starting_tracking_number, current_tracking_number, end_tracking_number, \
         express_prefix, express_starting_tracking_number, express_current_tracking_number, \
         express_end_tracking_number, created_at, updated_at"
    };
}

macro_rules! slip_columns {
    () => {
        "id, courier_id, tracking_id, mode, receiver_name, receiver_address, \
         receiver_phone, weight_kg, created_at"
    };
}

const SELECT_COURIER: &str = concat!("SELECT ", courier_columns!(), " FROM couriers WHERE id = $1");

const LIST_COURIERS: &str = concat!("SELECT ", courier_columns!(), " FROM couriers ORDER BY name, id");

const INSERT_COURIER: &str = concat!(
    "INSERT INTO couriers (",
    courier_columns!(),
    ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) RETURNING ",
    courier_columns!()
);

const UPDATE_COURIER: &str = concat!(
    "UPDATE couriers SET name = $2, is_custom_courier = $3, \
     prefix = $4, starting_tracking_number = $5, current_tracking_number = $6, \
     end_tracking_number = $7, express_prefix = $8, express_starting_tracking_number = $9, \
     express_current_tracking_number = $10, express_end_tracking_number = $11, \
     updated_at = now() \
     WHERE id = $1 \
       AND (is_custom_courier OR $6::bigint IS NULL OR current_tracking_number IS NULL \
         OR $6 >= current_tracking_number) \
       AND (is_custom_courier OR $10::bigint IS NULL OR express_current_tracking_number IS NULL \
         OR $10 >= express_current_tracking_number) \
     RETURNING ",
    courier_columns!()
);

// $2: express mode, $3: overflow allowed.
const ALLOCATE: &str = concat!(
    "UPDATE couriers SET \
       current_tracking_number = CASE WHEN $2 THEN current_tracking_number \
         ELSE current_tracking_number + 1 END, \
       express_current_tracking_number = CASE WHEN $2 THEN express_current_tracking_number + 1 \
         ELSE express_current_tracking_number END, \
       updated_at = now() \
     WHERE id = $1 AND NOT is_custom_courier AND CASE WHEN $2 \
       THEN express_current_tracking_number IS NOT NULL \
         AND express_current_tracking_number < 9223372036854775807 \
         AND ($3 OR express_current_tracking_number < express_end_tracking_number) \
       ELSE current_tracking_number < 9223372036854775807 \
         AND ($3 OR current_tracking_number < end_tracking_number) \
     END \
     RETURNING ",
    courier_columns!()
);

const INSERT_SLIP: &str = concat!(
    "INSERT INTO courier_slips (",
    slip_columns!(),
    ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING ",
    slip_columns!()
);

const SELECT_SLIP: &str = concat!("SELECT ", slip_columns!(), " FROM courier_slips WHERE id = $1");

const LIST_SLIPS: &str = concat!(
    "SELECT ",
    slip_columns!(),
    " FROM courier_slips WHERE ($1::uuid IS NULL OR courier_id = $1) ORDER BY created_at DESC"
);

const SET_SLIP_WEIGHT: &str = concat!(
    "UPDATE courier_slips SET weight_kg = $2 WHERE id = $1 RETURNING ",
    slip_columns!()
);

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Applies the schema under an advisory lock so instances starting
    /// together do not race on `CREATE TABLE IF NOT EXISTS`.
    pub async fn migrate(&self) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *tx)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&mut *tx).await?;
        tx.commit().await?;
        info!("database schema ready");
        Ok(())
    }

    async fn fetch_courier(&self, id: Uuid) -> Result<Option<CourierPartner>, AppError> {
        let pool = &self.pool;
        let row = with_backoff(READ_ATTEMPTS, || {
            sqlx::query_as::<_, CourierRow>(SELECT_COURIER)
                .bind(id)
                .fetch_optional(pool)
        })
        .await?;

        row.map(CourierPartner::try_from).transpose()
    }

    /// Works out why the allocation update matched no row.
    async fn explain_failed_allocation(
        &self,
        id: Uuid,
        mode: TrackingMode,
        policy: OverflowPolicy,
    ) -> AppError {
        match self.fetch_courier(id).await {
            Ok(courier) => classify_allocation_miss(id, courier, mode, policy),
            Err(err) => err,
        }
    }
}

/// Replays the allocation step on a snapshot of the row. Whatever `advance`
/// refuses is the reason; if it would have succeeded the row changed between
/// the update and the read.
fn classify_allocation_miss(
    id: Uuid,
    courier: Option<CourierPartner>,
    mode: TrackingMode,
    policy: OverflowPolicy,
) -> AppError {
    let Some(mut courier) = courier else {
        return AppError::courier_not_found();
    };

    match allocator::advance(&mut courier, mode, policy) {
        Err(err) => err,
        Ok(_) => AppError::Internal(format!(
            "{} allocation for courier {id} matched no row",
            mode.as_str()
        )),
    }
}

#[derive(Debug, FromRow)]
struct CourierRow {
    id: Uuid,
    name: String,
    is_custom_courier: bool,
    prefix: Option<String>,
    starting_tracking_number: Option<i64>,
    current_tracking_number: Option<i64>,
    end_tracking_number: Option<i64>,
    express_prefix: Option<String>,
    express_starting_tracking_number: Option<i64>,
    express_current_tracking_number: Option<i64>,
    express_end_tracking_number: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn range_from_columns(
    prefix: Option<String>,
    start: Option<i64>,
    current: Option<i64>,
    end: Option<i64>,
) -> Option<TrackingRange> {
    Some(TrackingRange {
        prefix,
        start: start?,
        current: current?,
        end: end?,
    })
}

impl TryFrom<CourierRow> for CourierPartner {
    type Error = AppError;

    fn try_from(row: CourierRow) -> Result<Self, Self::Error> {
        let scheme = if row.is_custom_courier {
            TrackingScheme::Manual
        } else {
            let standard = range_from_columns(
                row.prefix,
                row.starting_tracking_number,
                row.current_tracking_number,
                row.end_tracking_number,
            )
            .ok_or_else(|| {
                AppError::Internal(format!("courier {} has an incomplete standard range", row.id))
            })?;
            let express = range_from_columns(
                row.express_prefix,
                row.express_starting_tracking_number,
                row.express_current_tracking_number,
                row.express_end_tracking_number,
            );
            TrackingScheme::Sequential { standard, express }
        };

        Ok(CourierPartner {
            id: row.id,
            name: row.name,
            scheme,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Column values for a scheme, in table order.
#[derive(Debug, Default, PartialEq)]
struct SchemeColumns {
    is_custom_courier: bool,
    prefix: Option<String>,
    start: Option<i64>,
    current: Option<i64>,
    end: Option<i64>,
    express_prefix: Option<String>,
    express_start: Option<i64>,
    express_current: Option<i64>,
    express_end: Option<i64>,
}

impl From<&TrackingScheme> for SchemeColumns {
    fn from(scheme: &TrackingScheme) -> Self {
        match scheme {
            TrackingScheme::Manual => SchemeColumns {
                is_custom_courier: true,
                ..Default::default()
            },
            TrackingScheme::Sequential { standard, express } => SchemeColumns {
                is_custom_courier: false,
                prefix: standard.prefix.clone(),
                start: Some(standard.start),
                current: Some(standard.current),
                end: Some(standard.end),
                express_prefix: express.as_ref().and_then(|r| r.prefix.clone()),
                express_start: express.as_ref().map(|r| r.start),
                express_current: express.as_ref().map(|r| r.current),
                express_end: express.as_ref().map(|r| r.end),
            },
        }
    }
}

#[derive(Debug, FromRow)]
struct SlipRow {
    id: Uuid,
    courier_id: Uuid,
    tracking_id: String,
    mode: String,
    receiver_name: String,
    receiver_address: String,
    receiver_phone: Option<String>,
    weight_kg: Option<f64>,
    created_at: DateTime<Utc>,
}

fn parse_mode(raw: &str) -> Result<TrackingMode, AppError> {
    match raw {
        "standard" => Ok(TrackingMode::Standard),
        "express" => Ok(TrackingMode::Express),
        other => Err(AppError::Internal(format!("unknown tracking mode `{other}`"))),
    }
}

impl TryFrom<SlipRow> for CourierSlip {
    type Error = AppError;

    fn try_from(row: SlipRow) -> Result<Self, Self::Error> {
        Ok(CourierSlip {
            id: row.id,
            courier_id: row.courier_id,
            tracking_id: row.tracking_id,
            mode: parse_mode(&row.mode)?,
            receiver_name: row.receiver_name,
            receiver_address: row.receiver_address,
            receiver_phone: row.receiver_phone,
            weight_kg: row.weight_kg,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl CourierStore for PgStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn insert_courier(&self, courier: CourierPartner) -> Result<CourierPartner, AppError> {
        let columns = SchemeColumns::from(&courier.scheme);
        let row = sqlx::query_as::<_, CourierRow>(INSERT_COURIER)
            .bind(courier.id)
            .bind(&courier.name)
            .bind(columns.is_custom_courier)
            .bind(columns.prefix)
            .bind(columns.start)
            .bind(columns.current)
            .bind(columns.end)
            .bind(columns.express_prefix)
            .bind(columns.express_start)
            .bind(columns.express_current)
            .bind(columns.express_end)
            .bind(courier.created_at)
            .bind(courier.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    AppError::Conflict(format!("courier {} already exists", courier.id))
                }
                other => other.into(),
            })?;

        row.try_into()
    }

    async fn get_courier(&self, id: Uuid) -> Result<CourierPartner, AppError> {
        self.fetch_courier(id)
            .await?
            .ok_or_else(AppError::courier_not_found)
    }

    async fn list_couriers(&self) -> Result<Vec<CourierPartner>, AppError> {
        let pool = &self.pool;
        let rows = with_backoff(READ_ATTEMPTS, || {
            sqlx::query_as::<_, CourierRow>(LIST_COURIERS).fetch_all(pool)
        })
        .await?;

        rows.into_iter().map(CourierPartner::try_from).collect()
    }

    async fn update_courier(
        &self,
        id: Uuid,
        name: String,
        scheme: TrackingScheme,
    ) -> Result<CourierPartner, AppError> {
        let columns = SchemeColumns::from(&scheme);
        let row = sqlx::query_as::<_, CourierRow>(UPDATE_COURIER)
            .bind(id)
            .bind(name)
            .bind(columns.is_custom_courier)
            .bind(columns.prefix)
            .bind(columns.start)
            .bind(columns.current)
            .bind(columns.end)
            .bind(columns.express_prefix)
            .bind(columns.express_start)
            .bind(columns.express_current)
            .bind(columns.express_end)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let current = self
                    .fetch_courier(id)
                    .await?
                    .ok_or_else(AppError::courier_not_found)?;
                allocator::check_no_rewind(&current, &scheme)?;
                Err(AppError::Conflict(format!(
                    "courier {id} changed during reconfiguration"
                )))
            }
        }
    }

    async fn delete_courier(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM couriers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::courier_not_found());
        }
        Ok(())
    }

    async fn count_couriers(&self) -> Result<usize, AppError> {
        let pool = &self.pool;
        let count = with_backoff(READ_ATTEMPTS, || {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM couriers").fetch_one(pool)
        })
        .await?;

        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn allocate(
        &self,
        id: Uuid,
        mode: TrackingMode,
        policy: OverflowPolicy,
    ) -> Result<AllocationOutcome, AppError> {
        let row = sqlx::query_as::<_, CourierRow>(ALLOCATE)
            .bind(id)
            .bind(mode.is_express())
            .bind(policy == OverflowPolicy::Allow)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Err(self.explain_failed_allocation(id, mode, policy).await);
        };

        let courier = CourierPartner::try_from(row)?;
        let range = courier.range(mode).ok_or_else(|| {
            AppError::Internal(format!("courier {id} lost its {} range", mode.as_str()))
        })?;
        let allocation = Allocation::new(range.current, range.end);

        Ok(AllocationOutcome {
            courier,
            allocation,
        })
    }
}

#[async_trait]
impl SlipStore for PgStore {
    async fn insert_slip(&self, slip: CourierSlip) -> Result<CourierSlip, AppError> {
        let row = sqlx::query_as::<_, SlipRow>(INSERT_SLIP)
            .bind(slip.id)
            .bind(slip.courier_id)
            .bind(&slip.tracking_id)
            .bind(slip.mode.as_str())
            .bind(&slip.receiver_name)
            .bind(&slip.receiver_address)
            .bind(&slip.receiver_phone)
            .bind(slip.weight_kg)
            .bind(slip.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    duplicate_tracking_id(&slip.tracking_id)
                }
                other => other.into(),
            })?;

        row.try_into()
    }

    async fn get_slip(&self, id: Uuid) -> Result<CourierSlip, AppError> {
        let pool = &self.pool;
        let row = with_backoff(READ_ATTEMPTS, || {
            sqlx::query_as::<_, SlipRow>(SELECT_SLIP)
                .bind(id)
                .fetch_optional(pool)
        })
        .await?
        .ok_or_else(|| slip_not_found(id))?;

        row.try_into()
    }

    async fn list_slips(&self, courier_id: Option<Uuid>) -> Result<Vec<CourierSlip>, AppError> {
        let pool = &self.pool;
        let rows = with_backoff(READ_ATTEMPTS, || {
            sqlx::query_as::<_, SlipRow>(LIST_SLIPS)
                .bind(courier_id)
                .fetch_all(pool)
        })
        .await?;

        rows.into_iter().map(CourierSlip::try_from).collect()
    }

    async fn set_slip_weight(&self, id: Uuid, weight_kg: f64) -> Result<CourierSlip, AppError> {
        let row = sqlx::query_as::<_, SlipRow>(SET_SLIP_WEIGHT)
            .bind(id)
            .bind(weight_kg)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| slip_not_found(id))?;

        row.try_into()
    }

    async fn count_slips(&self) -> Result<usize, AppError> {
        let pool = &self.pool;
        let count = with_backoff(READ_ATTEMPTS, || {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM courier_slips").fetch_one(pool)
        })
        .await?;

        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn express_mode(&self) -> Result<ExpressModeSetting, AppError> {
        let pool = &self.pool;
        let (enabled, updated_at) = with_backoff(READ_ATTEMPTS, || {
            sqlx::query_as::<_, (bool, DateTime<Utc>)>(
                "SELECT enabled, updated_at FROM express_mode_setting WHERE id = 1",
            )
            .fetch_one(pool)
        })
        .await?;

        Ok(ExpressModeSetting {
            enabled,
            updated_at,
        })
    }

    async fn set_express_mode(&self, enabled: bool) -> Result<ExpressModeSetting, AppError> {
        let (enabled, updated_at) = sqlx::query_as::<_, (bool, DateTime<Utc>)>(
            "INSERT INTO express_mode_setting (id, enabled, updated_at) VALUES (1, $1, now()) \
             ON CONFLICT (id) DO UPDATE SET enabled = EXCLUDED.enabled, updated_at = now() \
             RETURNING enabled, updated_at",
        )
        .bind(enabled)
        .fetch_one(&self.pool)
        .await?;

        Ok(ExpressModeSetting {
            enabled,
            updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{classify_allocation_miss, CourierRow, SchemeColumns};
    use crate::engine::allocator::OverflowPolicy;
    use crate::error::AppError;
    use crate::models::courier::{CourierPartner, TrackingMode, TrackingRange, TrackingScheme};

    fn row() -> CourierRow {
        CourierRow {
            id: Uuid::new_v4(),
            name: "DTDC".to_string(),
            is_custom_courier: false,
            prefix: Some("D".to_string()),
            starting_tracking_number: Some(1),
            current_tracking_number: Some(40),
            end_tracking_number: Some(500),
            express_prefix: None,
            express_starting_tracking_number: None,
            express_current_tracking_number: None,
            express_end_tracking_number: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn row_without_express_columns_has_no_express_range() {
        let courier = CourierPartner::try_from(row()).unwrap();

        assert_eq!(courier.range(TrackingMode::Standard).unwrap().current, 40);
        assert!(courier.range(TrackingMode::Express).is_none());
    }

    #[test]
    fn sequential_row_missing_counter_is_rejected() {
        let mut broken = row();
        broken.current_tracking_number = None;

        let err = CourierPartner::try_from(broken).unwrap_err();

        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn custom_row_ignores_range_columns() {
        let mut custom = row();
        custom.is_custom_courier = true;

        let courier = CourierPartner::try_from(custom).unwrap();

        assert_eq!(courier.scheme, TrackingScheme::Manual);
    }

    #[test]
    fn manual_scheme_writes_null_ranges() {
        let columns = SchemeColumns::from(&TrackingScheme::Manual);

        assert!(columns.is_custom_courier);
        assert_eq!(columns.current, None);
        assert_eq!(columns.express_end, None);
    }

    #[test]
    fn express_range_fills_express_columns_only() {
        let scheme = TrackingScheme::Sequential {
            standard: TrackingRange {
                prefix: None,
                start: 1,
                current: 1,
                end: 10,
            },
            express: Some(TrackingRange {
                prefix: Some("XP".to_string()),
                start: 5000,
                current: 5000,
                end: 9999,
            }),
        };

        let columns = SchemeColumns::from(&scheme);

        assert_eq!(columns.prefix, None);
        assert_eq!(columns.express_prefix.as_deref(), Some("XP"));
        assert_eq!(columns.express_current, Some(5000));
    }

    #[test]
    fn allocation_miss_on_missing_row_is_not_found() {
        let err = classify_allocation_miss(
            Uuid::new_v4(),
            None,
            TrackingMode::Standard,
            OverflowPolicy::Reject,
        );

        assert!(matches!(err, AppError::NotFound(msg) if msg == "Courier not found"));
    }

    #[test]
    fn allocation_miss_with_room_left_is_not_exhaustion() {
        let courier = CourierPartner::try_from(row()).unwrap();

        let err = classify_allocation_miss(
            courier.id,
            Some(courier),
            TrackingMode::Standard,
            OverflowPolicy::Reject,
        );

        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn allocation_miss_at_end_is_exhaustion_only_under_reject() {
        let mut full = row();
        full.current_tracking_number = Some(500);
        let courier = CourierPartner::try_from(full).unwrap();

        let rejected = classify_allocation_miss(
            courier.id,
            Some(courier.clone()),
            TrackingMode::Standard,
            OverflowPolicy::Reject,
        );
        let allowed = classify_allocation_miss(
            courier.id,
            Some(courier),
            TrackingMode::Standard,
            OverflowPolicy::Allow,
        );

        assert!(matches!(rejected, AppError::RangeExhausted { end: 500, .. }));
        assert!(matches!(allowed, AppError::Internal(_)));
    }

    #[test]
    fn allocation_miss_explains_custom_and_missing_express() {
        let courier = CourierPartner::try_from(row()).unwrap();
        let mut custom = row();
        custom.is_custom_courier = true;
        let custom = CourierPartner::try_from(custom).unwrap();

        let express = classify_allocation_miss(
            courier.id,
            Some(courier),
            TrackingMode::Express,
            OverflowPolicy::Reject,
        );
        let manual = classify_allocation_miss(
            custom.id,
            Some(custom),
            TrackingMode::Standard,
            OverflowPolicy::Reject,
        );

        assert!(matches!(express, AppError::ExpressNotConfigured));
        assert!(matches!(manual, AppError::CustomCourier));
    }
}

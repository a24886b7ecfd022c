use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::courier::{CourierPartner, TrackingMode, TrackingRange, TrackingScheme};

/// Remaining-count threshold at or below which a range is reported as low.
pub const LOW_WATER_MARK: i64 = 10;

/// What happens when a range has no numbers left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Refuse to allocate past `end`.
    #[default]
    Reject,
    /// Keep counting past `end`; `remaining_count` goes negative.
    Allow,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "reject" => Ok(OverflowPolicy::Reject),
            "allow" => Ok(OverflowPolicy::Allow),
            other => Err(format!("expected `reject` or `allow`, got `{other}`")),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::Reject => f.write_str("reject"),
            OverflowPolicy::Allow => f.write_str("allow"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub new_number: i64,
    pub remaining_count: i64,
    pub is_low: bool,
}

impl Allocation {
    pub fn new(new_number: i64, end: i64) -> Self {
        let remaining_count = end.saturating_sub(new_number);
        Self {
            new_number,
            remaining_count,
            is_low: remaining_count <= LOW_WATER_MARK,
        }
    }
}

/// Advances the counter for `mode` in place and returns the issued number.
///
/// The courier is left untouched on error. Callers must hold exclusive access
/// to the record for the duration of the call; nothing here synchronizes.
pub fn advance(
    courier: &mut CourierPartner,
    mode: TrackingMode,
    policy: OverflowPolicy,
) -> Result<Allocation, AppError> {
    if courier.scheme.is_manual() {
        return Err(AppError::CustomCourier);
    }

    let range = courier.range_mut(mode).ok_or(AppError::ExpressNotConfigured)?;

    let new_number = range
        .current
        .checked_add(1)
        .ok_or_else(|| AppError::range_exhausted(mode, range.end))?;

    if policy == OverflowPolicy::Reject && new_number > range.end {
        return Err(AppError::range_exhausted(mode, range.end));
    }

    range.current = new_number;
    Ok(Allocation::new(new_number, range.end))
}

/// Renders the customer-facing tracking ID for a number drawn in `mode`.
pub fn format_tracking_id(courier: &CourierPartner, mode: TrackingMode, number: i64) -> String {
    format!("{}{number}", courier.prefix_for(mode))
}

/// Checks the range invariants an administrator must respect when writing a
/// courier.
/// Trims range prefixes in place so stored prefixes never carry whitespace.
pub fn normalize_scheme(mut scheme: TrackingScheme) -> TrackingScheme {
    if let TrackingScheme::Sequential { standard, express } = &mut scheme {
        for range in std::iter::once(standard).chain(express.as_mut()) {
            if let Some(prefix) = range.prefix.as_mut() {
                let trimmed = prefix.trim();
                if trimmed.len() != prefix.len() {
                    *prefix = trimmed.to_string();
                }
            }
        }
    }
    scheme
}

/// Counters only move forward: a reconfiguration may not hand out numbers
/// that were already issued.
pub fn check_no_rewind(old: &CourierPartner, new: &TrackingScheme) -> Result<(), AppError> {
    for mode in [TrackingMode::Standard, TrackingMode::Express] {
        let Some(before) = old.range(mode) else {
            continue;
        };
        let Some(after) = scheme_range(new, mode) else {
            continue;
        };
        if after.current < before.current {
            return Err(AppError::Conflict(format!(
                "{} range: current cannot move back from {} to {}",
                mode.as_str(),
                before.current,
                after.current
            )));
        }
    }
    Ok(())
}

fn scheme_range(scheme: &TrackingScheme, mode: TrackingMode) -> Option<&TrackingRange> {
    match (scheme, mode) {
        (TrackingScheme::Manual, _) => None,
        (TrackingScheme::Sequential { standard, .. }, TrackingMode::Standard) => Some(standard),
        (TrackingScheme::Sequential { express, .. }, TrackingMode::Express) => express.as_ref(),
    }
}

pub fn validate_scheme(scheme: &TrackingScheme) -> Result<(), AppError> {
    let TrackingScheme::Sequential { standard, express } = scheme else {
        return Ok(());
    };

    let ranges = std::iter::once((TrackingMode::Standard, standard))
        .chain(express.iter().map(|range| (TrackingMode::Express, range)));

    for (mode, range) in ranges {
        if range.start > range.end {
            return Err(AppError::BadRequest(format!(
                "{} range: start must be <= end",
                mode.as_str()
            )));
        }
        if range.current < range.start || range.current > range.end {
            return Err(AppError::BadRequest(format!(
                "{} range: current must lie within start..=end",
                mode.as_str()
            )));
        }
        if let Some(prefix) = &range.prefix {
            if prefix.trim().is_empty() {
                return Err(AppError::BadRequest(format!(
                    "{} range: prefix cannot be blank",
                    mode.as_str()
                )));
            }
        }
    }

    Ok(())
}

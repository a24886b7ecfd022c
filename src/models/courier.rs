use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    Standard,
    Express,
}

impl TrackingMode {
    pub fn from_flag(is_express_mode: bool) -> Self {
        if is_express_mode {
            TrackingMode::Express
        } else {
            TrackingMode::Standard
        }
    }

    pub fn is_express(self) -> bool {
        self == TrackingMode::Express
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrackingMode::Standard => "standard",
            TrackingMode::Express => "express",
        }
    }
}

/// One numbering range. `current` is the last number handed out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRange {
    #[serde(default)]
    pub prefix: Option<String>,
    pub start: i64,
    pub current: i64,
    pub end: i64,
}

/// How a courier's tracking IDs come into existence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TrackingScheme {
    /// Custom courier: the operator types the tracking ID.
    Manual,
    Sequential {
        standard: TrackingRange,
        #[serde(default)]
        express: Option<TrackingRange>,
    },
}

impl TrackingScheme {
    pub fn is_manual(&self) -> bool {
        matches!(self, TrackingScheme::Manual)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourierPartner {
    pub id: Uuid,
    pub name: String,
    pub scheme: TrackingScheme,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CourierPartner {
    pub fn range(&self, mode: TrackingMode) -> Option<&TrackingRange> {
        match (&self.scheme, mode) {
            (TrackingScheme::Manual, _) => None,
            (TrackingScheme::Sequential { standard, .. }, TrackingMode::Standard) => Some(standard),
            (TrackingScheme::Sequential { express, .. }, TrackingMode::Express) => express.as_ref(),
        }
    }

    pub fn range_mut(&mut self, mode: TrackingMode) -> Option<&mut TrackingRange> {
        match (&mut self.scheme, mode) {
            (TrackingScheme::Manual, _) => None,
            (TrackingScheme::Sequential { standard, .. }, TrackingMode::Standard) => Some(standard),
            (TrackingScheme::Sequential { express, .. }, TrackingMode::Express) => express.as_mut(),
        }
    }

    /// Prefix applied to numbers drawn in `mode`. Express falls back to
    /// `EX-` plus the standard prefix when no express prefix is configured.
    pub fn prefix_for(&self, mode: TrackingMode) -> String {
        let TrackingScheme::Sequential { standard, express } = &self.scheme else {
            return String::new();
        };

        let standard_prefix = standard.prefix.as_deref().unwrap_or_default();
        match mode {
            TrackingMode::Standard => standard_prefix.to_string(),
            TrackingMode::Express => match express.as_ref().and_then(|r| r.prefix.as_deref()) {
                Some(prefix) => prefix.to_string(),
                None => format!("EX-{standard_prefix}"),
            },
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Global express-mode toggle shown in the slip form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressModeSetting {
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl Default for ExpressModeSetting {
    fn default() -> Self {
        Self {
            enabled: false,
            updated_at: Utc::now(),
        }
    }
}

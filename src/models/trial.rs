use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TRIALS: u32 = 3;

/// Free-identification quota. `remaining_credits` never goes below zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrialState {
    pub remaining_credits: u32,
    pub max_credits: u32,
    pub first_use_timestamp: Option<DateTime<Utc>>,
}

impl Default for TrialState {
    fn default() -> Self {
        Self {
            remaining_credits: DEFAULT_MAX_TRIALS,
            max_credits: DEFAULT_MAX_TRIALS,
            first_use_timestamp: None,
        }
    }
}

impl TrialState {
    pub fn can_identify(&self) -> bool {
        self.remaining_credits > 0
    }

    pub fn is_expired(&self) -> bool {
        !self.can_identify()
    }

    /// Remaining credits as a percentage of the allowance (0..=100).
    pub fn progress_percentage(&self) -> f32 {
        if self.max_credits == 0 {
            return 0.0;
        }
        self.remaining_credits as f32 / self.max_credits as f32 * 100.0
    }
}

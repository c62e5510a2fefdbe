//! Action-token ledger
//!
//! Every mutating combat request carries an action token. The ledger makes
//! sure the action behind a token is applied at most once: the first caller
//! to move the record from PENDING/FAILED to PROCESSING owns it, and later
//! submissions of an APPLIED token get the cached result back instead of
//! running again.

mod records;

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use records::{Acquire, AcquireMeta, ActionLedger, ActionRecord, SweepReport};

/// Lifecycle of an action record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Pending,
    Processing,
    Applied,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "PENDING",
            ActionStatus::Processing => "PROCESSING",
            ActionStatus::Applied => "APPLIED",
            ActionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<ActionStatus> {
        match s {
            "PENDING" => Some(ActionStatus::Pending),
            "PROCESSING" => Some(ActionStatus::Processing),
            "APPLIED" => Some(ActionStatus::Applied),
            "FAILED" => Some(ActionStatus::Failed),
            _ => None,
        }
    }

    /// Whether a caller may move this record to PROCESSING
    pub fn is_acquirable(&self) -> bool {
        matches!(self, ActionStatus::Pending | ActionStatus::Failed)
    }
}

/// Generate an unguessable action token
pub fn generate_token() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    let mut hasher = Sha256::new();
    hasher.update(random_bytes);
    hasher.update(
        chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(0)
            .to_le_bytes(),
    );
    hex::encode(hasher.finalize())
}

//! Owner DTOs

use serde::{Deserialize, Serialize};

use crate::domain::status::CancelOutcome;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub outcome: CancelOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: usize,
}

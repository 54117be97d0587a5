//! Typed error hierarchy for the board engine.
//!
//! Every operation in the storage and API layers returns `BoardError` so
//! callers can match on the outcome instead of parsing message strings.
//! `code()` exposes the stable machine-readable code carried on the wire;
//! the `Display` messages name the offending ids and stages.

use thiserror::Error;

use crate::board::models::StageId;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Project {id} not found")]
    ProjectNotFound { id: i64 },

    #[error("Item {id} not found")]
    ItemNotFound { id: i64 },

    #[error("Mission {id} not found")]
    MissionNotFound { id: i64 },

    #[error("Invalid transition from '{from}' to '{to}'")]
    InvalidTransition { from: StageId, to: StageId },

    #[error("WIP limit exceeded for stage '{stage}': {current} of {limit} slots in use")]
    WipLimitExceeded {
        stage: StageId,
        limit: u32,
        current: u32,
    },

    #[error("Item {item_id} is already claimed by '{held_by}'")]
    ClaimConflict { item_id: i64, held_by: String },

    #[error("Unknown stage: '{value}'")]
    UnknownStage { value: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BoardError {
    /// Stable machine-readable code, carried alongside the human message in
    /// API responses. Codes never change across releases; messages may.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProjectNotFound { .. } | Self::ItemNotFound { .. } | Self::MissionNotFound { .. } => {
                "not-found"
            }
            Self::InvalidTransition { .. } => "invalid-transition",
            Self::WipLimitExceeded { .. } => "wip-limit-exceeded",
            Self::ClaimConflict { .. } => "claim-conflict",
            Self::UnknownStage { .. } | Self::Validation(_) => "validation",
            Self::Storage(_) | Self::Internal(_) => "storage",
        }
    }
}

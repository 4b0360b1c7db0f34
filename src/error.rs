//! Error type shared by the engine, the desk service and the HTTP layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeskError>;

#[derive(Error, Debug)]
pub enum DeskError {
    /// Fewer than three entrants cannot be split into heats
    #[error("Cannot split {0} participants into groups of 3 or 4.")]
    InvalidGroupCount(usize),

    #[error("No combination of 3s and 4s covers {0} participants.")]
    UngroupableCount(usize),

    #[error("Duplicate position in heat {heat_id}.")]
    DuplicatePosition { heat_id: u64 },

    #[error("Position {position} is out of range for heat {heat_id} ({slots} slots).")]
    InvalidPosition { heat_id: u64, position: i64, slots: usize },

    /// Lookup of an event, heat or participant failed
    #[error("Not found: {0}")]
    MissingEntity(String),

    #[error("No {0} submitted.")]
    EmptySubmission(&'static str),

    #[error("At least 2 participants are required, found {0}.")]
    NotEnoughParticipants(usize),

    #[error("Participant name must not be empty.")]
    InvalidName,

    #[error("Unsupported seed list size {0}.")]
    InvalidSeedCount(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeskError {
    /// Stable machine-readable tag used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            DeskError::InvalidGroupCount(_) => "invalid_group_count",
            DeskError::UngroupableCount(_) => "ungroupable_count",
            DeskError::DuplicatePosition { .. } => "duplicate_position",
            DeskError::InvalidPosition { .. } => "invalid_position",
            DeskError::MissingEntity(_) => "missing_entity",
            DeskError::EmptySubmission(_) => "empty_submission",
            DeskError::NotEnoughParticipants(_) => "not_enough_participants",
            DeskError::InvalidName => "invalid_name",
            DeskError::InvalidSeedCount(_) => "invalid_seed_count",
            DeskError::Config(_) => "config",
            DeskError::Io(_) => "io",
            DeskError::Json(_) => "json",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DeskError::MissingEntity(_) => StatusCode::NOT_FOUND,
            DeskError::Config(_) | DeskError::Io(_) | DeskError::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for DeskError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        (self.status(), Json(body)).into_response()
    }
}

//! Subject-selection rules: which subjects a student may pick per slot, which
//! ones are placed automatically, and how choices become stored records.

pub mod catalogue;
pub mod filter;
pub mod mismatch;
pub mod model;
pub mod persist;
pub mod resolver;
pub mod rules;
pub mod validate;

use serde_json::json;

use persist::Unresolved;
use validate::Issue;

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("{value} is not an allowed option for {slot}")]
    OptionNotAllowed { slot: String, value: String },
    #[error("unknown slot: {0}")]
    UnknownSlot(String),
    #[error("student not found")]
    StudentNotFound,
    #[error("academic session not found")]
    SessionNotFound,
    #[error("catalogue changed (revision {current}, request had {given})")]
    StaleCatalogue { current: i64, given: i64 },
    #[error("selection has {} issue(s)", .0.len())]
    ValidationFailed(Vec<Issue>),
    #[error("{} selection(s) could not be resolved", .0.len())]
    Unresolved(Vec<Unresolved>),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SelectionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::OptionNotAllowed { .. } => "option_not_allowed",
            Self::UnknownSlot(_) => "bad_params",
            Self::StudentNotFound | Self::SessionNotFound => "not_found",
            Self::StaleCatalogue { .. } => "stale_catalogue",
            Self::ValidationFailed(_) => "validation_failed",
            Self::Unresolved(_) => "unresolved_selections",
            Self::Storage(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::OptionNotAllowed { slot, value } => Some(json!({ "slot": slot, "value": value })),
            Self::StaleCatalogue { current, .. } => Some(json!({ "revision": current })),
            Self::ValidationFailed(issues) => Some(json!({ "issues": issues })),
            Self::Unresolved(items) => Some(json!({ "unresolved": items })),
            _ => None,
        }
    }
}

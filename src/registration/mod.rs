//! CU registration correction requests: status lifecycle, declarations,
//! document uploads and application numbers.

pub mod appno;
pub mod archive;
pub mod status;
pub mod uploads;

use serde_json::json;

use status::CorrectionStatus;

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("correction request not found")]
    RequestNotFound,
    #[error("student not found")]
    StudentNotFound,
    #[error("document not found")]
    DocumentNotFound,
    #[error("unknown status: {0}")]
    UnknownStatus(String),
    #[error("cannot move from {} to {}", from.as_str(), to.as_str())]
    InvalidTransition {
        from: CorrectionStatus,
        to: CorrectionStatus,
    },
    #[error("declarations missing: {}", missing.join(", "))]
    DeclarationsIncomplete { missing: Vec<&'static str> },
    #[error("{document_type}: {reason}")]
    UploadRejected {
        document_type: String,
        reason: String,
    },
    #[error("application numbers exhausted")]
    ApplicationNumbersExhausted,
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RegistrationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RequestNotFound | Self::StudentNotFound | Self::DocumentNotFound => "not_found",
            Self::UnknownStatus(_) => "bad_params",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::DeclarationsIncomplete { .. } => "declarations_incomplete",
            Self::UploadRejected { .. } => "upload_rejected",
            Self::ApplicationNumbersExhausted => "conflict",
            Self::Io { .. } => "io_failed",
            Self::Storage(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InvalidTransition { from, to } => {
                Some(json!({ "from": from.as_str(), "to": to.as_str() }))
            }
            Self::DeclarationsIncomplete { missing } => Some(json!({ "missing": missing })),
            Self::UploadRejected { document_type, .. } => {
                Some(json!({ "documentType": document_type }))
            }
            _ => None,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

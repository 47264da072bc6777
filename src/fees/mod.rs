//! Fee setup (heads, concession slabs, receipt types, structures) and the
//! per-student payable arithmetic.

pub mod payable;

use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum FeesError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{what} is still referenced by {count} {by}")]
    InUse {
        what: &'static str,
        by: &'static str,
        count: i64,
    },
    #[error("{0} already exists")]
    Duplicate(String),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl FeesError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InUse { .. } => "in_use",
            Self::Duplicate(_) => "conflict",
            Self::Invalid(_) => "bad_params",
            Self::Storage(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InUse { by, count, .. } => Some(json!({ "referencedBy": by, "count": count })),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingType {
    Full,
    Instalment,
}

impl MappingType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Instalment => "INSTALMENT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, FeesError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FULL" => Ok(Self::Full),
            "INSTALMENT" => Ok(Self::Instalment),
            other => Err(FeesError::Invalid(format!("unknown mapping type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMode {
    Cash,
    Cheque,
    Online,
}

impl PaymentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "CASH",
            Self::Cheque => "CHEQUE",
            Self::Online => "ONLINE",
        }
    }

    pub fn parse(s: &str) -> Result<Self, FeesError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CASH" => Ok(Self::Cash),
            "CHEQUE" => Ok(Self::Cheque),
            "ONLINE" => Ok(Self::Online),
            other => Err(FeesError::Invalid(format!("unknown payment mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        Self::Pending,
        Self::Completed,
        Self::Failed,
        Self::Refunded,
        Self::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, FeesError> {
        let t = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == t)
            .ok_or_else(|| FeesError::Invalid(format!("unknown payment status: {s}")))
    }
}

/// Percentages (head defaults, slab rates) live in 0..=100.
pub fn check_percentage(field: &str, value: f64) -> Result<f64, FeesError> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(FeesError::Invalid(format!("{field} must be between 0 and 100")));
    }
    Ok(value)
}

pub fn check_amount(field: &str, value: f64) -> Result<f64, FeesError> {
    if !value.is_finite() || value < 0.0 {
        return Err(FeesError::Invalid(format!("{field} must be a non-negative amount")));
    }
    Ok(value)
}

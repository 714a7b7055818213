use thiserror::Error;

use crate::table::TableId;

/// Error type for network model operations.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("contract violation: {0}")]
    ContractViolation(String),
    #[error("in use: {0}")]
    InUse(String),
    #[error("build of {0} was cancelled by a reset")]
    CancelledBuild(TableId),
    #[error("unknown type: {0}")]
    UnknownType(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unknown callback: {0}")]
    UnknownCallback(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl ModelError {
    pub fn contract<T: Into<String>>(msg: T) -> Self {
        ModelError::ContractViolation(msg.into())
    }

    pub fn in_use<T: Into<String>>(msg: T) -> Self {
        ModelError::InUse(msg.into())
    }

    pub fn cancelled(table_id: &TableId) -> Self {
        ModelError::CancelledBuild(table_id.clone())
    }

    pub fn unknown_type<T: Into<String>>(msg: T) -> Self {
        ModelError::UnknownType(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        ModelError::NotFound(msg.into())
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        ModelError::InvalidInput(msg.into())
    }

    pub fn unknown_callback<T: Into<String>>(msg: T) -> Self {
        ModelError::UnknownCallback(msg.into())
    }

    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        ModelError::Serialization(msg.into())
    }

    pub fn store<T: Into<String>>(msg: T) -> Self {
        ModelError::Store(msg.into())
    }

    /// True for errors that leave the entity registered and can be retried
    /// after the caller fixes the precondition.
    pub fn is_in_use(&self) -> bool {
        matches!(self, ModelError::InUse(_))
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::serialization(err.to_string())
    }
}

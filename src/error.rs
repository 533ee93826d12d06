//! Error types for iSCSI target operations

use crate::sense::SenseException;
use thiserror::Error;

/// iSCSI target errors
#[derive(Debug, Error)]
pub enum IscsiError {
    #[error(transparent)]
    Sense(#[from] SenseException),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for SCSI operations
pub type ScsiResult<T> = Result<T, IscsiError>;

//! Licensegate error types.

use std::collections::BTreeMap;
use thiserror::Error;

/// Per-field validation messages, keyed by request field name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Errors that can occur while binding machines or validating licenses.
#[derive(Debug, Error)]
pub enum LicensegateError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Request input is missing or malformed.
    #[error("Validation failed")]
    ValidationFailed {
        /// Messages for every failing field.
        errors: FieldErrors,
    },

    /// The presented credential does not resolve to a license.
    #[error("License not found")]
    LicenseNotFound,

    /// License status is not active.
    #[error("License is not active")]
    LicenseInactive,

    /// License expiration date lies before today.
    #[error("License has expired")]
    LicenseExpired,

    /// The client could not be resolved from the request.
    #[error("Client not found for {lookup}")]
    ClientNotFound {
        /// Human-readable description of the lookup that failed.
        lookup: String,
    },

    /// No machine with this fingerprint is bound to the license.
    #[error("Machine not found or not registered with this license")]
    MachineNotFound,

    /// The fingerprint is already bound to this license.
    #[error("Machine is already registered with this license")]
    AlreadyRegistered {
        /// External id of the existing machine.
        machine_id: String,
    },

    /// The fingerprint is bound to another license and the deployment
    /// forbids moving it.
    #[error("Machine fingerprint is already registered with another license")]
    DuplicateFingerprint {
        /// External id of the existing machine.
        machine_id: String,
    },

    /// The license has no free seat left.
    #[error("License has reached maximum machine count")]
    CapacityExceeded {
        /// Capacity of the license.
        max_count: u32,
    },

    /// Store invariant violated or store unavailable.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Snapshot file I/O error.
    #[error("Snapshot I/O error: {0}")]
    SnapshotIO(String),

    /// Unexpected failure outside the store.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LicensegateError {
    /// Build a validation error for a single field.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        Self::ValidationFailed { errors }
    }

    /// Whether this error is an unexpected failure rather than a domain outcome.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::ConfigError(_) | Self::Storage(_) | Self::SnapshotIO(_) | Self::Internal(_)
        )
    }

    /// External id of an existing machine, carried by conflict errors.
    pub fn conflicting_machine_id(&self) -> Option<&str> {
        match self {
            Self::AlreadyRegistered { machine_id } | Self::DuplicateFingerprint { machine_id } => {
                Some(machine_id)
            }
            _ => None,
        }
    }
}

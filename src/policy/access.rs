//! License usability and seat capacity enforcement.
//!
//! This module enforces access policies based on:
//! - License status (must be active)
//! - Expiration date (must not lie before today)
//! - Seat capacity (bound machines must stay within `max_count`)

use crate::protocol::models::{License, RecordStatus};
use crate::LicensegateError;
use chrono::NaiveDate;

/// Check that a license may accept new bindings.
///
/// # Returns
/// * `Ok(())` - License is usable
/// * `Err(LicenseInactive)` - Status is not active
/// * `Err(LicenseExpired)` - Expiration date is before `today`
pub fn check_license_usable(license: &License, today: NaiveDate) -> Result<(), LicensegateError> {
    if license.is_usable(today) {
        return Ok(());
    }

    // Status gate is reported ahead of expiration
    if license.status != RecordStatus::Active {
        Err(LicensegateError::LicenseInactive)
    } else {
        Err(LicensegateError::LicenseExpired)
    }
}

/// Seat usage of a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatCaps {
    /// Seat limit (None = unlimited)
    pub max_count: Option<u32>,

    /// Machines currently bound.
    pub current_count: u64,
}

impl SeatCaps {
    /// Seat usage for a license with `current_count` bound machines.
    pub fn from_license(license: &License, current_count: u64) -> Self {
        Self {
            max_count: license.max_count,
            current_count,
        }
    }

    /// Check if `additional` new bindings fit.
    pub fn allows_binding(&self, additional: u64) -> bool {
        match self.max_count {
            Some(limit) => self.current_count + additional <= u64::from(limit),
            None => true,
        }
    }
}

/// Check that one more machine may be bound to `license`.
pub fn check_capacity(license: &License, current_count: u64) -> Result<(), LicensegateError> {
    if !SeatCaps::from_license(license, current_count).allows_binding(1) {
        return Err(LicensegateError::CapacityExceeded {
            max_count: license.max_count.unwrap_or_default(),
        });
    }

    Ok(())
}

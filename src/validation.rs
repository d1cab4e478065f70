//! Read-only license validation.

use crate::clock::{Clock, SystemClock};
use crate::config::CredentialKind;
use crate::engine::credential_label;
use crate::protocol::models::{LicenseSnapshot, PackageInfo, ValidateLicenseRequest};
use crate::store::{BindingStore, LicenseStore};
use crate::LicensegateError;
use std::sync::Arc;
use tracing::debug;

/// Answers "is this license usable, and how many seats are taken".
///
/// Never mutates state, so it is safe to poll at any frequency.
pub struct ValidationService<S: BindingStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    credential: CredentialKind,
}

impl<S: BindingStore> Clone for ValidationService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            credential: self.credential,
        }
    }
}

impl<S: BindingStore> ValidationService<S> {
    /// Service using the system clock.
    pub fn new(store: Arc<S>, credential: CredentialKind) -> Self {
        Self::with_clock(store, credential, Arc::new(SystemClock))
    }

    /// Service with a custom clock.
    pub fn with_clock(store: Arc<S>, credential: CredentialKind, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            credential,
        }
    }

    /// Snapshot of a license's state.
    ///
    /// `is_expired` is true when an expiration date is set and lies before
    /// today; `is_active` requires active status and not expired.
    /// `current_count` is counted live.
    ///
    /// # Errors
    /// - `ValidationFailed` - Credential missing
    /// - `LicenseNotFound` - Unknown credential
    pub fn validate_license(
        &self,
        request: &ValidateLicenseRequest,
    ) -> Result<LicenseSnapshot, LicensegateError> {
        let credential = request.validate(self.credential)?;
        let today = self.clock.today();

        let snapshot = self.store.read(|tables| {
            let license = tables
                .find_license(&credential)?
                .ok_or(LicensegateError::LicenseNotFound)?;
            let current_count = tables.count_bound_machines(license.id)?;
            let package = match license.package {
                Some(id) => tables.find_package(id)?.as_ref().map(PackageInfo::from),
                None => None,
            };

            Ok(LicenseSnapshot {
                is_active: license.is_usable(today),
                is_expired: license.is_expired(today),
                license_id: license.license_id,
                license_type: license.license_type,
                status: license.status,
                expiration_date: license.expiration_date,
                max_count: license.max_count,
                current_count,
                renewal_terms: license.renewal_terms,
                package,
            })
        })?;

        debug!(
            credential = %credential_label(&credential),
            active = snapshot.is_active,
            current_count = snapshot.current_count,
            "license validated"
        );
        Ok(snapshot)
    }
}

//! Binding engine - registers, moves and rejects machine-to-license bindings.
//!
//! The `BindingEngine` is the write-side API:
//! - `register_machine` binds a fingerprint to a license under status,
//!   expiration and capacity constraints
//! - `check_machine` is the read-only "am I still registered" probe
//!
//! Client resolution and the treatment of a fingerprint bound to another
//! license are strategies selected by the deployment mode.

use crate::clock::{Clock, SystemClock};
use crate::config::{CredentialKind, LicensegateConfig};
use crate::policy::access::{check_capacity, check_license_usable};
use crate::policy::conflict::{ConflictAction, ConflictPolicy};
use crate::policy::resolver::{ClientIdentity, ClientResolver};
use crate::protocol::models::{
    CheckMachineRequest, Client, Credential, License, Machine, MachineProbe, NewMachine, Rebind,
    RecordStatus, RegisterMachine, RegisterMachineRequest, Registration, RegistrationData,
};
use crate::store::{key_fingerprint, BindingStore, LicenseStore, MachineRegistry};
use crate::LicensegateError;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Machine binding engine.
///
/// Create one per deployment and share it; clones are cheap.
pub struct BindingEngine<S: BindingStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    credential: CredentialKind,
    resolver: Arc<dyn ClientResolver>,
    policy: Arc<dyn ConflictPolicy>,
}

impl<S: BindingStore> Clone for BindingEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            credential: self.credential,
            resolver: Arc::clone(&self.resolver),
            policy: Arc::clone(&self.policy),
        }
    }
}

impl<S: BindingStore> BindingEngine<S> {
    /// Create an engine for the configured deployment mode.
    ///
    /// Uses the system clock for expiration checks.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is inconsistent.
    pub fn new(store: Arc<S>, config: &LicensegateConfig) -> Result<Self, LicensegateError> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create an engine with a custom clock.
    pub fn with_clock(
        store: Arc<S>,
        config: &LicensegateConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LicensegateError> {
        config.validate()?;
        let (resolver, policy) = config.mode.strategies();

        Ok(Self {
            store,
            clock,
            credential: config.credential,
            resolver: Arc::from(resolver),
            policy: Arc::from(policy),
        })
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Register a machine against a license.
    ///
    /// Preconditions are checked in order, stopping at the first failure:
    /// 1. The credential resolves to a license
    /// 2. The license is active
    /// 3. The license is not expired
    /// 4. The client resolves
    /// 5. The fingerprint is not already bound to this license; if it is
    ///    bound elsewhere the conflict policy decides
    /// 6. The license has a free seat
    ///
    /// A move counts as a new binding on the target license, so moving onto
    /// a full license fails with `CapacityExceeded` and leaves the machine
    /// where it was.
    ///
    /// The whole sequence runs in one store transaction, so two concurrent
    /// registrations can never both take the last seat.
    ///
    /// # Errors
    /// - `ValidationFailed` - Missing or malformed input
    /// - `LicenseNotFound`, `LicenseInactive`, `LicenseExpired`
    /// - `ClientNotFound` - The client lookup did not resolve
    /// - `AlreadyRegistered` - Fingerprint already bound to this license
    /// - `DuplicateFingerprint` - Bound elsewhere and the policy rejects
    /// - `CapacityExceeded` - No free seat, including on the target of a move
    pub fn register_machine(
        &self,
        request: &RegisterMachineRequest,
    ) -> Result<Registration, LicensegateError> {
        let input = request.validate(self.credential, self.resolver.as_ref())?;
        let credential = credential_label(&input.credential);
        let today = self.clock.today();

        let result = self
            .store
            .transaction(|tables| self.bind(tables, &input, today));

        match &result {
            Ok(Registration::Created(data)) => info!(
                credential = %credential,
                machine_id = %data.machine_id,
                license_id = %data.license_id,
                "machine registered"
            ),
            Ok(Registration::Moved(data)) => info!(
                credential = %credential,
                machine_id = %data.machine_id,
                license_id = %data.license_id,
                policy = self.policy.name(),
                "machine moved to license"
            ),
            Err(e) if e.is_internal() => error!(
                credential = %credential,
                error = %e,
                "registration failed"
            ),
            Err(e) => warn!(
                credential = %credential,
                resolver = self.resolver.name(),
                reason = %e,
                "registration rejected"
            ),
        }

        result
    }

    /// Check whether a fingerprint is bound to a license.
    ///
    /// When the deployment scopes probes to the client and the request names
    /// one, the machine must also belong to that client.
    ///
    /// # Errors
    /// - `ValidationFailed` - Missing or malformed input
    /// - `LicenseNotFound` - Unknown credential
    /// - `ClientNotFound` - A scoping client was named but does not exist
    /// - `MachineNotFound` - No matching binding
    pub fn check_machine(
        &self,
        request: &CheckMachineRequest,
    ) -> Result<MachineProbe, LicensegateError> {
        let input = request.validate(self.credential, self.resolver.as_ref())?;

        let result = self.store.read(|tables| {
            let license = tables
                .find_license(&input.credential)?
                .ok_or(LicensegateError::LicenseNotFound)?;

            let owner = if self.resolver.scopes_checks() && self.resolver.has_lookup(&input.client) {
                Some(self.resolver.resolve(tables, &input.client)?)
            } else {
                None
            };

            let machine = tables
                .find_machine_by_fingerprint_and_license(&input.fingerprint, license.id)?
                .filter(|m| owner.as_ref().map_or(true, |client| m.client == client.id))
                .ok_or(LicensegateError::MachineNotFound)?;

            Ok(MachineProbe {
                machine_id: machine.machine_id,
                status: machine.status,
                license_id: license.license_id,
                exists: true,
            })
        });

        debug!(
            credential = %credential_label(&input.credential),
            found = result.is_ok(),
            "machine probe"
        );
        result
    }

    fn bind(
        &self,
        tables: &mut S::Tables,
        input: &RegisterMachine,
        today: NaiveDate,
    ) -> Result<Registration, LicensegateError> {
        // 1-3. License exists and is usable
        let license = tables
            .find_license(&input.credential)?
            .ok_or(LicensegateError::LicenseNotFound)?;
        check_license_usable(&license, today)?;

        // 4. Client
        let client = self.resolver.resolve(&*tables, &input.client)?;

        // 5. Existing binding
        if let Some(existing) = tables.find_machine_by_fingerprint(&input.fingerprint)? {
            if existing.license == license.id {
                return Err(LicensegateError::AlreadyRegistered {
                    machine_id: existing.machine_id,
                });
            }

            return match self.policy.on_foreign_binding(&existing) {
                ConflictAction::Reject => Err(LicensegateError::DuplicateFingerprint {
                    machine_id: existing.machine_id,
                }),
                ConflictAction::Rebind => {
                    let count = tables.count_bound_machines(license.id)?;
                    check_capacity(&license, count)?;

                    let moved = tables.rebind_machine(
                        &existing,
                        Rebind {
                            license: license.id,
                            client: client.id,
                            status: RecordStatus::Active,
                            hostname: input.hostname.clone(),
                            descriptors: input.descriptors.clone(),
                        },
                    )?;
                    Ok(Registration::Moved(self.describe(&moved, &license, &client, true)))
                }
            };
        }

        // 6. Capacity
        let count = tables.count_bound_machines(license.id)?;
        check_capacity(&license, count)?;

        // 7. Create
        let machine = tables.create_machine(NewMachine {
            fingerprint: input.fingerprint.clone(),
            hostname: input.hostname.clone(),
            client: client.id,
            license: license.id,
            status: RecordStatus::Active,
            descriptors: input.descriptors.clone(),
        })?;
        Ok(Registration::Created(self.describe(&machine, &license, &client, false)))
    }

    fn describe(
        &self,
        machine: &Machine,
        license: &License,
        client: &Client,
        moved: bool,
    ) -> RegistrationData {
        let (client_id, client_email) = match self.resolver.identify(client) {
            ClientIdentity::Id(id) => (Some(id), None),
            ClientIdentity::Email(email) => (None, Some(email)),
        };

        RegistrationData {
            machine_id: machine.machine_id.clone(),
            hostname: machine.hostname.clone(),
            license_id: license.license_id.clone(),
            client_id,
            client_email,
            moved: moved.then_some(true),
        }
    }
}

/// Log-safe label for a credential. Keys are hashed, ids are not secret.
pub(crate) fn credential_label(credential: &Credential) -> String {
    match credential {
        Credential::Key(key) => format!("key:{}", key_fingerprint(key)),
        Credential::Id(id) => format!("id:{}", id),
    }
}

//! Collaborator interfaces over the license, machine and client tables.
//!
//! The binding engine never touches storage directly. It reads through
//! [`BindingStore::read`] and performs every check-then-act sequence inside
//! [`BindingStore::transaction`], which grants exclusive access to the
//! tables until the closure returns.

pub mod file;
pub mod format;
pub mod memory;

use crate::protocol::models::{
    Client, ClientHost, Credential, License, Machine, NewMachine, Package, Rebind, RowId,
};
use crate::LicensegateError;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Read access to licenses.
pub trait LicenseStore {
    /// Look up a license by its secret key.
    fn find_license_by_key(&self, key: &str) -> Result<Option<License>, LicensegateError>;

    /// Look up a license by its external id.
    fn find_license_by_id(&self, license_id: &str) -> Result<Option<License>, LicensegateError>;

    /// Live count of machines bound to a license.
    fn count_bound_machines(&self, license: RowId) -> Result<u64, LicensegateError>;

    /// Look up a package.
    fn find_package(&self, package: RowId) -> Result<Option<Package>, LicensegateError>;

    /// Look up a license by whichever credential the caller presented.
    fn find_license(&self, credential: &Credential) -> Result<Option<License>, LicensegateError> {
        match credential {
            Credential::Key(key) => self.find_license_by_key(key),
            Credential::Id(id) => self.find_license_by_id(id),
        }
    }
}

/// Machine records keyed by fingerprint.
pub trait MachineRegistry {
    /// Any machine with this fingerprint, whatever its license.
    fn find_machine_by_fingerprint(&self, fingerprint: &str)
        -> Result<Option<Machine>, LicensegateError>;

    /// The machine with this fingerprint if it is bound to `license`.
    fn find_machine_by_fingerprint_and_license(
        &self,
        fingerprint: &str,
        license: RowId,
    ) -> Result<Option<Machine>, LicensegateError>;

    /// Create a machine. Fails if the fingerprint is already known.
    fn create_machine(&mut self, attributes: NewMachine) -> Result<Machine, LicensegateError>;

    /// Move a machine to another license and client in one update.
    fn rebind_machine(&mut self, machine: &Machine, target: Rebind)
        -> Result<Machine, LicensegateError>;
}

/// Client lookups used by the resolvers.
pub trait ClientDirectory {
    /// Look up a client by internal id.
    fn find_client(&self, id: RowId) -> Result<Option<Client>, LicensegateError>;

    /// Look up a client by email, ignoring ASCII case.
    fn find_client_by_email(&self, email: &str) -> Result<Option<Client>, LicensegateError>;

    /// Look up a pre-registered hostname record.
    fn find_client_host(&self, hostname: &str) -> Result<Option<ClientHost>, LicensegateError>;
}

/// A store the binding engine can run against.
pub trait BindingStore: Send + Sync {
    /// Table view handed to closures.
    type Tables: LicenseStore + MachineRegistry + ClientDirectory;

    /// Run `f` with shared read access.
    fn read<T, F>(&self, f: F) -> Result<T, LicensegateError>
    where
        F: FnOnce(&Self::Tables) -> Result<T, LicensegateError>;

    /// Run `f` with exclusive access. Mutations made by `f` are kept only if
    /// it returns `Ok` and the store commits them.
    fn transaction<T, F>(&self, f: F) -> Result<T, LicensegateError>
    where
        F: FnOnce(&mut Self::Tables) -> Result<T, LicensegateError>;
}

/// Generator for opaque external ids.
pub trait IdGenerator: Send + Sync {
    /// A new random id.
    fn generate(&self) -> String;
}

/// Length of generated external ids.
pub const EXTERNAL_ID_LEN: usize = 10;

/// Random alphanumeric ids.
#[derive(Debug, Clone, Copy)]
pub struct RandomIdGenerator {
    len: usize,
}

impl RandomIdGenerator {
    /// Generator producing ids of `len` characters.
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new(EXTERNAL_ID_LEN)
    }
}

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.len)
            .map(char::from)
            .collect()
    }
}

/// Compute a SHA-256 hash prefix of a license key for logs.
///
/// This avoids writing the raw key anywhere.
pub fn key_fingerprint(license_key: &str) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(license_key.as_bytes());
    hex::encode(&hash[..8])
}

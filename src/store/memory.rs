//! In-process store with journaled transactions and optional snapshot
//! persistence.
//!
//! Reads share a read lock. Transactions hold the write lock for their whole
//! duration, so a capacity count followed by a create can never interleave
//! with another registration. Every mutation is journaled; a failed
//! transaction (closure error or snapshot write failure) replays the journal
//! backwards and leaves the tables exactly as they were.

use crate::clock::{Clock, SystemClock};
use crate::protocol::models::{
    Client, ClientHost, License, LicenseType, Machine, NewMachine, Package, Rebind, RecordStatus,
    RowId,
};
use crate::store::file::SnapshotFile;
use crate::store::format::{Snapshot, SNAPSHOT_VERSION};
use crate::store::{
    BindingStore, ClientDirectory, IdGenerator, LicenseStore, MachineRegistry, RandomIdGenerator,
};
use crate::LicensegateError;
use chrono::NaiveDate;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Attempts at drawing an unused external id before giving up.
const ID_ATTEMPTS: usize = 16;

/// Attributes for a new license.
#[derive(Debug, Clone)]
pub struct NewLicense {
    /// Secret key. Must be unique.
    pub license_key: String,
    /// Entitlement kind.
    pub license_type: LicenseType,
    /// Capacity (None = unlimited, zero is rejected).
    pub max_count: Option<u32>,
    /// Last valid day.
    pub expiration_date: Option<NaiveDate>,
    /// Initial status.
    pub status: RecordStatus,
    /// Renewal terms.
    pub renewal_terms: Option<String>,
    /// Entitled package.
    pub package: Option<RowId>,
}

/// Attributes for a new package.
#[derive(Debug, Clone, Default)]
pub struct NewPackage {
    /// Display name.
    pub name: String,
    /// Version string.
    pub version: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Support contact.
    pub support_contact: Option<String>,
    /// Key-value metadata.
    pub meta: BTreeMap<String, String>,
}

#[derive(Debug)]
enum Undo {
    PackageInserted(RowId),
    ClientInserted(RowId),
    HostInserted(String),
    LicenseInserted(RowId),
    LicenseRemoved(License, Vec<Machine>),
    MachineCreated(RowId),
    MachineReplaced(Machine),
}

/// The store tables with their lookup indexes.
pub struct Tables {
    packages: BTreeMap<RowId, Package>,
    clients: BTreeMap<RowId, Client>,
    client_hosts: BTreeMap<String, ClientHost>,
    licenses: BTreeMap<RowId, License>,
    machines: BTreeMap<RowId, Machine>,

    license_by_key: HashMap<String, RowId>,
    license_by_external: HashMap<String, RowId>,
    machine_by_fingerprint: HashMap<String, RowId>,
    machine_by_external: HashMap<String, RowId>,

    next_row: RowId,
    journal: Vec<Undo>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Tables {
    fn empty(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            packages: BTreeMap::new(),
            clients: BTreeMap::new(),
            client_hosts: BTreeMap::new(),
            licenses: BTreeMap::new(),
            machines: BTreeMap::new(),
            license_by_key: HashMap::new(),
            license_by_external: HashMap::new(),
            machine_by_fingerprint: HashMap::new(),
            machine_by_external: HashMap::new(),
            next_row: 1,
            journal: Vec::new(),
            clock,
            ids,
        }
    }

    fn from_snapshot(
        snapshot: Snapshot,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, LicensegateError> {
        snapshot.check_integrity()?;

        let mut tables = Self::empty(clock, ids);
        tables.next_row = snapshot.max_row_id() + 1;
        for package in snapshot.packages {
            tables.packages.insert(package.id, package);
        }
        for client in snapshot.clients {
            tables.clients.insert(client.id, client);
        }
        for host in snapshot.client_hosts {
            tables.client_hosts.insert(host.hostname.clone(), host);
        }
        for license in snapshot.licenses {
            tables.put_license(license);
        }
        for machine in snapshot.machines {
            tables.put_machine(machine);
        }
        Ok(tables)
    }

    /// Copy every table into a snapshot.
    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Some(self.clock.now_utc()),
            packages: self.packages.values().cloned().collect(),
            clients: self.clients.values().cloned().collect(),
            client_hosts: self.client_hosts.values().cloned().collect(),
            licenses: self.licenses.values().cloned().collect(),
            machines: self.machines.values().cloned().collect(),
        }
    }

    /// Number of machine rows.
    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    /// Insert a package.
    pub fn insert_package(&mut self, new: NewPackage) -> Result<Package, LicensegateError> {
        let package_id = self.fresh_id(|tables, id| {
            tables.packages.values().any(|p| p.package_id == id)
        })?;
        let package = Package {
            id: self.next_id(),
            package_id,
            name: new.name,
            version: new.version,
            description: new.description,
            support_contact: new.support_contact,
            meta: new.meta,
        };
        self.packages.insert(package.id, package.clone());
        self.journal.push(Undo::PackageInserted(package.id));
        Ok(package)
    }

    /// Insert a client. Emails are unique, ignoring ASCII case.
    pub fn insert_client(&mut self, name: &str, email: &str) -> Result<Client, LicensegateError> {
        if self.find_client_by_email(email)?.is_some() {
            return Err(LicensegateError::Storage(format!(
                "client email '{}' already exists",
                email
            )));
        }
        let client = Client {
            id: self.next_id(),
            name: name.to_string(),
            email: email.to_string(),
        };
        self.clients.insert(client.id, client.clone());
        self.journal.push(Undo::ClientInserted(client.id));
        Ok(client)
    }

    /// Register a hostname for a client. Hostnames are unique.
    pub fn insert_client_host(
        &mut self,
        hostname: &str,
        ip: Option<&str>,
        client: RowId,
    ) -> Result<ClientHost, LicensegateError> {
        if !self.clients.contains_key(&client) {
            return Err(LicensegateError::Storage(format!(
                "client {} does not exist",
                client
            )));
        }
        if self.client_hosts.contains_key(hostname) {
            return Err(LicensegateError::Storage(format!(
                "hostname '{}' already registered",
                hostname
            )));
        }
        let host = ClientHost {
            hostname: hostname.to_string(),
            ip: ip.map(str::to_string),
            client,
        };
        self.client_hosts.insert(host.hostname.clone(), host.clone());
        self.journal.push(Undo::HostInserted(host.hostname.clone()));
        Ok(host)
    }

    /// Insert a license. Keys are globally unique.
    pub fn insert_license(&mut self, new: NewLicense) -> Result<License, LicensegateError> {
        if self.license_by_key.contains_key(&new.license_key) {
            return Err(LicensegateError::Storage(
                "license key already exists".to_string(),
            ));
        }
        if new.max_count == Some(0) {
            return Err(LicensegateError::Storage(
                "max_count must be at least 1".to_string(),
            ));
        }
        if let Some(package) = new.package {
            if !self.packages.contains_key(&package) {
                return Err(LicensegateError::Storage(format!(
                    "package {} does not exist",
                    package
                )));
            }
        }

        let license_id =
            self.fresh_id(|tables, id| tables.license_by_external.contains_key(id))?;
        let license = License {
            id: self.next_id(),
            license_id,
            license_key: new.license_key,
            license_type: new.license_type,
            max_count: new.max_count,
            expiration_date: new.expiration_date,
            status: new.status,
            renewal_terms: new.renewal_terms,
            package: new.package,
        };
        self.put_license(license.clone());
        self.journal.push(Undo::LicenseInserted(license.id));
        Ok(license)
    }

    /// Delete a license and every machine bound to it.
    ///
    /// Returns the number of machines removed, or `None` if the license
    /// does not exist.
    pub fn delete_license(&mut self, license: RowId) -> Result<Option<usize>, LicensegateError> {
        let bound: Vec<RowId> = self
            .machines
            .values()
            .filter(|m| m.license == license)
            .map(|m| m.id)
            .collect();

        let Some(removed) = self.drop_license(license) else {
            return Ok(None);
        };
        let machines: Vec<Machine> = bound
            .into_iter()
            .filter_map(|id| self.drop_machine(id))
            .collect();
        let count = machines.len();
        self.journal.push(Undo::LicenseRemoved(removed, machines));
        Ok(Some(count))
    }

    fn next_id(&mut self) -> RowId {
        let id = self.next_row;
        self.next_row += 1;
        id
    }

    fn fresh_id(&self, taken: impl Fn(&Self, &str) -> bool) -> Result<String, LicensegateError> {
        for _ in 0..ID_ATTEMPTS {
            let candidate = self.ids.generate();
            if !taken(self, &candidate) {
                return Ok(candidate);
            }
        }
        Err(LicensegateError::Storage(
            "could not allocate a unique external id".to_string(),
        ))
    }

    fn put_license(&mut self, license: License) {
        self.license_by_key.insert(license.license_key.clone(), license.id);
        self.license_by_external.insert(license.license_id.clone(), license.id);
        self.licenses.insert(license.id, license);
    }

    fn drop_license(&mut self, id: RowId) -> Option<License> {
        let license = self.licenses.remove(&id)?;
        self.license_by_key.remove(&license.license_key);
        self.license_by_external.remove(&license.license_id);
        Some(license)
    }

    fn put_machine(&mut self, machine: Machine) {
        if let Some(previous) = self.drop_machine(machine.id) {
            debug_assert_eq!(previous.fingerprint, machine.fingerprint);
        }
        self.machine_by_fingerprint.insert(machine.fingerprint.clone(), machine.id);
        self.machine_by_external.insert(machine.machine_id.clone(), machine.id);
        self.machines.insert(machine.id, machine);
    }

    fn drop_machine(&mut self, id: RowId) -> Option<Machine> {
        let machine = self.machines.remove(&id)?;
        self.machine_by_fingerprint.remove(&machine.fingerprint);
        self.machine_by_external.remove(&machine.machine_id);
        Some(machine)
    }

    fn rollback(&mut self) {
        while let Some(undo) = self.journal.pop() {
            match undo {
                Undo::PackageInserted(id) => {
                    self.packages.remove(&id);
                }
                Undo::ClientInserted(id) => {
                    self.clients.remove(&id);
                }
                Undo::HostInserted(hostname) => {
                    self.client_hosts.remove(&hostname);
                }
                Undo::LicenseInserted(id) => {
                    self.drop_license(id);
                }
                Undo::LicenseRemoved(license, machines) => {
                    self.put_license(license);
                    for machine in machines {
                        self.put_machine(machine);
                    }
                }
                Undo::MachineCreated(id) => {
                    self.drop_machine(id);
                }
                Undo::MachineReplaced(previous) => {
                    self.put_machine(previous);
                }
            }
        }
    }
}

impl LicenseStore for Tables {
    fn find_license_by_key(&self, key: &str) -> Result<Option<License>, LicensegateError> {
        Ok(self
            .license_by_key
            .get(key)
            .and_then(|id| self.licenses.get(id))
            .cloned())
    }

    fn find_license_by_id(&self, license_id: &str) -> Result<Option<License>, LicensegateError> {
        Ok(self
            .license_by_external
            .get(license_id)
            .and_then(|id| self.licenses.get(id))
            .cloned())
    }

    fn count_bound_machines(&self, license: RowId) -> Result<u64, LicensegateError> {
        Ok(self.machines.values().filter(|m| m.license == license).count() as u64)
    }

    fn find_package(&self, package: RowId) -> Result<Option<Package>, LicensegateError> {
        Ok(self.packages.get(&package).cloned())
    }
}

impl MachineRegistry for Tables {
    fn find_machine_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Machine>, LicensegateError> {
        Ok(self
            .machine_by_fingerprint
            .get(fingerprint)
            .and_then(|id| self.machines.get(id))
            .cloned())
    }

    fn find_machine_by_fingerprint_and_license(
        &self,
        fingerprint: &str,
        license: RowId,
    ) -> Result<Option<Machine>, LicensegateError> {
        Ok(self
            .find_machine_by_fingerprint(fingerprint)?
            .filter(|m| m.license == license))
    }

    fn create_machine(&mut self, attributes: NewMachine) -> Result<Machine, LicensegateError> {
        // Unique fingerprint constraint
        if self.machine_by_fingerprint.contains_key(&attributes.fingerprint) {
            return Err(LicensegateError::Storage(
                "fingerprint already registered".to_string(),
            ));
        }
        if !self.licenses.contains_key(&attributes.license)
            || !self.clients.contains_key(&attributes.client)
        {
            return Err(LicensegateError::Storage(
                "machine references a missing license or client".to_string(),
            ));
        }

        let machine_id =
            self.fresh_id(|tables, id| tables.machine_by_external.contains_key(id))?;
        let now = self.clock.now_utc();
        let machine = Machine {
            id: self.next_id(),
            machine_id,
            fingerprint: attributes.fingerprint,
            hostname: Some(attributes.hostname),
            status: attributes.status,
            client: attributes.client,
            license: attributes.license,
            descriptors: attributes.descriptors,
            created_at: now,
            updated_at: now,
        };
        self.put_machine(machine.clone());
        self.journal.push(Undo::MachineCreated(machine.id));
        Ok(machine)
    }

    fn rebind_machine(
        &mut self,
        machine: &Machine,
        target: Rebind,
    ) -> Result<Machine, LicensegateError> {
        let Some(current) = self.machines.get(&machine.id).cloned() else {
            return Err(LicensegateError::Storage(format!(
                "machine {} no longer exists",
                machine.machine_id
            )));
        };
        if !self.licenses.contains_key(&target.license) || !self.clients.contains_key(&target.client)
        {
            return Err(LicensegateError::Storage(
                "rebind references a missing license or client".to_string(),
            ));
        }

        let mut updated = current.clone();
        updated.license = target.license;
        updated.client = target.client;
        updated.status = target.status;
        updated.hostname = Some(target.hostname);
        updated.descriptors.merge(&target.descriptors);
        updated.updated_at = self.clock.now_utc();

        self.put_machine(updated.clone());
        self.journal.push(Undo::MachineReplaced(current));
        Ok(updated)
    }
}

impl ClientDirectory for Tables {
    fn find_client(&self, id: RowId) -> Result<Option<Client>, LicensegateError> {
        Ok(self.clients.get(&id).cloned())
    }

    fn find_client_by_email(&self, email: &str) -> Result<Option<Client>, LicensegateError> {
        Ok(self
            .clients
            .values()
            .find(|c| c.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    fn find_client_host(&self, hostname: &str) -> Result<Option<ClientHost>, LicensegateError> {
        Ok(self.client_hosts.get(hostname).cloned())
    }
}

/// In-process [`BindingStore`].
pub struct MemoryStore {
    tables: RwLock<Tables>,
    snapshot: Option<SnapshotFile>,
}

impl MemoryStore {
    /// Empty store with the system clock and random ids.
    pub fn new() -> Self {
        Self::with_seams(Arc::new(SystemClock), Arc::new(RandomIdGenerator::default()))
    }

    /// Empty store with the given clock and id generator.
    pub fn with_seams(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            tables: RwLock::new(Tables::empty(clock, ids)),
            snapshot: None,
        }
    }

    /// Store populated from a snapshot (e.g. a seed file).
    pub fn from_snapshot(
        snapshot: Snapshot,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, LicensegateError> {
        Ok(Self {
            tables: RwLock::new(Tables::from_snapshot(snapshot, clock, ids)?),
            snapshot: None,
        })
    }

    /// Store persisted to `file`, loaded from it when it already exists.
    /// `seed` populates the store only when the file does not exist yet.
    pub fn open(
        file: SnapshotFile,
        seed: Option<Snapshot>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, LicensegateError> {
        let (tables, fresh) = match file.load()? {
            Some(snapshot) => (Tables::from_snapshot(snapshot, clock, ids)?, false),
            None => match seed {
                Some(seed) => (Tables::from_snapshot(seed, clock, ids)?, true),
                None => (Tables::empty(clock, ids), true),
            },
        };
        if fresh {
            file.save(&tables.to_snapshot())?;
        }
        tracing::info!(path = %file.path().display(), fresh, "snapshot store opened");

        Ok(Self {
            tables: RwLock::new(tables),
            snapshot: Some(file),
        })
    }

    /// Copy of every table.
    pub fn snapshot(&self) -> Snapshot {
        self.tables.read().to_snapshot()
    }

    /// Insert a package.
    pub fn insert_package(&self, new: NewPackage) -> Result<Package, LicensegateError> {
        self.transaction(|t| t.insert_package(new))
    }

    /// Insert a client.
    pub fn insert_client(&self, name: &str, email: &str) -> Result<Client, LicensegateError> {
        self.transaction(|t| t.insert_client(name, email))
    }

    /// Register a hostname for a client.
    pub fn insert_client_host(
        &self,
        hostname: &str,
        ip: Option<&str>,
        client: RowId,
    ) -> Result<ClientHost, LicensegateError> {
        self.transaction(|t| t.insert_client_host(hostname, ip, client))
    }

    /// Insert a license.
    pub fn insert_license(&self, new: NewLicense) -> Result<License, LicensegateError> {
        self.transaction(|t| t.insert_license(new))
    }

    /// Delete a license, cascading to its machines.
    pub fn delete_license(&self, license: RowId) -> Result<Option<usize>, LicensegateError> {
        self.transaction(|t| t.delete_license(license))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingStore for MemoryStore {
    type Tables = Tables;

    fn read<T, F>(&self, f: F) -> Result<T, LicensegateError>
    where
        F: FnOnce(&Tables) -> Result<T, LicensegateError>,
    {
        let tables = self.tables.read();
        f(&tables)
    }

    fn transaction<T, F>(&self, f: F) -> Result<T, LicensegateError>
    where
        F: FnOnce(&mut Tables) -> Result<T, LicensegateError>,
    {
        let mut tables = self.tables.write();

        // Leftovers mean a previous transaction panicked mid-flight
        tables.rollback();

        let value = match f(&mut tables) {
            Ok(value) => value,
            Err(e) => {
                tables.rollback();
                return Err(e);
            }
        };

        if !tables.journal.is_empty() {
            if let Some(file) = &self.snapshot {
                if let Err(e) = file.save(&tables.to_snapshot()) {
                    tracing::error!(error = %e, "snapshot write failed, rolling back");
                    tables.rollback();
                    return Err(e);
                }
            }
        }
        tables.journal.clear();
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::protocol::models::MachineDescriptors;
    use tempfile::TempDir;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(MockClock::from_rfc3339("2025-03-01T09:00:00Z"))
    }

    fn store() -> MemoryStore {
        MemoryStore::with_seams(clock(), Arc::new(RandomIdGenerator::default()))
    }

    fn new_license(key: &str) -> NewLicense {
        NewLicense {
            license_key: key.to_string(),
            license_type: LicenseType::PerMachine,
            max_count: Some(2),
            expiration_date: None,
            status: RecordStatus::Active,
            renewal_terms: None,
            package: None,
        }
    }

    fn new_machine(fingerprint: &str, license: RowId, client: RowId) -> NewMachine {
        NewMachine {
            fingerprint: fingerprint.to_string(),
            hostname: "build-01".to_string(),
            client,
            license,
            status: RecordStatus::Active,
            descriptors: MachineDescriptors::default(),
        }
    }

    struct FixedIds;

    impl IdGenerator for FixedIds {
        fn generate(&self) -> String {
            "SAMEIDSAME".to_string()
        }
    }

    #[test]
    fn test_license_lookup_by_key_and_id() {
        let store = store();
        let license = store.insert_license(new_license("ABC123")).unwrap();
        assert_eq!(license.license_id.len(), 10);

        let by_key = store.read(|t| t.find_license_by_key("ABC123")).unwrap().unwrap();
        let by_id = store
            .read(|t| t.find_license_by_id(&license.license_id))
            .unwrap()
            .unwrap();
        assert_eq!(by_key, by_id);
        assert!(store.read(|t| t.find_license_by_key("nope")).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_license_key_rejected() {
        let store = store();
        store.insert_license(new_license("ABC123")).unwrap();
        let result = store.insert_license(new_license("ABC123"));
        assert!(matches!(result, Err(LicensegateError::Storage(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let store = store();
        let mut new = new_license("ABC123");
        new.max_count = Some(0);
        assert!(store.insert_license(new).is_err());
    }

    #[test]
    fn test_create_counts_and_fingerprint_constraint() {
        let store = store();
        let license = store.insert_license(new_license("ABC123")).unwrap();
        let client = store.insert_client("Acme", "ops@acme.test").unwrap();

        let machine = store
            .transaction(|t| t.create_machine(new_machine("F1", license.id, client.id)))
            .unwrap();
        assert_eq!(machine.hostname.as_deref(), Some("build-01"));
        assert_eq!(machine.created_at.to_rfc3339(), "2025-03-01T09:00:00+00:00");
        assert_eq!(store.read(|t| t.count_bound_machines(license.id)).unwrap(), 1);

        let dup = store.transaction(|t| t.create_machine(new_machine("F1", license.id, client.id)));
        assert!(matches!(dup, Err(LicensegateError::Storage(_))));
        assert_eq!(store.read(|t| t.count_bound_machines(license.id)).unwrap(), 1);
    }

    #[test]
    fn test_fingerprint_and_license_scope() {
        let store = store();
        let a = store.insert_license(new_license("A")).unwrap();
        let b = store.insert_license(new_license("B")).unwrap();
        let client = store.insert_client("Acme", "ops@acme.test").unwrap();
        store
            .transaction(|t| t.create_machine(new_machine("F1", a.id, client.id)))
            .unwrap();

        assert!(store
            .read(|t| t.find_machine_by_fingerprint_and_license("F1", a.id))
            .unwrap()
            .is_some());
        assert!(store
            .read(|t| t.find_machine_by_fingerprint_and_license("F1", b.id))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_rebind_moves_machine() {
        let store = store();
        let a = store.insert_license(new_license("A")).unwrap();
        let b = store.insert_license(new_license("B")).unwrap();
        let acme = store.insert_client("Acme", "ops@acme.test").unwrap();
        let other = store.insert_client("Other", "it@other.test").unwrap();
        let machine = store
            .transaction(|t| t.create_machine(new_machine("F1", a.id, acme.id)))
            .unwrap();

        let moved = store
            .transaction(|t| {
                t.rebind_machine(
                    &machine,
                    Rebind {
                        license: b.id,
                        client: other.id,
                        status: RecordStatus::Active,
                        hostname: "build-02".to_string(),
                        descriptors: MachineDescriptors {
                            os: Some("Debian 12".into()),
                            ..Default::default()
                        },
                    },
                )
            })
            .unwrap();

        assert_eq!(moved.machine_id, machine.machine_id);
        assert_eq!(moved.license, b.id);
        assert_eq!(moved.client, other.id);
        assert_eq!(moved.hostname.as_deref(), Some("build-02"));
        assert_eq!(moved.descriptors.os.as_deref(), Some("Debian 12"));
        assert_eq!(store.read(|t| t.count_bound_machines(a.id)).unwrap(), 0);
        assert_eq!(store.read(|t| t.count_bound_machines(b.id)).unwrap(), 1);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let store = store();
        let license = store.insert_license(new_license("ABC123")).unwrap();
        let client = store.insert_client("Acme", "ops@acme.test").unwrap();

        let result: Result<(), _> = store.transaction(|t| {
            t.create_machine(new_machine("F1", license.id, client.id))?;
            t.create_machine(new_machine("F2", license.id, client.id))?;
            Err(LicensegateError::Internal("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.read(|t| t.count_bound_machines(license.id)).unwrap(), 0);
        assert!(store.read(|t| t.find_machine_by_fingerprint("F1")).unwrap().is_none());
    }

    #[test]
    fn test_delete_license_cascades() {
        let store = store();
        let license = store.insert_license(new_license("ABC123")).unwrap();
        let keep = store.insert_license(new_license("KEEP")).unwrap();
        let client = store.insert_client("Acme", "ops@acme.test").unwrap();
        store
            .transaction(|t| {
                t.create_machine(new_machine("F1", license.id, client.id))?;
                t.create_machine(new_machine("F2", license.id, client.id))?;
                t.create_machine(new_machine("F3", keep.id, client.id))
            })
            .unwrap();

        assert_eq!(store.delete_license(license.id).unwrap(), Some(2));
        assert!(store.read(|t| t.find_license_by_key("ABC123")).unwrap().is_none());
        assert!(store.read(|t| t.find_machine_by_fingerprint("F1")).unwrap().is_none());
        assert!(store.read(|t| t.find_machine_by_fingerprint("F3")).unwrap().is_some());
        assert_eq!(store.delete_license(license.id).unwrap(), None);
    }

    #[test]
    fn test_client_directory_lookups() {
        let store = store();
        let client = store.insert_client("Acme", "Ops@Acme.test").unwrap();
        store.insert_client_host("build-01", Some("10.0.0.7"), client.id).unwrap();

        assert!(store.insert_client("Dup", "ops@acme.test").is_err());
        assert!(store.insert_client_host("build-01", None, client.id).is_err());
        assert!(store.insert_client_host("build-02", None, 999).is_err());

        let found = store.read(|t| t.find_client_by_email("ops@acme.test")).unwrap();
        assert_eq!(found.unwrap().id, client.id);
        let host = store.read(|t| t.find_client_host("build-01")).unwrap().unwrap();
        assert_eq!(host.client, client.id);
        assert_eq!(host.ip.as_deref(), Some("10.0.0.7"));
    }

    #[test]
    fn test_id_collisions_exhaust() {
        let store = MemoryStore::with_seams(clock(), Arc::new(FixedIds));
        store.insert_license(new_license("A")).unwrap();
        let result = store.insert_license(new_license("B"));
        assert!(matches!(result, Err(LicensegateError::Storage(msg)) if msg.contains("unique")));
        assert!(store.read(|t| t.find_license_by_key("B")).unwrap().is_none());
    }

    #[test]
    fn test_persisted_store_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");

        let license_id = {
            let store = MemoryStore::open(
                SnapshotFile::new(&path),
                None,
                clock(),
                Arc::new(RandomIdGenerator::default()),
            )
            .unwrap();
            let license = store.insert_license(new_license("ABC123")).unwrap();
            let client = store.insert_client("Acme", "ops@acme.test").unwrap();
            store
                .transaction(|t| t.create_machine(new_machine("F1", license.id, client.id)))
                .unwrap();
            license.license_id
        };

        let reopened = MemoryStore::open(
            SnapshotFile::new(&path),
            None,
            clock(),
            Arc::new(RandomIdGenerator::default()),
        )
        .unwrap();
        let license = reopened
            .read(|t| t.find_license_by_id(&license_id))
            .unwrap()
            .unwrap();
        assert_eq!(reopened.read(|t| t.count_bound_machines(license.id)).unwrap(), 1);

        // Row ids continue after the highest persisted id
        let next = reopened.insert_license(new_license("NEXT")).unwrap();
        assert!(next.id > license.id);
    }

    #[test]
    fn test_seed_used_only_for_fresh_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");
        let seed = {
            let store = store();
            store.insert_license(new_license("SEEDED")).unwrap();
            store.snapshot()
        };

        let store = MemoryStore::open(
            SnapshotFile::new(&path),
            Some(seed.clone()),
            clock(),
            Arc::new(RandomIdGenerator::default()),
        )
        .unwrap();
        store.delete_license(seed.licenses[0].id).unwrap();
        drop(store);

        let reopened = MemoryStore::open(
            SnapshotFile::new(&path),
            Some(seed),
            clock(),
            Arc::new(RandomIdGenerator::default()),
        )
        .unwrap();
        assert!(reopened.read(|t| t.find_license_by_key("SEEDED")).unwrap().is_none());
    }

    #[test]
    fn test_snapshot_write_failure_rolls_back() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").unwrap();

        let store = MemoryStore {
            tables: RwLock::new(Tables::empty(clock(), Arc::new(RandomIdGenerator::default()))),
            snapshot: Some(SnapshotFile::new(blocker.join("store.json"))),
        };

        let result = store.insert_license(new_license("ABC123"));
        assert!(matches!(result, Err(LicensegateError::SnapshotIO(_))));
        assert!(store.read(|t| t.find_license_by_key("ABC123")).unwrap().is_none());
    }
}

//! Snapshot format shared by seed files and persisted stores.
//!
//! A snapshot holds every table as a flat list. On load we check:
//! 1. The format version is supported
//! 2. License keys and external ids are unique
//! 3. Every foreign reference points at an existing row
//! 4. No fingerprint is bound twice

use crate::protocol::models::{Client, ClientHost, License, Machine, Package, RowId};
use crate::LicensegateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Full copy of the store tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Format version.
    pub version: u32,

    /// When this snapshot was written. Absent in hand-written seed files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,

    /// Packages.
    #[serde(default)]
    pub packages: Vec<Package>,

    /// Clients.
    #[serde(default)]
    pub clients: Vec<Client>,

    /// Pre-registered hostnames.
    #[serde(default)]
    pub client_hosts: Vec<ClientHost>,

    /// Licenses.
    #[serde(default)]
    pub licenses: Vec<License>,

    /// Machines.
    #[serde(default)]
    pub machines: Vec<Machine>,
}

impl Snapshot {
    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, LicensegateError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LicensegateError::SnapshotIO(format!("Failed to serialize snapshot: {}", e)))
    }

    /// Parse from JSON and check integrity.
    pub fn from_json(json: &str) -> Result<Self, LicensegateError> {
        let snapshot: Snapshot = serde_json::from_str(json)
            .map_err(|e| LicensegateError::SnapshotIO(format!("Failed to parse snapshot: {}", e)))?;
        snapshot.check_integrity()?;
        Ok(snapshot)
    }

    /// Highest row id used by any table.
    pub fn max_row_id(&self) -> RowId {
        let ids = self
            .packages
            .iter()
            .map(|p| p.id)
            .chain(self.clients.iter().map(|c| c.id))
            .chain(self.licenses.iter().map(|l| l.id))
            .chain(self.machines.iter().map(|m| m.id));
        ids.max().unwrap_or(0)
    }

    /// Verify version, uniqueness and referential integrity.
    pub fn check_integrity(&self) -> Result<(), LicensegateError> {
        // 1. Version
        if self.version != SNAPSHOT_VERSION {
            return Err(corrupt(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }

        // 2. Uniqueness
        let packages = unique(self.packages.iter().map(|p| p.id), "package id")?;
        let clients = unique(self.clients.iter().map(|c| c.id), "client id")?;
        let licenses = unique(self.licenses.iter().map(|l| l.id), "license row id")?;
        unique(self.machines.iter().map(|m| m.id), "machine row id")?;
        unique(self.licenses.iter().map(|l| l.license_key.as_str()), "license key")?;
        unique(self.licenses.iter().map(|l| l.license_id.as_str()), "license id")?;
        unique(self.machines.iter().map(|m| m.machine_id.as_str()), "machine id")?;
        unique(self.client_hosts.iter().map(|h| h.hostname.as_str()), "hostname")?;
        unique(
            self.clients.iter().map(|c| c.email.to_ascii_lowercase()),
            "client email",
        )?;

        // 3. References
        for license in &self.licenses {
            if license.max_count == Some(0) {
                return Err(corrupt(format!(
                    "license {} has max_count 0",
                    license.license_id
                )));
            }
            if let Some(package) = license.package {
                if !packages.contains(&package) {
                    return Err(corrupt(format!(
                        "license {} references missing package {}",
                        license.license_id, package
                    )));
                }
            }
        }
        for host in &self.client_hosts {
            if !clients.contains(&host.client) {
                return Err(corrupt(format!(
                    "hostname {} references missing client {}",
                    host.hostname, host.client
                )));
            }
        }
        for machine in &self.machines {
            if !licenses.contains(&machine.license) || !clients.contains(&machine.client) {
                return Err(corrupt(format!(
                    "machine {} references a missing license or client",
                    machine.machine_id
                )));
            }
        }

        // 4. Fingerprint dedup
        unique(self.machines.iter().map(|m| m.fingerprint.as_str()), "fingerprint")?;

        Ok(())
    }
}

fn corrupt(detail: String) -> LicensegateError {
    LicensegateError::SnapshotIO(format!("Corrupt snapshot: {}", detail))
}

fn unique<T, I>(values: I, what: &str) -> Result<HashSet<T>, LicensegateError>
where
    T: Eq + std::hash::Hash + std::fmt::Display,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    for value in values {
        if seen.contains(&value) {
            return Err(corrupt(format!("duplicate {} '{}'", what, value)));
        }
        seen.insert(value);
    }
    Ok(seen)
}

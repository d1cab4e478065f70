//! Shared fixtures for integration tests.

#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, Utc};
use licensegate::protocol::models::{License, LicenseType, RecordStatus};
use licensegate::store::memory::{MemoryStore, NewLicense};
use licensegate::store::RandomIdGenerator;
use licensegate::{BindingEngine, Clock, DeploymentMode, LicensegateConfig, ValidationService};
use std::sync::Arc;

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    pub fn at(rfc3339: &str) -> Self {
        Self(
            DateTime::parse_from_rfc3339(rfc3339)
                .unwrap()
                .with_timezone(&Utc),
        )
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

pub const NOW: &str = "2025-03-01T09:00:00Z";

pub fn clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock::at(NOW))
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Store with two clients, each owning one pre-registered hostname:
/// `ops@acme.test` owns `build-01`, `it@other.test` owns `build-02`.
pub fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::with_seams(clock(), Arc::new(RandomIdGenerator::default()));
    let acme = store.insert_client("Acme", "ops@acme.test").unwrap();
    let other = store.insert_client("Other", "it@other.test").unwrap();
    store.insert_client_host("build-01", Some("10.0.0.1"), acme.id).unwrap();
    store.insert_client_host("build-02", Some("10.0.0.2"), other.id).unwrap();
    Arc::new(store)
}

pub fn add_license(
    store: &MemoryStore,
    key: &str,
    max_count: Option<u32>,
    expiration_date: Option<NaiveDate>,
    status: RecordStatus,
) -> License {
    store
        .insert_license(NewLicense {
            license_key: key.to_string(),
            license_type: LicenseType::PerMachine,
            max_count,
            expiration_date,
            status,
            renewal_terms: None,
            package: None,
        })
        .unwrap()
}

pub fn config(mode: DeploymentMode) -> LicensegateConfig {
    LicensegateConfig {
        mode,
        ..Default::default()
    }
}

pub fn engine(store: &Arc<MemoryStore>, mode: DeploymentMode) -> BindingEngine<MemoryStore> {
    BindingEngine::with_clock(Arc::clone(store), &config(mode), clock()).unwrap()
}

pub fn validation(store: &Arc<MemoryStore>) -> ValidationService<MemoryStore> {
    ValidationService::with_clock(
        Arc::clone(store),
        licensegate::CredentialKind::LicenseKey,
        clock(),
    )
}

//! # Licensegate
//!
//! **License issuance backend: machine binding, seat capacity and license
//! validation.**
//!
//! Installed software registers the machine it runs on against a license,
//! probes whether it is still registered, and polls the license state.
//! Licensegate decides whether each binding is allowed.
//!
//! ## Features
//!
//! - **Ordered preconditions** - license exists, is active, is not expired,
//!   the client resolves, then the fingerprint and capacity checks
//! - **Serialized registrations** - the capacity check and the create run in
//!   one store transaction, so `max_count` can never be exceeded
//! - **Two deployment modes** - hostname resolution with move-on-conflict, or
//!   email resolution with reject-on-conflict
//! - **Snapshot persistence** - committed mutations are written atomically;
//!   a failed write rolls the mutation back
//!
//! ## Quickstart
//!
//! ```no_run
//! use licensegate::store::memory::{MemoryStore, NewLicense};
//! use licensegate::protocol::models::{LicenseType, RecordStatus, RegisterMachineRequest};
//! use licensegate::{BindingEngine, LicensegateConfig};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), licensegate::LicensegateError> {
//!     let store = Arc::new(MemoryStore::new());
//!     let client = store.insert_client("Acme", "ops@acme.test")?;
//!     store.insert_client_host("build-01", None, client.id)?;
//!     store.insert_license(NewLicense {
//!         license_key: "ABC123".into(),
//!         license_type: LicenseType::PerMachine,
//!         max_count: Some(2),
//!         expiration_date: None,
//!         status: RecordStatus::Active,
//!         renewal_terms: None,
//!         package: None,
//!     })?;
//!
//!     let engine = BindingEngine::new(store, &LicensegateConfig::default())?;
//!     let registration = engine.register_machine(&RegisterMachineRequest {
//!         license_key: Some("ABC123".into()),
//!         hostname: Some("build-01".into()),
//!         fingerprint: Some("F1".into()),
//!         ..Default::default()
//!     })?;
//!
//!     println!("machine {}", registration.data().machine_id);
//!     Ok(())
//! }
//! ```
//!
//! ## Deployment modes
//!
//! - `hostname-move` (default) - the client is found through a hostname it
//!   pre-registered; a fingerprint presented against another license is
//!   moved to it
//! - `email-reject` - the client is found by email; a fingerprint stays with
//!   its first license and a second claim fails with `DuplicateFingerprint`
//!
//! See [`LicensegateConfig`] for full documentation.

#![warn(missing_docs)]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;

// Protocol layer
pub mod protocol;

// Policy layer
pub mod policy;

// Store layer
pub mod store;

// Engine and validation (main public API)
pub mod engine;
pub mod validation;

// HTTP boundary
pub mod http;

// Re-exports for public API
pub use clock::{Clock, SystemClock};
pub use config::{CredentialKind, DeploymentMode, LicensegateConfig};
pub use engine::BindingEngine;
pub use errors::LicensegateError;
pub use policy::access::SeatCaps;
pub use protocol::models::{LicenseSnapshot, Registration};
pub use store::memory::MemoryStore;
pub use validation::ValidationService;

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;

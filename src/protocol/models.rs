//! Stored records, request payloads and response bodies.

use crate::config::CredentialKind;
use crate::errors::FieldErrors;
use crate::policy::resolver::ClientResolver;
use crate::LicensegateError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Internal primary key of a stored row.
pub type RowId = u64;

/// Maximum accepted hostname length.
pub const MAX_HOSTNAME_LEN: usize = 255;

/// Maximum accepted fingerprint length.
pub const MAX_FINGERPRINT_LEN: usize = 500;

/// Maximum accepted length of a machine descriptor.
pub const MAX_DESCRIPTOR_LEN: usize = 255;

/// What a license entitles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LicenseType {
    /// Seat per end user.
    PerUser,
    /// Seat per machine.
    PerMachine,
    /// Floating seats.
    ConcurrentUsers,
}

/// Status shared by licenses and machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Usable.
    Active,
    /// Switched off administratively.
    Inactive,
}

/// A stored license.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    /// Internal primary key.
    pub id: RowId,

    /// Opaque external id.
    pub license_id: String,

    /// Secret key presented by callers. Globally unique.
    pub license_key: String,

    /// Entitlement kind.
    pub license_type: LicenseType,

    /// Maximum bound machines (None = unlimited).
    pub max_count: Option<u32>,

    /// Last valid day (None = never expires).
    pub expiration_date: Option<NaiveDate>,

    /// Administrative status.
    pub status: RecordStatus,

    /// Free-form renewal terms.
    #[serde(default)]
    pub renewal_terms: Option<String>,

    /// Package this license entitles.
    #[serde(default)]
    pub package: Option<RowId>,
}

impl License {
    /// Expired when an expiration date is set and lies before `today`.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiration_date.is_some_and(|date| date < today)
    }

    /// Usable when active and not expired.
    pub fn is_usable(&self, today: NaiveDate) -> bool {
        self.status == RecordStatus::Active && !self.is_expired(today)
    }
}

/// Optional platform descriptors reported by the installed client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineDescriptors {
    /// Platform family, e.g. "linux".
    #[serde(default)]
    pub platform: Option<String>,
    /// Operating system name and version.
    #[serde(default)]
    pub os: Option<String>,
    /// CPU model.
    #[serde(default)]
    pub cpu: Option<String>,
    /// Last reported IP address.
    #[serde(default)]
    pub ip: Option<String>,
}

impl MachineDescriptors {
    /// Overlay the descriptors present in `update`, keeping the rest.
    pub fn merge(&mut self, update: &MachineDescriptors) {
        if update.platform.is_some() {
            self.platform.clone_from(&update.platform);
        }
        if update.os.is_some() {
            self.os.clone_from(&update.os);
        }
        if update.cpu.is_some() {
            self.cpu.clone_from(&update.cpu);
        }
        if update.ip.is_some() {
            self.ip.clone_from(&update.ip);
        }
    }
}

/// A machine bound to one license and one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    /// Internal primary key.
    pub id: RowId,

    /// Opaque external id.
    pub machine_id: String,

    /// Caller-computed stable identity.
    pub fingerprint: String,

    /// Hostname last presented for this machine.
    pub hostname: Option<String>,

    /// Binding status.
    pub status: RecordStatus,

    /// Owning client.
    pub client: RowId,

    /// Bound license.
    pub license: RowId,

    /// Platform descriptors.
    #[serde(default)]
    pub descriptors: MachineDescriptors,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Last rebind time.
    pub updated_at: DateTime<Utc>,
}

/// Attributes for a new machine record.
#[derive(Debug, Clone)]
pub struct NewMachine {
    /// Caller-computed stable identity.
    pub fingerprint: String,
    /// Presented hostname.
    pub hostname: String,
    /// Owning client.
    pub client: RowId,
    /// Bound license.
    pub license: RowId,
    /// Initial status.
    pub status: RecordStatus,
    /// Platform descriptors.
    pub descriptors: MachineDescriptors,
}

/// Target of a rebind.
#[derive(Debug, Clone)]
pub struct Rebind {
    /// New license.
    pub license: RowId,
    /// New owning client.
    pub client: RowId,
    /// New status.
    pub status: RecordStatus,
    /// Hostname presented with the move.
    pub hostname: String,
    /// Descriptors presented with the move.
    pub descriptors: MachineDescriptors,
}

/// The organization or end user owning machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Internal primary key.
    pub id: RowId,
    /// Display name.
    pub name: String,
    /// Contact email, unique per client.
    pub email: String,
}

/// A hostname pre-registered by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHost {
    /// Registered hostname.
    pub hostname: String,
    /// Registered address.
    #[serde(default)]
    pub ip: Option<String>,
    /// Owning client.
    pub client: RowId,
}

/// What a license entitles, with free-form metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Internal primary key.
    pub id: RowId,
    /// Opaque external id.
    pub package_id: String,
    /// Display name.
    pub name: String,
    /// Version string.
    #[serde(default)]
    pub version: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Support contact.
    #[serde(default)]
    pub support_contact: Option<String>,
    /// Key-value metadata.
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

/// A validated license credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Secret license key.
    Key(String),
    /// External license id.
    Id(String),
}

/// Client resolution input carried by a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientLookup {
    /// Presented hostname.
    pub hostname: Option<String>,
    /// Presented email.
    pub email: Option<String>,
}

/// Raw `register-machine` payload.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegisterMachineRequest {
    /// Secret license key.
    #[serde(default)]
    pub license_key: Option<String>,
    /// External license id.
    #[serde(default)]
    pub license_id: Option<String>,
    /// Presented hostname.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Stable machine identity.
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Client email.
    #[serde(default)]
    pub email: Option<String>,
    /// Platform family.
    #[serde(default)]
    pub platform: Option<String>,
    /// Operating system.
    #[serde(default)]
    pub os: Option<String>,
    /// CPU model.
    #[serde(default)]
    pub cpu: Option<String>,
    /// Machine IP address.
    #[serde(default)]
    pub ip: Option<String>,
}

/// Validated registration.
#[derive(Debug, Clone)]
pub struct RegisterMachine {
    /// License credential.
    pub credential: Credential,
    /// Machine identity.
    pub fingerprint: String,
    /// Presented hostname.
    pub hostname: String,
    /// Client resolution input.
    pub client: ClientLookup,
    /// Platform descriptors.
    pub descriptors: MachineDescriptors,
}

impl RegisterMachineRequest {
    /// Check every field, reporting all failures at once.
    pub fn validate(
        &self,
        kind: CredentialKind,
        resolver: &dyn ClientResolver,
    ) -> Result<RegisterMachine, LicensegateError> {
        let mut errors = FieldErrors::new();

        let credential = credential_field(kind, &self.license_key, &self.license_id, &mut errors);
        let fingerprint = required(
            "fingerprint",
            self.fingerprint.as_deref(),
            MAX_FINGERPRINT_LEN,
            &mut errors,
        );
        let hostname = required(
            "hostname",
            self.hostname.as_deref(),
            MAX_HOSTNAME_LEN,
            &mut errors,
        );
        let client = ClientLookup {
            hostname: hostname.clone(),
            email: trimmed(self.email.as_deref()),
        };
        resolver.validate_lookup(&client, true, &mut errors);

        let descriptors = MachineDescriptors {
            platform: optional("platform", self.platform.as_deref(), &mut errors),
            os: optional("os", self.os.as_deref(), &mut errors),
            cpu: optional("cpu", self.cpu.as_deref(), &mut errors),
            ip: ip_field(self.ip.as_deref(), &mut errors),
        };

        match (credential, fingerprint, hostname) {
            (Some(credential), Some(fingerprint), Some(hostname)) if errors.is_empty() => {
                Ok(RegisterMachine {
                    credential,
                    fingerprint,
                    hostname,
                    client,
                    descriptors,
                })
            }
            _ => Err(LicensegateError::ValidationFailed { errors }),
        }
    }
}

/// Raw `check-machine` payload.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CheckMachineRequest {
    /// Secret license key.
    #[serde(default)]
    pub license_key: Option<String>,
    /// External license id.
    #[serde(default)]
    pub license_id: Option<String>,
    /// Stable machine identity.
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Presented hostname.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Client email.
    #[serde(default)]
    pub email: Option<String>,
}

/// Validated machine probe.
#[derive(Debug, Clone)]
pub struct CheckMachine {
    /// License credential.
    pub credential: Credential,
    /// Machine identity.
    pub fingerprint: String,
    /// Client resolution input, if any was presented.
    pub client: ClientLookup,
}

impl CheckMachineRequest {
    /// Check every field, reporting all failures at once.
    pub fn validate(
        &self,
        kind: CredentialKind,
        resolver: &dyn ClientResolver,
    ) -> Result<CheckMachine, LicensegateError> {
        let mut errors = FieldErrors::new();

        let credential = credential_field(kind, &self.license_key, &self.license_id, &mut errors);
        let fingerprint = required(
            "fingerprint",
            self.fingerprint.as_deref(),
            MAX_FINGERPRINT_LEN,
            &mut errors,
        );
        let client = ClientLookup {
            hostname: trimmed(self.hostname.as_deref()),
            email: trimmed(self.email.as_deref()),
        };
        resolver.validate_lookup(&client, false, &mut errors);

        match (credential, fingerprint) {
            (Some(credential), Some(fingerprint)) if errors.is_empty() => Ok(CheckMachine {
                credential,
                fingerprint,
                client,
            }),
            _ => Err(LicensegateError::ValidationFailed { errors }),
        }
    }
}

/// Raw `validate-license` payload.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ValidateLicenseRequest {
    /// Secret license key.
    #[serde(default)]
    pub license_key: Option<String>,
    /// External license id.
    #[serde(default)]
    pub license_id: Option<String>,
}

impl ValidateLicenseRequest {
    /// Extract the credential.
    pub fn validate(&self, kind: CredentialKind) -> Result<Credential, LicensegateError> {
        let mut errors = FieldErrors::new();
        match credential_field(kind, &self.license_key, &self.license_id, &mut errors) {
            Some(credential) => Ok(credential),
            None => Err(LicensegateError::ValidationFailed { errors }),
        }
    }
}

/// Push a message for `field`.
pub(crate) fn push_error(errors: &mut FieldErrors, field: &str, message: String) {
    errors.entry(field.to_string()).or_default().push(message);
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(field: &str, value: Option<&str>, max_len: usize, errors: &mut FieldErrors) -> Option<String> {
    let Some(value) = trimmed(value) else {
        push_error(errors, field, format!("The {} field is required.", field));
        return None;
    };
    if value.chars().count() > max_len {
        push_error(
            errors,
            field,
            format!("The {} field must not be greater than {} characters.", field, max_len),
        );
        return None;
    }
    Some(value)
}

fn optional(field: &str, value: Option<&str>, errors: &mut FieldErrors) -> Option<String> {
    let value = trimmed(value)?;
    if value.chars().count() > MAX_DESCRIPTOR_LEN {
        push_error(
            errors,
            field,
            format!(
                "The {} field must not be greater than {} characters.",
                field, MAX_DESCRIPTOR_LEN
            ),
        );
        return None;
    }
    Some(value)
}

fn ip_field(value: Option<&str>, errors: &mut FieldErrors) -> Option<String> {
    let value = trimmed(value)?;
    match value.parse::<IpAddr>() {
        Ok(ip) => Some(ip.to_string()),
        Err(_) => {
            push_error(errors, "ip", "The ip field must be a valid IP address.".to_string());
            None
        }
    }
}

fn credential_field(
    kind: CredentialKind,
    license_key: &Option<String>,
    license_id: &Option<String>,
    errors: &mut FieldErrors,
) -> Option<Credential> {
    match kind {
        CredentialKind::LicenseKey => {
            required("license_key", license_key.as_deref(), usize::MAX, errors).map(Credential::Key)
        }
        CredentialKind::LicenseId => {
            required("license_id", license_id.as_deref(), usize::MAX, errors).map(Credential::Id)
        }
    }
}

/// Common response envelope for every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the operation succeeded.
    pub success: bool,

    /// Human-readable outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Operation payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    /// Existing machine id on conflicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,

    /// Machine probe outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,

    /// Per-field validation messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,

    /// Internal error detail, only when explicitly enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Successful response with a payload.
    pub fn ok(message: Option<String>, data: T) -> Self {
        Self {
            success: true,
            message,
            data: Some(data),
            machine_id: None,
            exists: None,
            errors: None,
            error: None,
        }
    }

    /// Failed response with a message.
    pub fn failure(message: String) -> Self {
        Self {
            success: false,
            message: Some(message),
            data: None,
            machine_id: None,
            exists: None,
            errors: None,
            error: None,
        }
    }
}

/// Successful registration payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationData {
    /// External machine id.
    pub machine_id: String,

    /// Hostname stored on the machine.
    pub hostname: Option<String>,

    /// External license id.
    pub license_id: String,

    /// Owning client id (hostname resolution).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<RowId>,

    /// Owning client email (email resolution).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_email: Option<String>,

    /// Present and true when an existing machine was moved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moved: Option<bool>,
}

/// Outcome of `register_machine`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// A new machine was created.
    Created(RegistrationData),
    /// An existing machine was rebound to this license.
    Moved(RegistrationData),
}

impl Registration {
    /// Response payload.
    pub fn data(&self) -> &RegistrationData {
        match self {
            Registration::Created(data) | Registration::Moved(data) => data,
        }
    }

    /// Whether the machine was moved.
    pub fn moved(&self) -> bool {
        matches!(self, Registration::Moved(_))
    }
}

/// Successful machine probe payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineProbe {
    /// External machine id.
    pub machine_id: String,
    /// Binding status.
    pub status: RecordStatus,
    /// External license id.
    pub license_id: String,
    /// Always true for a found machine.
    pub exists: bool,
}

/// Package details attached to a license snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    /// External package id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Version string.
    pub version: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Key-value metadata.
    pub meta: BTreeMap<String, String>,
}

impl From<&Package> for PackageInfo {
    fn from(package: &Package) -> Self {
        Self {
            id: package.package_id.clone(),
            name: package.name.clone(),
            version: package.version.clone(),
            description: package.description.clone(),
            meta: package.meta.clone(),
        }
    }
}

/// Read-only license validation snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseSnapshot {
    /// External license id.
    pub license_id: String,
    /// Entitlement kind.
    pub license_type: LicenseType,
    /// Administrative status.
    pub status: RecordStatus,
    /// Active and not expired.
    pub is_active: bool,
    /// Expiration date set and past.
    pub is_expired: bool,
    /// Last valid day, `YYYY-MM-DD`.
    pub expiration_date: Option<NaiveDate>,
    /// Capacity (None = unlimited).
    pub max_count: Option<u32>,
    /// Machines currently bound.
    pub current_count: u64,
    /// Renewal terms.
    pub renewal_terms: Option<String>,
    /// Entitled package.
    pub package: Option<PackageInfo>,
}

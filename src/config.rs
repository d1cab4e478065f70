//! Licensegate configuration.

use crate::policy::conflict::{ConflictPolicy, MoveOnConflict, RejectOnConflict};
use crate::policy::resolver::{ClientResolver, ResolveByEmail, ResolveByHostname};
use crate::LicensegateError;
use clap::ValueEnum;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Listen address variable.
pub const ENV_BIND: &str = "LICENSEGATE_BIND";
/// Deployment mode variable.
pub const ENV_MODE: &str = "LICENSEGATE_MODE";
/// Credential kind variable.
pub const ENV_CREDENTIAL: &str = "LICENSEGATE_CREDENTIAL";
/// Snapshot path variable.
pub const ENV_SNAPSHOT: &str = "LICENSEGATE_SNAPSHOT";
/// Requests per window variable.
pub const ENV_RATE_LIMIT: &str = "LICENSEGATE_RATE_LIMIT";
/// Window length variable, in seconds.
pub const ENV_RATE_WINDOW_SECS: &str = "LICENSEGATE_RATE_WINDOW_SECS";
/// Seed file variable, read by the binary only.
pub const ENV_SEED: &str = "LICENSEGATE_SEED";
/// Comma-separated trusted proxy addresses.
pub const ENV_TRUSTED_PROXIES: &str = "LICENSEGATE_TRUSTED_PROXIES";
/// Internal error detail flag.
pub const ENV_EXPOSE_INTERNAL_ERRORS: &str = "LICENSEGATE_EXPOSE_INTERNAL_ERRORS";

/// How registrations resolve their client and treat a fingerprint already
/// bound to another license. Chosen once per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DeploymentMode {
    /// Client resolved from a pre-registered hostname record; a fingerprint
    /// presented against a different license is moved to it.
    #[default]
    HostnameMove,
    /// Client resolved by email; a fingerprint stays with its first license
    /// for the lifetime of the record.
    EmailReject,
}

impl DeploymentMode {
    /// The resolver/policy pair implementing this mode.
    pub fn strategies(&self) -> (Box<dyn ClientResolver>, Box<dyn ConflictPolicy>) {
        match self {
            DeploymentMode::HostnameMove => (Box::new(ResolveByHostname), Box::new(MoveOnConflict)),
            DeploymentMode::EmailReject => (Box::new(ResolveByEmail), Box::new(RejectOnConflict)),
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value_name(self, f)
    }
}

/// Which license field callers present as their credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CredentialKind {
    /// The secret license key.
    #[default]
    LicenseKey,
    /// The opaque external license id.
    LicenseId,
}

impl CredentialKind {
    /// Request field carrying the credential.
    pub fn field_name(&self) -> &'static str {
        match self {
            CredentialKind::LicenseKey => "license_key",
            CredentialKind::LicenseId => "license_id",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value_name(self, f)
    }
}

/// Writes the name clap accepts for `value`.
fn write_value_name<T: ValueEnum>(value: &T, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value.to_possible_value() {
        Some(possible) => f.write_str(possible.get_name()),
        None => Ok(()),
    }
}

/// Parses a name clap accepts for `T`.
fn parse_value<T: ValueEnum>(var: &str, raw: &str) -> Result<T, LicensegateError> {
    T::from_str(raw, false)
        .map_err(|e| LicensegateError::ConfigError(format!("invalid {} '{}': {}", var, raw, e)))
}

/// Per-caller request throttle applied ahead of the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests per caller per window.
    pub max_requests: u64,

    /// Window length.
    pub window: Duration,

    /// Proxies whose `X-Forwarded-For` header is believed. Every other
    /// caller is keyed by its socket address.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            trusted_proxies: Vec::new(),
        }
    }
}

/// Configuration for a Licensegate deployment.
#[derive(Debug, Clone)]
pub struct LicensegateConfig {
    /// Address the HTTP boundary listens on.
    pub bind_addr: SocketAddr,

    /// Client resolution and conflict policy.
    pub mode: DeploymentMode,

    /// Credential field callers present.
    pub credential: CredentialKind,

    /// Snapshot file for persistence. `None` keeps the store in memory only.
    pub snapshot_path: Option<PathBuf>,

    /// Per-caller throttle.
    pub rate_limit: RateLimitConfig,

    /// Include internal error detail in 500 responses. Development only.
    pub expose_internal_errors: bool,
}

impl Default for LicensegateConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            mode: DeploymentMode::default(),
            credential: CredentialKind::default(),
            snapshot_path: None,
            rate_limit: RateLimitConfig::default(),
            expose_internal_errors: false,
        }
    }
}

impl LicensegateConfig {
    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), LicensegateError> {
        if self.mode == DeploymentMode::HostnameMove && self.credential != CredentialKind::LicenseKey {
            return Err(LicensegateError::ConfigError(
                "hostname-move mode requires license-key credentials".to_string(),
            ));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(LicensegateError::ConfigError(
                "rate limit max_requests must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.window.is_zero() {
            return Err(LicensegateError::ConfigError(
                "rate limit window cannot be zero".to_string(),
            ));
        }
        if let Some(path) = &self.snapshot_path {
            if path.as_os_str().is_empty() {
                return Err(LicensegateError::ConfigError(
                    "snapshot_path cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Build a configuration from `LICENSEGATE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, LicensegateError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LicensegateError> {
        let mut config = Self::default();

        if let Some(addr) = lookup(ENV_BIND) {
            config.bind_addr = addr.parse().map_err(|e| {
                LicensegateError::ConfigError(format!("invalid {} '{}': {}", ENV_BIND, addr, e))
            })?;
        }
        if let Some(mode) = lookup(ENV_MODE) {
            config.mode = parse_value(ENV_MODE, &mode)?;
        }
        if let Some(kind) = lookup(ENV_CREDENTIAL) {
            config.credential = parse_value(ENV_CREDENTIAL, &kind)?;
        }
        if let Some(path) = lookup(ENV_SNAPSHOT) {
            config.snapshot_path = Some(PathBuf::from(path));
        }
        if let Some(max) = lookup(ENV_RATE_LIMIT) {
            config.rate_limit.max_requests = max.parse().map_err(|e| {
                LicensegateError::ConfigError(format!("invalid {}: {}", ENV_RATE_LIMIT, e))
            })?;
        }
        if let Some(secs) = lookup(ENV_RATE_WINDOW_SECS) {
            let secs: u64 = secs.parse().map_err(|e| {
                LicensegateError::ConfigError(format!("invalid {}: {}", ENV_RATE_WINDOW_SECS, e))
            })?;
            config.rate_limit.window = Duration::from_secs(secs);
        }
        if let Some(proxies) = lookup(ENV_TRUSTED_PROXIES) {
            config.rate_limit.trusted_proxies = proxies
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| {
                    p.parse().map_err(|e| {
                        LicensegateError::ConfigError(format!(
                            "invalid {} entry '{}': {}",
                            ENV_TRUSTED_PROXIES, p, e
                        ))
                    })
                })
                .collect::<Result<_, _>>()?;
        }
        if let Some(flag) = lookup(ENV_EXPOSE_INTERNAL_ERRORS) {
            config.expose_internal_errors = flag.eq_ignore_ascii_case("true") || flag == "1";
        }

        config.validate()?;
        Ok(config)
    }
}

/// Default snapshot location under `dirs::data_dir()/licensegate/`.
pub fn default_snapshot_path() -> Result<PathBuf, LicensegateError> {
    let base_dir = dirs::data_dir()
        .ok_or_else(|| LicensegateError::ConfigError("Could not find data directory".to_string()))?;
    Ok(base_dir.join("licensegate").join("store.json"))
}

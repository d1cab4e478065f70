//! Resolving the client that owns a registering machine.

use crate::errors::FieldErrors;
use crate::protocol::models::{push_error, Client, ClientLookup};
use crate::store::ClientDirectory;
use crate::LicensegateError;
use email_address::EmailAddress;
use std::fmt::Debug;

/// How a response identifies the resolved client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientIdentity {
    /// Internal client id.
    Id(u64),
    /// Client email.
    Email(String),
}

/// Client resolution seam. One implementation is selected per deployment.
pub trait ClientResolver: Send + Sync + Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Add errors for missing or malformed lookup fields. `required` is false
    /// for read-only probes, where the lookup is optional.
    fn validate_lookup(&self, lookup: &ClientLookup, required: bool, errors: &mut FieldErrors);

    /// Whether `lookup` carries the field this resolver needs.
    fn has_lookup(&self, lookup: &ClientLookup) -> bool;

    /// Resolve the client or fail with `ClientNotFound`.
    fn resolve(
        &self,
        directory: &dyn ClientDirectory,
        lookup: &ClientLookup,
    ) -> Result<Client, LicensegateError>;

    /// Whether machine probes are scoped to the resolved client.
    fn scopes_checks(&self) -> bool;

    /// Identifier reported back to the caller.
    fn identify(&self, client: &Client) -> ClientIdentity;
}

/// Resolves through a hostname record pre-registered by the client.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveByHostname;

impl ClientResolver for ResolveByHostname {
    fn name(&self) -> &'static str {
        "hostname"
    }

    fn validate_lookup(&self, _lookup: &ClientLookup, _required: bool, _errors: &mut FieldErrors) {
        // hostname is already a required registration field
    }

    fn has_lookup(&self, lookup: &ClientLookup) -> bool {
        lookup.hostname.is_some()
    }

    fn resolve(
        &self,
        directory: &dyn ClientDirectory,
        lookup: &ClientLookup,
    ) -> Result<Client, LicensegateError> {
        let hostname = lookup.hostname.as_deref().unwrap_or_default();
        let not_found = || LicensegateError::ClientNotFound {
            lookup: format!("hostname: {}", hostname),
        };

        let host = directory.find_client_host(hostname)?.ok_or_else(not_found)?;
        directory.find_client(host.client)?.ok_or_else(not_found)
    }

    fn scopes_checks(&self) -> bool {
        false
    }

    fn identify(&self, client: &Client) -> ClientIdentity {
        ClientIdentity::Id(client.id)
    }
}

/// Resolves by the client's registered email.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveByEmail;

impl ClientResolver for ResolveByEmail {
    fn name(&self) -> &'static str {
        "email"
    }

    fn validate_lookup(&self, lookup: &ClientLookup, required: bool, errors: &mut FieldErrors) {
        match lookup.email.as_deref() {
            None if required => {
                push_error(errors, "email", "The email field is required.".to_string());
            }
            Some(email) if !EmailAddress::is_valid(email) => {
                push_error(
                    errors,
                    "email",
                    "The email field must be a valid email address.".to_string(),
                );
            }
            _ => {}
        }
    }

    fn has_lookup(&self, lookup: &ClientLookup) -> bool {
        lookup.email.is_some()
    }

    fn resolve(
        &self,
        directory: &dyn ClientDirectory,
        lookup: &ClientLookup,
    ) -> Result<Client, LicensegateError> {
        let email = lookup.email.as_deref().unwrap_or_default();
        directory
            .find_client_by_email(email)?
            .ok_or_else(|| LicensegateError::ClientNotFound {
                lookup: format!("email: {}", email),
            })
    }

    fn scopes_checks(&self) -> bool {
        true
    }

    fn identify(&self, client: &Client) -> ClientIdentity {
        ClientIdentity::Email(client.email.clone())
    }
}
